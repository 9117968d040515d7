use analysis_core::{
    AnalysisError, Bar, Dimension, DimensionInput, Financials, InstrumentId, MarketDataSource,
    NewsArticle,
};
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Internal cache entry with timestamp
struct CacheEntry<T> {
    data: T,
    cached_at: Instant,
}

/// TTL cache allowing at most one in-flight upstream fetch per key.
///
/// Concurrent callers for the same key share one `OnceCell`; the first runs
/// the fetch and the rest await its result. Failed fetches leave the cell
/// empty so the next caller retries.
pub struct SingleFlightCache<T> {
    entries: DashMap<String, Arc<OnceCell<CacheEntry<T>>>>,
    ttl: Duration,
}

impl<T: Clone> SingleFlightCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T, AnalysisError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        // Shard guard must be released before awaiting
        let cell = {
            let mut slot = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            let expired = slot
                .value()
                .get()
                .map_or(false, |entry| entry.cached_at.elapsed() >= self.ttl);
            if expired {
                *slot = Arc::new(OnceCell::new());
            }
            slot.value().clone()
        };

        let entry = cell
            .get_or_try_init(move || async move {
                tracing::debug!("Cache miss for {}", key);
                let data = fetch().await?;
                Ok::<_, AnalysisError>(CacheEntry {
                    data,
                    cached_at: Instant::now(),
                })
            })
            .await?;

        Ok(entry.data.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn require_data<T>(data: Vec<T>, what: &str, instrument: &InstrumentId) -> Result<Vec<T>, AnalysisError> {
    if data.is_empty() {
        Err(AnalysisError::DataUnavailable(format!(
            "no {} returned for {}",
            what, instrument
        )))
    } else {
        Ok(data)
    }
}

/// Cached access to market data, shared by every dimension task of a run.
pub struct DataFacade {
    source: Arc<dyn MarketDataSource>,
    bars_cache: SingleFlightCache<Vec<Bar>>,
    financials_cache: SingleFlightCache<Vec<Financials>>,
    news_cache: SingleFlightCache<Vec<NewsArticle>>,
    price_history_days: i64,
    news_limit: u32,
}

impl DataFacade {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        ttl: Duration,
        price_history_days: i64,
        news_limit: u32,
    ) -> Self {
        Self {
            source,
            bars_cache: SingleFlightCache::new(ttl),
            financials_cache: SingleFlightCache::new(ttl),
            news_cache: SingleFlightCache::new(ttl),
            price_history_days,
            news_limit,
        }
    }

    pub async fn health_check(&self) -> Result<(), AnalysisError> {
        self.source
            .health_check()
            .await
            .map_err(|e| AnalysisError::FacadeUnreachable(e.to_string()))
    }

    /// Daily bars, oldest first. An empty series is `DataUnavailable`.
    pub async fn price_series(
        &self,
        instrument: &InstrumentId,
        days_back: i64,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let key = format!("bars:{}:{}", instrument, days_back);
        let source = &self.source;
        self.bars_cache
            .get_or_fetch(&key, move || async move {
                let bars = source.get_price_series(instrument, days_back).await?;
                require_data(bars, "price bars", instrument)
            })
            .await
    }

    pub async fn fundamentals(&self, instrument: &InstrumentId) -> Result<Vec<Financials>, AnalysisError> {
        let key = format!("fundamentals:{}", instrument);
        let source = &self.source;
        self.financials_cache
            .get_or_fetch(&key, move || async move {
                let financials = source.get_fundamentals(instrument).await?;
                require_data(financials, "financial statements", instrument)
            })
            .await
    }

    pub async fn news(
        &self,
        instrument: &InstrumentId,
        limit: u32,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        let key = format!("news:{}:{}", instrument, limit);
        let source = &self.source;
        self.news_cache
            .get_or_fetch(&key, move || async move {
                let news = source.get_news(instrument, limit).await?;
                require_data(news, "news", instrument)
            })
            .await
    }

    /// Fetch what one dimension needs. Fundamentals borrow the latest close
    /// from the shared price series when it is available.
    pub async fn load_input(
        &self,
        dimension: Dimension,
        instrument: &InstrumentId,
    ) -> Result<DimensionInput, AnalysisError> {
        match dimension {
            Dimension::Technical => {
                let bars = self.price_series(instrument, self.price_history_days).await?;
                Ok(DimensionInput::Technical { bars })
            }
            Dimension::Fundamental => {
                let (financials, bars) = tokio::join!(
                    self.fundamentals(instrument),
                    self.price_series(instrument, self.price_history_days),
                );
                let current_price = bars.ok().and_then(|b| b.last().map(|bar| bar.close));
                Ok(DimensionInput::Fundamental {
                    financials: financials?,
                    current_price,
                })
            }
            Dimension::Sentiment => {
                let news = self.news(instrument, self.news_limit).await?;
                Ok(DimensionInput::Sentiment { news })
            }
        }
    }

    pub fn price_history_days(&self) -> i64 {
        self.price_history_days
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_bars, StubSource};
    use std::sync::atomic::Ordering;

    fn facade(source: Arc<StubSource>) -> DataFacade {
        DataFacade::new(source, Duration::from_secs(300), 365, 50)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_fetch() {
        let source = Arc::new(StubSource::new().with_delay(Duration::from_millis(100)));
        let facade = Arc::new(facade(Arc::clone(&source)));
        let id = InstrumentId::from("AAPL");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let facade = Arc::clone(&facade);
            let id = id.clone();
            handles.push(tokio::spawn(async move { facade.price_series(&id, 365).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(source.bar_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let source = Arc::new(StubSource::new());
        let facade = facade(Arc::clone(&source));
        let id = InstrumentId::from("AAPL");

        facade.price_series(&id, 365).await.unwrap();
        facade.price_series(&id, 365).await.unwrap();
        assert_eq!(source.bar_calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        facade.price_series(&id, 365).await.unwrap();
        assert_eq!(source.bar_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let source = Arc::new(StubSource::new().failing_news());
        let facade = facade(Arc::clone(&source));
        let id = InstrumentId::from("AAPL");

        assert!(facade.news(&id, 50).await.is_err());
        assert!(facade.news(&id, 50).await.is_err());
        assert_eq!(source.news_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_upstream_is_data_unavailable() {
        let source = Arc::new(StubSource::new().without_fundamentals());
        let facade = facade(source);
        let err = facade
            .load_input(Dimension::Fundamental, &InstrumentId::from("AAPL"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_fundamental_input_carries_latest_close() {
        let source = Arc::new(StubSource::new());
        let facade = facade(Arc::clone(&source));
        let input = facade
            .load_input(Dimension::Fundamental, &InstrumentId::from("AAPL"))
            .await
            .unwrap();
        let expected = sample_bars(120).last().map(|b| b.close);
        match input {
            DimensionInput::Fundamental { current_price, .. } => assert_eq!(current_price, expected),
            other => panic!("unexpected input {:?}", other),
        }
    }
}
