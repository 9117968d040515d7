//! Test doubles shared by the orchestrator's unit tests.

use analysis_core::{
    AnalysisError, AnalysisRequest, Bar, BatchMetadata, Dimension, Financials, InstrumentId,
    MarketDataSource, NewsArticle, PersistenceSink, PipelineConfig, TokenUsage,
    UnifiedAnalysisResult,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use ml_client::{MLError, MLResult, ModelProvider, ModelResponse, OutputSchema};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::hybrid::DimensionStrategies;
use crate::strategy::RuleBasedStrategy;

/// Gently rising zigzag series, oldest first.
pub fn sample_bars(n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| 100.0 + i as f64 * 0.3 + if i % 2 == 0 { 1.0 } else { -1.0 })
        .collect();
    bars_from(&closes, 1_000_000.0)
}

pub fn bars_from(closes: &[f64], volume: f64) -> Vec<Bar> {
    let start = Utc::now() - ChronoDuration::days(closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: start + ChronoDuration::days(i as i64),
            open: close * 0.995,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume,
        })
        .collect()
}

pub fn sample_financials(symbol: &str) -> Vec<Financials> {
    (0..8)
        .map(|q| {
            let scale = 1.0 + (8 - q) as f64 * 0.02;
            Financials {
                symbol: symbol.to_string(),
                fiscal_period: format!("Q{}", 4 - (q % 4)),
                fiscal_year: 2025 - (q / 4) as i32,
                revenue: Some(1_000.0 * scale),
                gross_profit: Some(450.0 * scale),
                operating_income: Some(220.0 * scale),
                net_income: Some(150.0 * scale),
                eps: Some(1.5 * scale),
                total_assets: Some(10_000.0),
                total_liabilities: Some(4_000.0),
                shareholders_equity: Some(6_000.0),
                cash_flow_operating: Some(180.0 * scale),
            }
        })
        .collect()
}

pub fn sample_news(symbol: &str) -> Vec<NewsArticle> {
    let titles = [
        "Company beats earnings expectations with record revenue",
        "Analysts upgrade shares after strong growth",
        "Company announces new product launch",
        "Shares slip as market weakens",
        "Company expands partnership with major retailer",
    ];
    let now = Utc::now();
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| NewsArticle {
            id: format!("{}-{}", symbol, i),
            title: title.to_string(),
            author: None,
            published_utc: now - ChronoDuration::hours(i as i64 * 6),
            article_url: format!("https://news.example/{}/{}", symbol, i),
            description: None,
            keywords: Vec::new(),
            tickers: vec![symbol.to_string()],
        })
        .collect()
}

/// In-memory market data with per-call counters and failure switches.
pub struct StubSource {
    pub bar_calls: AtomicUsize,
    pub news_calls: AtomicUsize,
    delay: Option<Duration>,
    news_delay: Option<Duration>,
    bars_override: HashMap<String, Vec<Bar>>,
    bars: bool,
    fundamentals: bool,
    news: bool,
    failing_news: bool,
    healthy: bool,
}

impl StubSource {
    pub fn new() -> Self {
        Self {
            bar_calls: AtomicUsize::new(0),
            news_calls: AtomicUsize::new(0),
            delay: None,
            news_delay: None,
            bars_override: HashMap::new(),
            bars: true,
            fundamentals: true,
            news: true,
            failing_news: false,
            healthy: true,
        }
    }

    /// Delay every data fetch; the health probe stays immediate.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_news_delay(mut self, delay: Duration) -> Self {
        self.news_delay = Some(delay);
        self
    }

    pub fn with_bars_for(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars_override.insert(symbol.to_string(), bars);
        self
    }

    pub fn without_bars(mut self) -> Self {
        self.bars = false;
        self
    }

    pub fn without_fundamentals(mut self) -> Self {
        self.fundamentals = false;
        self
    }

    pub fn without_news(mut self) -> Self {
        self.news = false;
        self
    }

    pub fn failing_news(mut self) -> Self {
        self.failing_news = true;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    async fn pause(&self, extra: Option<Duration>) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(extra) = extra {
            tokio::time::sleep(extra).await;
        }
    }
}

#[async_trait]
impl MarketDataSource for StubSource {
    async fn get_price_series(
        &self,
        instrument: &InstrumentId,
        _days_back: i64,
    ) -> Result<Vec<Bar>, AnalysisError> {
        self.bar_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(None).await;
        if !self.bars {
            return Ok(Vec::new());
        }
        Ok(self
            .bars_override
            .get(instrument.as_str())
            .cloned()
            .unwrap_or_else(|| sample_bars(120)))
    }

    async fn get_fundamentals(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Vec<Financials>, AnalysisError> {
        self.pause(None).await;
        if !self.fundamentals {
            return Ok(Vec::new());
        }
        Ok(sample_financials(instrument.as_str()))
    }

    async fn get_news(
        &self,
        instrument: &InstrumentId,
        _limit: u32,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        self.news_calls.fetch_add(1, Ordering::SeqCst);
        self.pause(self.news_delay).await;
        if self.failing_news {
            return Err(AnalysisError::ApiError("news endpoint returned 500".to_string()));
        }
        if !self.news {
            return Ok(Vec::new());
        }
        Ok(sample_news(instrument.as_str()))
    }

    async fn health_check(&self) -> Result<(), AnalysisError> {
        if self.healthy {
            Ok(())
        } else {
            Err(AnalysisError::ApiError("connection refused".to_string()))
        }
    }
}

/// Provider answering every call with the same scripted output.
pub struct ScriptedProvider {
    output: Option<Value>,
    delay: Option<Duration>,
    times_out: bool,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn returning(output: Value) -> Self {
        Self {
            output: Some(output),
            delay: None,
            times_out: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Schema-conforming output for any dimension.
    pub fn valid(score: f64, confidence: f64) -> Self {
        Self::returning(json!({
            "score": score,
            "confidence": confidence,
            "key_findings": ["Model finding"],
            "reasoning": "scripted",
            "high_risk": false,
            "indicators": null,
        }))
    }

    pub fn failing() -> Self {
        Self {
            output: None,
            delay: None,
            times_out: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails the way a provider's own client timeout does.
    pub fn timing_out() -> Self {
        Self {
            times_out: true,
            ..Self::failing()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn invoke(
        &self,
        _dimension: Dimension,
        _context: &Value,
        _schema: &OutputSchema,
    ) -> MLResult<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.times_out {
            return Err(MLError::Timeout);
        }
        match &self.output {
            Some(output) => Ok(ModelResponse {
                output: output.clone(),
                usage: TokenUsage {
                    prompt_tokens: 1_200,
                    completion_tokens: 300,
                },
            }),
            None => Err(MLError::ServiceUnavailable("scripted failure".to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

/// Sink that records stored results, fails every write, or never answers.
pub struct MemorySink {
    stored: Mutex<Vec<UnifiedAnalysisResult>>,
    fail: bool,
    hang: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            stored: Mutex::new(Vec::new()),
            fail: false,
            hang: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    pub fn stored(&self) -> usize {
        self.stored.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn store(
        &self,
        result: &UnifiedAnalysisResult,
        _batch: &BatchMetadata,
    ) -> Result<String, AnalysisError> {
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.fail {
            return Err(AnalysisError::PersistenceFailure("disk full".to_string()));
        }
        let mut stored = self
            .stored
            .lock()
            .map_err(|e| AnalysisError::PersistenceFailure(e.to_string()))?;
        stored.push(result.clone());
        Ok(format!("mem-{}", stored.len()))
    }
}

/// Built-in rule engines, no model-backed strategies.
pub fn rule_strategies() -> BTreeMap<Dimension, DimensionStrategies> {
    let executors: Vec<Arc<dyn analysis_core::RuleExecutor>> = vec![
        Arc::new(technical_analysis::TechnicalAnalysisEngine::new()),
        Arc::new(fundamental_analysis::FundamentalAnalysisEngine::new()),
        Arc::new(sentiment_analysis::SentimentAnalysisEngine::new()),
    ];
    executors
        .into_iter()
        .map(|executor| {
            let dimension = executor.dimension();
            (
                dimension,
                DimensionStrategies {
                    rule_based: Arc::new(RuleBasedStrategy::new(executor)),
                    model_backed: None,
                },
            )
        })
        .collect()
}

pub fn request_with(symbol: &str, config: PipelineConfig) -> AnalysisRequest {
    AnalysisRequest::new(InstrumentId::from(symbol), &config)
}
