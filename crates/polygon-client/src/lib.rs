use analysis_core::{AnalysisError, Bar, Financials, InstrumentId, MarketDataSource, NewsArticle};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";
const MAX_RETRIES: u32 = 3;
const RETRY_WAIT: Duration = Duration::from_secs(15);

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            // Wait for the oldest request to leave the window
            let oldest = match ts.front() {
                Some(&front) => front,
                None => continue,
            };
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for Polygon API slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl PolygonClient {
    /// Requests per minute come from `POLYGON_RATE_LIMIT` (default 500; free tier should use 5).
    pub fn new(api_key: String) -> Self {
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);
        Self::with_base_url(api_key, BASE_URL.to_string(), rate_limit)
    }

    pub fn with_base_url(api_key: String, base_url: String, rate_limit: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
        }
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AnalysisError> {
        let request = builder
            .build()
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        for attempt in 0..MAX_RETRIES {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| AnalysisError::ApiError("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/{}",
                RETRY_WAIT.as_secs(),
                attempt + 1,
                MAX_RETRIES
            );
            tokio::time::sleep(RETRY_WAIT).await;
        }

        Err(AnalysisError::ApiError(format!(
            "Rate limited by Polygon after {} retries",
            MAX_RETRIES
        )))
    }

    async fn error_from(response: reqwest::Response) -> AnalysisError {
        AnalysisError::ApiError(format!(
            "HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        ))
    }

    /// Daily bars for a symbol, oldest first
    pub async fn get_aggregates(
        &self,
        symbol: &str,
        multiplier: u32,
        timespan: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/{}/{}/{}/{}",
            self.base_url,
            symbol,
            multiplier,
            timespan,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let agg_response: AggregateResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(agg_response.into_bars())
    }

    /// Quarterly financials, newest first
    pub async fn get_financials(&self, symbol: &str) -> Result<Vec<Financials>, AnalysisError> {
        let url = format!("{}/vX/reference/financials", self.base_url);

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("ticker", symbol),
                ("timeframe", "quarterly"),
                ("apiKey", self.api_key.as_str()),
                ("limit", "10"),
            ]))
            .await?;

        if !response.status().is_success() {
            // Plan without financials access
            if matches!(response.status().as_u16(), 401 | 403) {
                return Ok(Vec::new());
            }
            return Err(Self::error_from(response).await);
        }

        let fin_response: FinancialsResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(fin_response.into_financials(symbol))
    }

    pub async fn get_news(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        let url = format!("{}/v2/reference/news", self.base_url);

        let mut query = vec![
            ("apiKey", self.api_key.clone()),
            ("limit", limit.to_string()),
        ];
        if let Some(sym) = symbol {
            query.push(("ticker", sym.to_string()));
        }

        let response = self.send_request(self.client.get(&url).query(&query)).await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let news_response: NewsResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::ApiError(e.to_string()))?;

        Ok(news_response.into_articles())
    }

    /// Market status probe used as a reachability check.
    pub async fn market_status(&self) -> Result<(), AnalysisError> {
        let url = format!("{}/v1/marketstatus/now", self.base_url);
        let response = self
            .send_request(self.client.get(&url).query(&[("apiKey", self.api_key.as_str())]))
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }
}

#[async_trait]
impl MarketDataSource for PolygonClient {
    async fn get_price_series(
        &self,
        instrument: &InstrumentId,
        days_back: i64,
    ) -> Result<Vec<Bar>, AnalysisError> {
        let to = Utc::now();
        let from = to - ChronoDuration::days(days_back);
        self.get_aggregates(instrument.as_str(), 1, "day", from, to).await
    }

    async fn get_fundamentals(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Vec<Financials>, AnalysisError> {
        self.get_financials(instrument.as_str()).await
    }

    async fn get_news(
        &self,
        instrument: &InstrumentId,
        limit: u32,
    ) -> Result<Vec<NewsArticle>, AnalysisError> {
        PolygonClient::get_news(self, Some(instrument.as_str()), limit).await
    }

    async fn health_check(&self) -> Result<(), AnalysisError> {
        self.market_status().await
    }
}

// Response structures
#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp
    o: f64, // open
    h: f64, // high
    l: f64, // low
    c: f64, // close
    v: f64, // volume
}

impl AggregateResponse {
    fn into_bars(self) -> Vec<Bar> {
        self.results
            .into_iter()
            .filter_map(|r| {
                Some(Bar {
                    timestamp: DateTime::from_timestamp_millis(r.t)?,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: r.v,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct FinancialsResponse {
    #[serde(default)]
    results: Vec<FinancialResult>,
}

#[derive(Debug, Deserialize)]
struct FinancialResult {
    fiscal_period: String,
    fiscal_year: String,
    financials: FinancialStatements,
}

#[derive(Debug, Deserialize)]
struct FinancialStatements {
    #[serde(default)]
    income_statement: HashMap<String, serde_json::Value>,
    #[serde(default)]
    balance_sheet: HashMap<String, serde_json::Value>,
    #[serde(default)]
    cash_flow_statement: HashMap<String, serde_json::Value>,
}

fn statement_value(statement: &HashMap<String, serde_json::Value>, key: &str) -> Option<f64> {
    statement
        .get(key)
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_f64())
}

impl FinancialsResponse {
    fn into_financials(self, symbol: &str) -> Vec<Financials> {
        self.results
            .into_iter()
            .map(|r| {
                let income = r.financials.income_statement;
                let balance = r.financials.balance_sheet;
                let cash_flow = r.financials.cash_flow_statement;

                Financials {
                    symbol: symbol.to_string(),
                    fiscal_period: r.fiscal_period,
                    fiscal_year: r.fiscal_year.parse().unwrap_or(0),
                    revenue: statement_value(&income, "revenues"),
                    gross_profit: statement_value(&income, "gross_profit"),
                    operating_income: statement_value(&income, "operating_income_loss"),
                    net_income: statement_value(&income, "net_income_loss"),
                    eps: statement_value(&income, "basic_earnings_per_share"),
                    total_assets: statement_value(&balance, "assets"),
                    total_liabilities: statement_value(&balance, "liabilities"),
                    shareholders_equity: statement_value(&balance, "equity"),
                    cash_flow_operating: statement_value(
                        &cash_flow,
                        "net_cash_flow_from_operating_activities",
                    ),
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    results: Vec<NewsResult>,
}

#[derive(Debug, Deserialize)]
struct NewsResult {
    id: String,
    title: String,
    author: Option<String>,
    published_utc: String,
    article_url: String,
    description: Option<String>,
    keywords: Option<Vec<String>>,
    #[serde(default)]
    tickers: Vec<String>,
}

impl NewsResponse {
    fn into_articles(self) -> Vec<NewsArticle> {
        self.results
            .into_iter()
            .filter_map(|r| {
                // Undated articles cannot be weighted for recency
                let published_utc = DateTime::parse_from_rfc3339(&r.published_utc)
                    .ok()?
                    .with_timezone(&Utc);
                Some(NewsArticle {
                    id: r.id,
                    title: r.title,
                    author: r.author,
                    published_utc,
                    article_url: r.article_url,
                    description: r.description,
                    keywords: r.keywords.unwrap_or_default(),
                    tickers: r.tickers,
                })
            })
            .collect()
    }
}
