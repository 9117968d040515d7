use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::AnalysisError;

/// Exchange-qualified ticker. Opaque key everywhere past the data source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for InstrumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Company financials for one fiscal period, newest first when in a list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Financials {
    pub symbol: String,
    pub fiscal_period: String,
    pub fiscal_year: i32,
    pub revenue: Option<f64>,
    pub gross_profit: Option<f64>,
    pub operating_income: Option<f64>,
    pub net_income: Option<f64>,
    pub eps: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_liabilities: Option<f64>,
    pub shareholders_equity: Option<f64>,
    pub cash_flow_operating: Option<f64>,
}

/// News article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub published_utc: DateTime<Utc>,
    pub article_url: String,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub tickers: Vec<String>,
}

/// One analysis axis producing an independent score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Technical,
    Fundamental,
    Sentiment,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [
        Dimension::Technical,
        Dimension::Fundamental,
        Dimension::Sentiment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Technical => "technical",
            Dimension::Fundamental => "fundamental",
            Dimension::Sentiment => "sentiment",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Hybrid,
    RuleBasedOnly,
}

impl FromStr for ExecutionMode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hybrid" => Ok(ExecutionMode::Hybrid),
            "rule_based_only" | "rule-based-only" | "rules" => Ok(ExecutionMode::RuleBasedOnly),
            other => Err(AnalysisError::Config(format!("unknown execution mode '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    RuleBased,
    ModelBacked,
}

impl fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionPath::RuleBased => f.write_str("rule_based"),
            ExecutionPath::ModelBacked => f.write_str("model_backed"),
        }
    }
}

/// Outcome of a single strategy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    ValidationError,
    ProviderError,
    BudgetExhausted,
    InsufficientData,
    DataUnavailable,
}

impl AttemptOutcome {
    pub fn from_error(err: &AnalysisError) -> Self {
        match err {
            AnalysisError::StrategyTimeout { .. } => AttemptOutcome::Timeout,
            AnalysisError::StrategyValidation(_) => AttemptOutcome::ValidationError,
            AnalysisError::BudgetExhausted => AttemptOutcome::BudgetExhausted,
            AnalysisError::InsufficientDataForRule(_) => AttemptOutcome::InsufficientData,
            AnalysisError::DataUnavailable(_) | AnalysisError::ApiError(_) => {
                AttemptOutcome::DataUnavailable
            }
            _ => AttemptOutcome::ProviderError,
        }
    }
}

/// Serializable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    DataUnavailable,
    StrategyTimeout,
    StrategyValidation,
    StrategyFailed,
    BudgetExhausted,
    InsufficientDataForRule,
    InstrumentTimeout,
    SynthesisImpossible,
    PersistenceFailure,
    RunTimeout,
    FacadeUnreachable,
    TaskAborted,
    Config,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionFailure {
    pub tag: ErrorTag,
    pub detail: String,
}

impl From<&AnalysisError> for DimensionFailure {
    fn from(err: &AnalysisError) -> Self {
        Self {
            tag: err.tag(),
            detail: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalIndicators {
    pub last_close: Option<f64>,
    pub rsi: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub bollinger_percent_b: Option<f64>,
    pub stochastic_k: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub drawdown_from_high: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FundamentalIndicators {
    pub pe_ratio: Option<f64>,
    pub debt_to_equity: Option<f64>,
    pub roe: Option<f64>,
    pub profit_margin: Option<f64>,
    pub operating_margin: Option<f64>,
    pub revenue_growth: Option<f64>,
    pub current_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentimentIndicators {
    pub article_count: Option<u32>,
    pub positive_articles: Option<u32>,
    pub negative_articles: Option<u32>,
    pub avg_sentiment: Option<f64>,
    pub direct_mention_ratio: Option<f64>,
}

/// Typed indicator fields, one shape per dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionIndicators {
    Technical(TechnicalIndicators),
    Fundamental(FundamentalIndicators),
    Sentiment(SentimentIndicators),
}

impl DimensionIndicators {
    /// Empty indicator shape for a dimension.
    pub fn empty(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Technical => DimensionIndicators::Technical(TechnicalIndicators::default()),
            Dimension::Fundamental => {
                DimensionIndicators::Fundamental(FundamentalIndicators::default())
            }
            Dimension::Sentiment => DimensionIndicators::Sentiment(SentimentIndicators::default()),
        }
    }

    pub fn dimension(&self) -> Dimension {
        match self {
            DimensionIndicators::Technical(_) => Dimension::Technical,
            DimensionIndicators::Fundamental(_) => Dimension::Fundamental,
            DimensionIndicators::Sentiment(_) => Dimension::Sentiment,
        }
    }
}

/// Already-fetched data handed to a strategy
#[derive(Debug, Clone)]
pub enum DimensionInput {
    Technical {
        bars: Vec<Bar>,
    },
    Fundamental {
        financials: Vec<Financials>,
        current_price: Option<f64>,
    },
    Sentiment {
        news: Vec<NewsArticle>,
    },
}

impl DimensionInput {
    pub fn dimension(&self) -> Dimension {
        match self {
            DimensionInput::Technical { .. } => Dimension::Technical,
            DimensionInput::Fundamental { .. } => Dimension::Fundamental,
            DimensionInput::Sentiment { .. } => Dimension::Sentiment,
        }
    }
}

/// Raw rule-based output: indicator fields plus a computed sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutput {
    pub sub_score: f64, // 0 to 100
    pub confidence: Option<f64>,
    pub findings: Vec<String>,
    pub indicators: DimensionIndicators,
    pub high_risk: bool,
}

/// Schema-validated model-backed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    pub score: f64,
    pub confidence: f64,
    pub key_findings: Vec<String>,
    pub reasoning: String,
    pub indicators: DimensionIndicators,
    #[serde(default)]
    pub high_risk: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    Rule(RuleOutput),
    Model(ModelOutput),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// What a strategy hands back to the coordinator
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    pub raw: RawOutput,
    pub usage: Option<TokenUsage>,
}

/// Canonical per-dimension result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResult {
    pub dimension: Dimension,
    /// 0 to 100; `None` means no data, never zero
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub key_findings: Vec<String>,
    pub indicators: DimensionIndicators,
    #[serde(default)]
    pub reasoning: Option<String>,
    pub path: ExecutionPath,
    #[serde(default)]
    pub high_risk: bool,
    #[serde(default)]
    pub error: Option<DimensionFailure>,
    /// Why the model-backed attempt was abandoned, when fallback ran
    #[serde(default)]
    pub fallback_reason: Option<DimensionFailure>,
}

impl DimensionResult {
    /// A result carrying no score and the failure that caused it.
    pub fn absent(dimension: Dimension, path: ExecutionPath, error: DimensionFailure) -> Self {
        Self {
            dimension,
            score: None,
            confidence: None,
            key_findings: Vec::new(),
            indicators: DimensionIndicators::empty(dimension),
            reasoning: None,
            path,
            high_risk: false,
            error: Some(error),
            fallback_reason: None,
        }
    }

    pub fn is_present(&self) -> bool {
        self.score.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub instrument: InstrumentId,
    pub dimension: Dimension,
    pub attempt: u8,
    pub path: ExecutionPath,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Final discrete recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    StrongBuy,
    Buy,
    Hold,
    Avoid,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::StrongBuy => "Strong Buy",
            Tier::Buy => "Buy",
            Tier::Hold => "Hold",
            Tier::Avoid => "Avoid",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-instrument analysis request, created once per batch run
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub instrument: InstrumentId,
    pub as_of: NaiveDate,
    pub mode: ExecutionMode,
    pub fallback_enabled: bool,
    pub strategy_timeout: Duration,
    pub instrument_timeout: Duration,
    pub requested_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(instrument: InstrumentId, config: &PipelineConfig) -> Self {
        let requested_at = Utc::now();
        Self {
            instrument,
            as_of: requested_at.date_naive(),
            mode: config.mode,
            fallback_enabled: config.fallback_enabled,
            strategy_timeout: config.strategy_timeout(),
            instrument_timeout: config.instrument_timeout(),
            requested_at,
        }
    }
}

/// Combined analysis across all dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedAnalysisResult {
    pub instrument: InstrumentId,
    pub as_of: NaiveDate,
    pub dimensions: BTreeMap<Dimension, DimensionResult>,
    pub overall_score: u8,
    pub overall_confidence: f64, // 0 to 100
    pub tier: Tier,
    pub rationale: String,
    pub high_risk: bool,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Scanning,
    Analyzing,
    Synthesizing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFailure {
    pub instrument: InstrumentId,
    pub reason: ErrorTag,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchEntry {
    Analyzed(UnifiedAnalysisResult),
    Failed(InstrumentFailure),
}

impl BatchEntry {
    pub fn instrument(&self) -> &InstrumentId {
        match self {
            BatchEntry::Analyzed(result) => &result.instrument,
            BatchEntry::Failed(failure) => &failure.instrument,
        }
    }
}

/// Batch-level metadata handed to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub batch_id: String,
    pub started_at: DateTime<Utc>,
    pub mode: ExecutionMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub state: RunState,
    #[serde(default)]
    pub run_error: Option<String>,
    pub entries: Vec<BatchEntry>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Dimension results whose authoritative path came from fallback
    pub fallback_triggered: usize,
    pub failure_reasons: BTreeMap<ErrorTag, usize>,
    pub filtered_out: Vec<InstrumentId>,
    pub persistence_failures: usize,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl BatchResult {
    pub fn analyzed(&self) -> impl Iterator<Item = &UnifiedAnalysisResult> {
        self.entries.iter().filter_map(|entry| match entry {
            BatchEntry::Analyzed(result) => Some(result),
            BatchEntry::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &InstrumentFailure> {
        self.entries.iter().filter_map(|entry| match entry {
            BatchEntry::Failed(failure) => Some(failure),
            BatchEntry::Analyzed(_) => None,
        })
    }
}
