use async_trait::async_trait;

use crate::{
    AnalysisError, Bar, BatchMetadata, Dimension, DimensionInput, ExecutionPath, Financials,
    InstrumentId, NewsArticle, RuleOutput, StrategyOutput, UnifiedAnalysisResult,
};

/// Upstream market data behind the data access facade
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_price_series(
        &self,
        instrument: &InstrumentId,
        days_back: i64,
    ) -> Result<Vec<Bar>, AnalysisError>;

    async fn get_fundamentals(&self, instrument: &InstrumentId)
        -> Result<Vec<Financials>, AnalysisError>;

    async fn get_news(
        &self,
        instrument: &InstrumentId,
        limit: u32,
    ) -> Result<Vec<NewsArticle>, AnalysisError>;

    /// Probe run before a batch starts. A failure here is fatal for the run.
    async fn health_check(&self) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// Deterministic evaluator for a single dimension over already-fetched data
pub trait RuleExecutor: Send + Sync {
    fn dimension(&self) -> Dimension;

    fn evaluate(
        &self,
        instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<RuleOutput, AnalysisError>;
}

/// One way of computing a dimension. Rule-based and model-backed
/// implementations are interchangeable behind this interface.
#[async_trait]
pub trait DimensionStrategy: Send + Sync {
    fn path(&self) -> ExecutionPath;

    async fn execute(
        &self,
        instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<StrategyOutput, AnalysisError>;
}

/// System of record for synthesized results
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn store(
        &self,
        result: &UnifiedAnalysisResult,
        batch: &BatchMetadata,
    ) -> Result<String, AnalysisError>;
}
