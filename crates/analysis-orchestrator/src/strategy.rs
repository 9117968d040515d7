use analysis_core::{
    AnalysisError, Dimension, DimensionInput, DimensionStrategy, ExecutionPath, InstrumentId,
    RawOutput, RuleExecutor, StrategyOutput,
};
use async_trait::async_trait;
use ml_client::{ModelProvider, OutputSchema};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::Instant;

/// Most recent bars included in a model context
const CONTEXT_BARS: usize = 120;
/// Quarterly statements included in a model context
const CONTEXT_QUARTERS: usize = 8;

/// Deterministic strategy over already-fetched data.
pub struct RuleBasedStrategy {
    executor: Arc<dyn RuleExecutor>,
}

impl RuleBasedStrategy {
    pub fn new(executor: Arc<dyn RuleExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl DimensionStrategy for RuleBasedStrategy {
    fn path(&self) -> ExecutionPath {
        ExecutionPath::RuleBased
    }

    async fn execute(
        &self,
        instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<StrategyOutput, AnalysisError> {
        let output = self.executor.evaluate(instrument, input)?;
        Ok(StrategyOutput {
            raw: RawOutput::Rule(output),
            usage: None,
        })
    }
}

/// Strategy delegating to an external reasoning provider. Only output that
/// passes the dimension's schema leaves this type.
pub struct ModelBackedStrategy {
    provider: Arc<dyn ModelProvider>,
    schema: OutputSchema,
}

impl ModelBackedStrategy {
    pub fn new(provider: Arc<dyn ModelProvider>, dimension: Dimension) -> Self {
        Self {
            provider,
            schema: OutputSchema::for_dimension(dimension),
        }
    }
}

/// Compact structured context for a provider call.
pub fn build_context(instrument: &InstrumentId, input: &DimensionInput) -> Value {
    let data = match input {
        DimensionInput::Technical { bars } => {
            let start = bars.len().saturating_sub(CONTEXT_BARS);
            let rows: Vec<Value> = bars[start..]
                .iter()
                .map(|b| {
                    json!([
                        b.timestamp.format("%Y-%m-%d").to_string(),
                        b.open,
                        b.high,
                        b.low,
                        b.close,
                        b.volume
                    ])
                })
                .collect();
            json!({
                "columns": ["date", "open", "high", "low", "close", "volume"],
                "bars": rows,
            })
        }
        DimensionInput::Fundamental {
            financials,
            current_price,
        } => {
            let quarters: Vec<Value> = financials
                .iter()
                .take(CONTEXT_QUARTERS)
                .map(|f| {
                    json!({
                        "period": format!("{} {}", f.fiscal_period, f.fiscal_year),
                        "revenue": f.revenue,
                        "gross_profit": f.gross_profit,
                        "operating_income": f.operating_income,
                        "net_income": f.net_income,
                        "eps": f.eps,
                        "total_assets": f.total_assets,
                        "total_liabilities": f.total_liabilities,
                        "shareholders_equity": f.shareholders_equity,
                        "cash_flow_operating": f.cash_flow_operating,
                    })
                })
                .collect();
            json!({ "current_price": current_price, "quarters": quarters })
        }
        DimensionInput::Sentiment { news } => {
            let articles: Vec<Value> = news
                .iter()
                .map(|a| {
                    json!({
                        "published": a.published_utc.to_rfc3339(),
                        "title": a.title,
                        "description": a.description,
                        "tickers": a.tickers,
                    })
                })
                .collect();
            json!({ "articles": articles })
        }
    };

    json!({
        "instrument": instrument.as_str(),
        "dimension": input.dimension(),
        "data": data,
    })
}

#[async_trait]
impl DimensionStrategy for ModelBackedStrategy {
    fn path(&self) -> ExecutionPath {
        ExecutionPath::ModelBacked
    }

    async fn execute(
        &self,
        instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<StrategyOutput, AnalysisError> {
        let context = build_context(instrument, input);
        let started = Instant::now();
        let response = self
            .provider
            .invoke(self.schema.dimension, &context, &self.schema)
            .await
            .map_err(|e| {
                e.into_analysis_error(self.schema.dimension, started.elapsed().as_millis() as u64)
            })?;

        let output = self.schema.validate(&response.output).map_err(|e| {
            tracing::warn!(
                "Rejected {} output for {} from {} provider ({} tokens spent): {}",
                self.schema.dimension,
                instrument,
                self.provider.backend_name(),
                response.usage.total(),
                e
            );
            e
        })?;

        Ok(StrategyOutput {
            raw: RawOutput::Model(output),
            usage: Some(response.usage),
        })
    }
}
