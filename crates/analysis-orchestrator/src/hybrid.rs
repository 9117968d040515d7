use analysis_core::{
    AnalysisError, AnalysisRequest, AttemptOutcome, Dimension, DimensionFailure, DimensionInput,
    DimensionResult, DimensionStrategy, ErrorTag, ExecutionLogEntry, ExecutionMode, ExecutionPath,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::context::RunContext;
use crate::data::DataFacade;
use crate::normalizer::ResultNormalizer;

/// Strategies available for one dimension.
#[derive(Clone)]
pub struct DimensionStrategies {
    pub rule_based: Arc<dyn DimensionStrategy>,
    pub model_backed: Option<Arc<dyn DimensionStrategy>>,
}

/// Result of one dimension plus every attempt made to produce it.
#[derive(Debug, Clone)]
pub struct DimensionOutcome {
    pub result: DimensionResult,
    pub log: Vec<ExecutionLogEntry>,
    pub fell_back: bool,
}

/// Chooses and runs a strategy per dimension, applying the model timeout,
/// schema validation and rule-based fallback.
pub struct HybridCoordinator {
    strategies: BTreeMap<Dimension, DimensionStrategies>,
    facade: Arc<DataFacade>,
    context: Arc<RunContext>,
    normalizer: ResultNormalizer,
}

/// Attempts for one dimension. Whatever is still held when the log is
/// dropped, including an attempt in flight, goes to the run's cancelled list.
struct AttemptLog<'a> {
    request: &'a AnalysisRequest,
    dimension: Dimension,
    context: &'a RunContext,
    entries: Vec<ExecutionLogEntry>,
    in_flight: Option<(ExecutionPath, Instant)>,
}

impl<'a> AttemptLog<'a> {
    fn new(request: &'a AnalysisRequest, dimension: Dimension, context: &'a RunContext) -> Self {
        Self {
            request,
            dimension,
            context,
            entries: Vec::new(),
            in_flight: None,
        }
    }

    fn begin(&mut self, path: ExecutionPath) -> Instant {
        let started = Instant::now();
        self.in_flight = Some((path, started));
        started
    }

    fn push(
        &mut self,
        path: ExecutionPath,
        outcome: AttemptOutcome,
        started: Instant,
        detail: Option<String>,
    ) {
        self.in_flight = None;
        let attempt = self.entries.len() as u8 + 1;
        self.entries.push(ExecutionLogEntry {
            instrument: self.request.instrument.clone(),
            dimension: self.dimension,
            attempt,
            path,
            outcome,
            latency_ms: started.elapsed().as_millis() as u64,
            detail,
        });
    }

    /// Close the in-flight attempt as timed out; returns its path.
    fn cancel(&mut self, detail: String) -> Option<ExecutionPath> {
        let (path, started) = self.in_flight.take()?;
        self.push(path, AttemptOutcome::Timeout, started, Some(detail));
        Some(path)
    }

    fn finish(&mut self) -> Vec<ExecutionLogEntry> {
        self.in_flight = None;
        std::mem::take(&mut self.entries)
    }
}

impl Drop for AttemptLog<'_> {
    fn drop(&mut self) {
        self.cancel("dimension task cancelled".to_string());
        if !self.entries.is_empty() {
            self.context.record_cancelled(std::mem::take(&mut self.entries));
        }
    }
}

impl HybridCoordinator {
    pub fn new(
        mut strategies: BTreeMap<Dimension, DimensionStrategies>,
        facade: Arc<DataFacade>,
        context: Arc<RunContext>,
    ) -> Self {
        for (dimension, entry) in strategies.iter_mut() {
            if entry.rule_based.path() != ExecutionPath::RuleBased {
                tracing::warn!("{} fallback strategy is not rule-based", dimension);
            }
            let misplaced = entry
                .model_backed
                .as_ref()
                .is_some_and(|model| model.path() != ExecutionPath::ModelBacked);
            if misplaced {
                tracing::warn!(
                    "{} model slot holds a non-model strategy, running rules only",
                    dimension
                );
                entry.model_backed = None;
            }
        }
        Self {
            strategies,
            facade,
            context,
            normalizer: ResultNormalizer::new(),
        }
    }

    /// Path the coordinator would try first for this dimension and request.
    pub fn planned_path(&self, dimension: Dimension, request: &AnalysisRequest) -> ExecutionPath {
        match self.strategies.get(&dimension) {
            Some(s) if request.mode == ExecutionMode::Hybrid && s.model_backed.is_some() => {
                ExecutionPath::ModelBacked
            }
            _ => ExecutionPath::RuleBased,
        }
    }

    pub async fn execute_dimension(
        &self,
        dimension: Dimension,
        request: &AnalysisRequest,
    ) -> DimensionOutcome {
        let deadline = Instant::now() + request.instrument_timeout;
        self.execute_dimension_until(dimension, request, deadline).await
    }

    /// Run one dimension, giving up at `deadline`. An attempt cut off by the
    /// deadline is logged as a timeout and the dimension reported absent.
    pub async fn execute_dimension_until(
        &self,
        dimension: Dimension,
        request: &AnalysisRequest,
        deadline: Instant,
    ) -> DimensionOutcome {
        let mut log = AttemptLog::new(request, dimension, &self.context);
        let planned = self.planned_path(dimension, request);

        let finished =
            tokio::time::timeout_at(deadline, self.run_dimension(dimension, request, planned, &mut log))
                .await;
        match finished {
            Ok((result, fell_back)) => DimensionOutcome {
                result,
                log: log.finish(),
                fell_back,
            },
            Err(_) => {
                let budget_ms = request.instrument_timeout.as_millis();
                tracing::warn!(
                    "{} {} cancelled at the {}ms instrument deadline",
                    request.instrument,
                    dimension,
                    budget_ms
                );
                let path = log
                    .cancel(format!("cancelled after {}ms instrument budget", budget_ms))
                    .unwrap_or(planned);
                let failure = DimensionFailure {
                    tag: ErrorTag::InstrumentTimeout,
                    detail: format!("cancelled after {}ms instrument budget", budget_ms),
                };
                DimensionOutcome {
                    result: DimensionResult::absent(dimension, path, failure),
                    log: log.finish(),
                    fell_back: path != planned,
                }
            }
        }
    }

    /// Fetch, attempt and fall back. Returns the result and whether the
    /// planned model path was abandoned for rules.
    async fn run_dimension(
        &self,
        dimension: Dimension,
        request: &AnalysisRequest,
        planned: ExecutionPath,
        log: &mut AttemptLog<'_>,
    ) -> (DimensionResult, bool) {
        let Some(strategies) = self.strategies.get(&dimension) else {
            let err = AnalysisError::Config(format!("no strategy registered for {}", dimension));
            return (DimensionResult::absent(dimension, planned, DimensionFailure::from(&err)), false);
        };

        let fetch_started = log.begin(planned);
        let input = match self.facade.load_input(dimension, &request.instrument).await {
            Ok(input) => input,
            Err(e) => {
                tracing::info!("{} {} skipped: {}", request.instrument, dimension, e);
                log.push(planned, AttemptOutcome::from_error(&e), fetch_started, Some(e.to_string()));
                return (DimensionResult::absent(dimension, planned, DimensionFailure::from(&e)), false);
            }
        };

        if planned == ExecutionPath::ModelBacked {
            if let Some(model) = &strategies.model_backed {
                match self.try_model(model.as_ref(), dimension, request, &input, log).await {
                    Ok(result) => return (result, false),
                    Err(e) if request.fallback_enabled => {
                        tracing::warn!(
                            "{} {} model-backed attempt failed, falling back to rules: {}",
                            request.instrument,
                            dimension,
                            e
                        );
                        self.context.record_fallback();
                        let mut result = self
                            .run_rules(strategies.rule_based.as_ref(), dimension, request, &input, log)
                            .await;
                        result.fallback_reason = Some(DimensionFailure::from(&e));
                        return (result, true);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "{} {} model-backed attempt failed, fallback disabled: {}",
                            request.instrument,
                            dimension,
                            e
                        );
                        let path = model.path();
                        return (DimensionResult::absent(dimension, path, DimensionFailure::from(&e)), false);
                    }
                }
            }
        }

        let result = self
            .run_rules(strategies.rule_based.as_ref(), dimension, request, &input, log)
            .await;
        (result, false)
    }

    async fn try_model(
        &self,
        strategy: &dyn DimensionStrategy,
        dimension: Dimension,
        request: &AnalysisRequest,
        input: &DimensionInput,
        log: &mut AttemptLog<'_>,
    ) -> Result<DimensionResult, AnalysisError> {
        let path = strategy.path();
        let started = log.begin(path);

        let attempt = async {
            if !self.context.budget_available() {
                return Err(AnalysisError::BudgetExhausted);
            }
            let output =
                match tokio::time::timeout(request.strategy_timeout, strategy.execute(&request.instrument, input))
                    .await
                {
                    Ok(output) => output?,
                    Err(_) => {
                        return Err(AnalysisError::StrategyTimeout {
                            dimension,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        })
                    }
                };
            if let Some(usage) = &output.usage {
                self.context.record_usage(usage);
            }
            self.normalizer.normalize(output.raw, path, dimension)
        };

        match attempt.await {
            Ok(result) => {
                log.push(path, AttemptOutcome::Success, started, None);
                Ok(result)
            }
            Err(e) => {
                let outcome = match &e {
                    // Provider-side data errors are still provider failures
                    AnalysisError::DataUnavailable(_) | AnalysisError::ApiError(_) => {
                        AttemptOutcome::ProviderError
                    }
                    other => AttemptOutcome::from_error(other),
                };
                log.push(path, outcome, started, Some(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run_rules(
        &self,
        strategy: &dyn DimensionStrategy,
        dimension: Dimension,
        request: &AnalysisRequest,
        input: &DimensionInput,
        log: &mut AttemptLog<'_>,
    ) -> DimensionResult {
        let path = strategy.path();
        let started = log.begin(path);
        let result = match strategy.execute(&request.instrument, input).await {
            Ok(output) => self.normalizer.normalize(output.raw, path, dimension),
            Err(e) => Err(e),
        };

        match result {
            Ok(result) => {
                log.push(path, AttemptOutcome::Success, started, None);
                result
            }
            Err(e) => {
                tracing::info!("{} {} rule-based evaluation failed: {}", request.instrument, dimension, e);
                log.push(path, AttemptOutcome::from_error(&e), started, Some(e.to_string()));
                DimensionResult::absent(dimension, path, DimensionFailure::from(&e))
            }
        }
    }

    pub fn context(&self) -> &Arc<RunContext> {
        &self.context
    }
}
