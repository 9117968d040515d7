use analysis_core::{
    AnalysisError, AnalysisRequest, BatchEntry, BatchMetadata, BatchResult, Dimension,
    DimensionResult, DimensionStrategy, ErrorTag, ExecutionLogEntry, InstrumentFailure,
    InstrumentId, MarketDataSource, PersistenceSink, PipelineConfig, PrefilterStrategy,
    RuleExecutor, RunState, UnifiedAnalysisResult,
};
use chrono::Utc;
use ml_client::ModelProvider;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::Instant;

use crate::context::RunContext;
use crate::data::DataFacade;
use crate::hybrid::{DimensionStrategies, HybridCoordinator};
use crate::screener::Prefilter;
use crate::strategy::{ModelBackedStrategy, RuleBasedStrategy};
use crate::synthesis::SignalSynthesizer;

/// Everything one instrument task needs, shared by the whole run.
struct RunShared {
    coordinator: HybridCoordinator,
    synthesizer: SignalSynthesizer,
    config: Arc<PipelineConfig>,
}

/// Completed work for one instrument.
struct InstrumentReport {
    entry: BatchEntry,
    log: Vec<ExecutionLogEntry>,
    fallbacks: usize,
}

/// Drives a batch: pre-filter, concurrent per-instrument analysis,
/// synthesis, persistence and aggregate statistics.
pub struct AnalysisPipeline {
    source: Arc<dyn MarketDataSource>,
    strategies: BTreeMap<Dimension, DimensionStrategies>,
    persistence: Option<Arc<dyn PersistenceSink>>,
}

impl AnalysisPipeline {
    /// Pipeline with the built-in rule engines for every dimension.
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            strategies: BTreeMap::new(),
            persistence: None,
        }
        .with_rule_executor(Arc::new(technical_analysis::TechnicalAnalysisEngine::new()))
        .with_rule_executor(Arc::new(fundamental_analysis::FundamentalAnalysisEngine::new()))
        .with_rule_executor(Arc::new(sentiment_analysis::SentimentAnalysisEngine::new()))
    }

    /// Replace the rule-based strategy for the executor's dimension.
    pub fn with_rule_executor(mut self, executor: Arc<dyn RuleExecutor>) -> Self {
        let dimension = executor.dimension();
        let rule_based: Arc<dyn DimensionStrategy> = Arc::new(RuleBasedStrategy::new(executor));
        match self.strategies.get_mut(&dimension) {
            Some(entry) => entry.rule_based = rule_based,
            None => {
                self.strategies.insert(
                    dimension,
                    DimensionStrategies {
                        rule_based,
                        model_backed: None,
                    },
                );
            }
        }
        self
    }

    /// Register a model-backed strategy for every dimension.
    pub fn with_model_provider(mut self, provider: Arc<dyn ModelProvider>) -> Self {
        for (dimension, entry) in self.strategies.iter_mut() {
            entry.model_backed = Some(Arc::new(ModelBackedStrategy::new(
                Arc::clone(&provider),
                *dimension,
            )));
        }
        self
    }

    /// Register an arbitrary model-backed strategy for one dimension.
    pub fn with_model_strategy(
        mut self,
        dimension: Dimension,
        strategy: Arc<dyn DimensionStrategy>,
    ) -> Self {
        if let Some(entry) = self.strategies.get_mut(&dimension) {
            entry.model_backed = Some(strategy);
        }
        self
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    /// Sole entry point: analyze every instrument and report the batch.
    pub async fn run_batch(&self, instruments: &[InstrumentId], config: Arc<PipelineConfig>) -> BatchResult {
        let started = Instant::now();
        let context = Arc::new(RunContext::new(config.token_budget));
        let run_deadline = started + config.run_timeout();
        let metadata = BatchMetadata {
            batch_id: context.batch_id().to_string(),
            started_at: context.started_at(),
            mode: config.mode,
        };

        // Duplicates would double-count; keep the first occurrence
        let mut seen = HashSet::new();
        let instruments: Vec<InstrumentId> = instruments
            .iter()
            .filter(|id| seen.insert((*id).clone()))
            .cloned()
            .collect();

        tracing::info!(
            "Starting batch {} over {} instruments (mode: {:?}, fallback: {})",
            metadata.batch_id,
            instruments.len(),
            config.mode,
            config.fallback_enabled
        );

        let facade = Arc::new(DataFacade::new(
            Arc::clone(&self.source),
            Duration::from_secs(config.cache_ttl_secs.max(0) as u64),
            config.price_history_days,
            config.news_limit,
        ));

        let mut builder = BatchBuilder::new(metadata.clone(), instruments.len());

        if let Err(e) = facade.health_check().await {
            tracing::error!("Data facade unreachable, aborting batch: {}", e);
            for id in &instruments {
                builder.fail(id.clone(), &e);
            }
            builder.state = RunState::Failed;
            builder.run_error = Some(e.to_string());
            return builder.finish(&context, started);
        }

        // SCANNING
        let selected = if config.prefilter != PrefilterStrategy::None {
            builder.transition(RunState::Scanning);
            let prefilter = Prefilter::new(Arc::clone(&facade), config.max_concurrency);
            match tokio::time::timeout_at(run_deadline, prefilter.scan(config.prefilter, &instruments)).await {
                Ok(outcome) => {
                    builder.filtered_out = outcome.filtered_out;
                    outcome.selected
                }
                Err(_) => {
                    let err = AnalysisError::RunTimeout(config.run_timeout_ms);
                    tracing::error!("Run timed out during pre-filter");
                    for id in &instruments {
                        builder.fail(id.clone(), &err);
                    }
                    builder.state = RunState::Failed;
                    builder.run_error = Some(err.to_string());
                    return builder.finish(&context, started);
                }
            }
        } else {
            instruments.clone()
        };
        builder.attempted = selected.len();

        // ANALYZING + SYNTHESIZING
        builder.transition(RunState::Analyzing);
        let shared = Arc::new(RunShared {
            coordinator: HybridCoordinator::new(
                self.strategies.clone(),
                Arc::clone(&facade),
                Arc::clone(&context),
            ),
            synthesizer: SignalSynthesizer::from_config(&config),
            config: Arc::clone(&config),
        });

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut task_index: HashMap<task::Id, usize> = HashMap::new();
        for (index, id) in selected.iter().enumerate() {
            let shared = Arc::clone(&shared);
            let sem = Arc::clone(&semaphore);
            let id = id.clone();
            let handle = tasks.spawn(async move {
                let _permit = sem.acquire_owned().await;
                analyze_instrument(shared, id).await
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<InstrumentReport>> = (0..selected.len()).map(|_| None).collect();
        let mut pending: HashSet<usize> = (0..selected.len()).collect();
        let mut writes = JoinSet::new();
        let mut late_log = Vec::new();
        let mut timed_out = false;
        builder.transition(RunState::Synthesizing);

        loop {
            match tokio::time::timeout_at(run_deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((task_id, report)))) => {
                    let Some(index) = task_index.get(&task_id).copied() else {
                        continue;
                    };
                    pending.remove(&index);
                    if let (Some(sink), BatchEntry::Analyzed(result)) = (&self.persistence, &report.entry) {
                        writes.spawn(persist(
                            Arc::clone(sink),
                            result.clone(),
                            metadata.clone(),
                            config.persistence_timeout(),
                        ));
                    }
                    slots[index] = Some(report);
                }
                Ok(Some(Err(e))) => {
                    tracing::error!("Instrument task error: {}", e);
                    if let Some(index) = task_index.get(&e.id()) {
                        pending.remove(index);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::error!(
                        "Run timeout after {}ms, cancelling {} instruments",
                        config.run_timeout_ms,
                        pending.len()
                    );
                    tasks.abort_all();
                    // Let cancelled tasks drop so their attempt logs are handed back
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok(late) = joined {
                            late_log.extend(late.log);
                        }
                    }
                    timed_out = true;
                    break;
                }
            }
        }

        while let Some(written) = writes.join_next().await {
            match written {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!("{}", e);
                    context.record_persistence_failure();
                }
                Err(e) => {
                    tracing::warn!("Persistence task error: {}", e);
                    context.record_persistence_failure();
                }
            }
        }

        let run_timeout = AnalysisError::RunTimeout(config.run_timeout_ms);
        for (index, slot) in slots.into_iter().enumerate() {
            let id = selected[index].clone();
            match slot {
                Some(report) => builder.push(report),
                None if timed_out && pending.contains(&index) => builder.fail(id, &run_timeout),
                None => builder.fail_tag(id, ErrorTag::TaskAborted, "instrument task aborted".to_string()),
            }
        }
        builder.execution_log.extend(late_log);
        builder.execution_log.extend(context.take_cancelled());

        if timed_out {
            builder.state = RunState::Failed;
            builder.run_error = Some(run_timeout.to_string());
        } else {
            builder.transition(RunState::Done);
        }
        builder.finish(&context, started)
    }
}

/// Store one result under its own timeout.
async fn persist(
    sink: Arc<dyn PersistenceSink>,
    result: UnifiedAnalysisResult,
    metadata: BatchMetadata,
    limit: Duration,
) -> Result<String, AnalysisError> {
    match tokio::time::timeout(limit, sink.store(&result, &metadata)).await {
        Ok(Ok(key)) => Ok(key),
        Ok(Err(e)) => Err(AnalysisError::PersistenceFailure(format!(
            "failed to persist analysis for {}: {}",
            result.instrument, e
        ))),
        Err(_) => Err(AnalysisError::PersistenceFailure(format!(
            "persisting analysis for {} exceeded {}ms",
            result.instrument,
            limit.as_millis()
        ))),
    }
}

/// Run the three dimensions concurrently against the instrument deadline
/// and synthesize.
async fn analyze_instrument(shared: Arc<RunShared>, id: InstrumentId) -> InstrumentReport {
    let request = AnalysisRequest::new(id, &shared.config);
    let deadline = Instant::now() + request.instrument_timeout;

    let coordinator = &shared.coordinator;
    let (technical, fundamental, sentiment) = tokio::join!(
        coordinator.execute_dimension_until(Dimension::Technical, &request, deadline),
        coordinator.execute_dimension_until(Dimension::Fundamental, &request, deadline),
        coordinator.execute_dimension_until(Dimension::Sentiment, &request, deadline),
    );

    let mut results: Vec<DimensionResult> = Vec::with_capacity(Dimension::ALL.len());
    let mut log = Vec::new();
    let mut fallbacks = 0;
    for outcome in [technical, fundamental, sentiment] {
        if outcome.fell_back {
            fallbacks += 1;
        }
        log.extend(outcome.log);
        results.push(outcome.result);
    }

    let entry = match shared.synthesizer.synthesize(&request, results, Utc::now()) {
        Ok(result) => {
            tracing::info!(
                "{}: score {} confidence {:.0} -> {}",
                result.instrument,
                result.overall_score,
                result.overall_confidence,
                result.tier
            );
            BatchEntry::Analyzed(result)
        }
        Err(e) => {
            tracing::warn!("{} not scored: {}", request.instrument, e);
            BatchEntry::Failed(InstrumentFailure {
                instrument: request.instrument.clone(),
                reason: e.tag(),
                detail: e.to_string(),
            })
        }
    };

    InstrumentReport {
        entry,
        log,
        fallbacks,
    }
}

/// Accumulates the batch report in input order.
struct BatchBuilder {
    metadata: BatchMetadata,
    state: RunState,
    run_error: Option<String>,
    entries: Vec<BatchEntry>,
    attempted: usize,
    fallback_triggered: usize,
    filtered_out: Vec<InstrumentId>,
    execution_log: Vec<ExecutionLogEntry>,
}

impl BatchBuilder {
    fn new(metadata: BatchMetadata, attempted: usize) -> Self {
        Self {
            metadata,
            state: RunState::Analyzing,
            run_error: None,
            entries: Vec::new(),
            attempted,
            fallback_triggered: 0,
            filtered_out: Vec::new(),
            execution_log: Vec::new(),
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::info!("Batch {}: {:?} -> {:?}", self.metadata.batch_id, self.state, next);
        self.state = next;
    }

    fn push(&mut self, report: InstrumentReport) {
        self.fallback_triggered += report.fallbacks;
        self.execution_log.extend(report.log);
        self.entries.push(report.entry);
    }

    fn fail(&mut self, instrument: InstrumentId, err: &AnalysisError) {
        self.fail_tag(instrument, err.tag(), err.to_string());
    }

    fn fail_tag(&mut self, instrument: InstrumentId, reason: ErrorTag, detail: String) {
        self.entries.push(BatchEntry::Failed(InstrumentFailure {
            instrument,
            reason,
            detail,
        }));
    }

    fn finish(self, context: &RunContext, started: Instant) -> BatchResult {
        let mut failure_reasons: BTreeMap<ErrorTag, usize> = BTreeMap::new();
        let mut succeeded = 0;
        for entry in &self.entries {
            match entry {
                BatchEntry::Analyzed(_) => succeeded += 1,
                BatchEntry::Failed(f) => *failure_reasons.entry(f.reason).or_insert(0) += 1,
            }
        }
        let failed = self.entries.len() - succeeded;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let usage = context.token_usage();
        tracing::info!(
            "Batch {} finished {:?}: {}/{} analyzed, {} failed, {} fallbacks, {} model calls ({} prompt / {} completion tokens), {}ms",
            self.metadata.batch_id,
            self.state,
            succeeded,
            self.attempted,
            failed,
            self.fallback_triggered,
            context.model_calls(),
            usage.prompt_tokens,
            usage.completion_tokens,
            elapsed_ms
        );

        BatchResult {
            batch_id: self.metadata.batch_id,
            state: self.state,
            run_error: self.run_error,
            entries: self.entries,
            attempted: self.attempted,
            succeeded,
            failed,
            fallback_triggered: self.fallback_triggered,
            failure_reasons,
            filtered_out: self.filtered_out,
            persistence_failures: context.persistence_failures(),
            execution_log: self.execution_log,
            started_at: self.metadata.started_at,
            elapsed_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{bars_from, MemorySink, ScriptedProvider, StubSource};
    use analysis_core::{AttemptOutcome, DimensionInput, ExecutionMode, ExecutionPath, RuleOutput, Tier};
    use technical_analysis::TechnicalAnalysisEngine;

    fn config() -> PipelineConfig {
        PipelineConfig {
            strategy_timeout_ms: 1_000,
            instrument_timeout_ms: 5_000,
            run_timeout_ms: 60_000,
            ..PipelineConfig::default()
        }
    }

    fn ids(symbols: &[&str]) -> Vec<InstrumentId> {
        symbols.iter().map(|s| InstrumentId::from(*s)).collect()
    }

    #[tokio::test]
    async fn test_rule_only_batch_scores_every_instrument() {
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA", "BBB", "CCC"]), Arc::new(cfg)).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 0);
        assert_eq!(result.fallback_triggered, 0);
        let order: Vec<&str> = result.entries.iter().map(|e| e.instrument().as_str()).collect();
        assert_eq!(order, vec!["AAA", "BBB", "CCC"]);
        for analyzed in result.analyzed() {
            assert!(analyzed.overall_score <= 100);
            for dim in analyzed.dimensions.values() {
                assert_eq!(dim.path, ExecutionPath::RuleBased);
            }
        }
        assert_eq!(result.execution_log.len(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_falls_back_everywhere() {
        let provider =
            Arc::new(ScriptedProvider::valid(90.0, 90.0).with_delay(Duration::from_secs(10)));
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new())).with_model_provider(provider);
        let result = pipeline.run_batch(&ids(&["AAA", "BBB"]), Arc::new(config())).await;

        assert_eq!(result.succeeded, 2);
        assert_eq!(result.fallback_triggered, 6);
        for analyzed in result.analyzed() {
            assert!(analyzed
                .dimensions
                .values()
                .all(|d| d.path == ExecutionPath::RuleBased));
        }
    }

    #[tokio::test]
    async fn test_model_results_are_used_when_valid() {
        let provider = Arc::new(ScriptedProvider::valid(90.0, 90.0));
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new())).with_model_provider(provider);
        let result = pipeline.run_batch(&ids(&["AAA"]), Arc::new(config())).await;

        let analyzed: Vec<_> = result.analyzed().collect();
        assert_eq!(analyzed.len(), 1);
        assert_eq!(analyzed[0].overall_score, 90);
        assert_eq!(analyzed[0].tier, Tier::StrongBuy);
        assert_eq!(result.fallback_triggered, 0);
    }

    #[tokio::test]
    async fn test_instrument_without_any_data_is_reported_not_dropped() {
        let source = StubSource::new()
            .without_bars()
            .without_fundamentals()
            .without_news();
        let pipeline = AnalysisPipeline::new(Arc::new(source));
        let result = pipeline.run_batch(&ids(&["GONE"]), Arc::new(config())).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.failed, 1);
        let failures: Vec<_> = result.failures().collect();
        assert_eq!(failures[0].reason, ErrorTag::SynthesisImpossible);
        assert_eq!(result.failure_reasons.get(&ErrorTag::SynthesisImpossible), Some(&1));
        assert_eq!(result.analyzed().count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_facade_fails_the_run() {
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new().unhealthy()));
        let result = pipeline.run_batch(&ids(&["AAA", "BBB"]), Arc::new(config())).await;

        assert_eq!(result.state, RunState::Failed);
        assert!(result.run_error.is_some());
        assert_eq!(result.failed, 2);
        assert_eq!(result.failure_reasons.get(&ErrorTag::FacadeUnreachable), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_instrument_timeout_keeps_completed_dimensions() {
        // News hangs; price and fundamentals answer immediately
        let source = StubSource::new().with_news_delay(Duration::from_secs(30));
        let pipeline = AnalysisPipeline::new(Arc::new(source));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA"]), Arc::new(cfg)).await;

        let analyzed: Vec<_> = result.analyzed().collect();
        assert_eq!(analyzed.len(), 1);
        let sentiment = &analyzed[0].dimensions[&Dimension::Sentiment];
        assert!(!sentiment.is_present());
        assert_eq!(
            sentiment.error.as_ref().map(|f| f.tag),
            Some(ErrorTag::InstrumentTimeout)
        );
        assert!(analyzed[0].dimensions[&Dimension::Technical].is_present());

        let cut_off: Vec<_> = result
            .execution_log
            .iter()
            .filter(|e| e.dimension == Dimension::Sentiment)
            .collect();
        assert_eq!(cut_off.len(), 1);
        assert_eq!(cut_off[0].outcome, AttemptOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_marks_unfinished_instruments() {
        let source = StubSource::new().with_delay(Duration::from_secs(30));
        let pipeline = AnalysisPipeline::new(Arc::new(source));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            instrument_timeout_ms: 120_000,
            run_timeout_ms: 10_000,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA", "BBB"]), Arc::new(cfg)).await;

        assert_eq!(result.state, RunState::Failed);
        assert_eq!(result.failed, 2);
        assert_eq!(result.failure_reasons.get(&ErrorTag::RunTimeout), Some(&2));
        // Every dimension was still fetching when the run was cancelled
        assert_eq!(result.execution_log.len(), 6);
        assert!(result
            .execution_log
            .iter()
            .all(|e| e.outcome == AttemptOutcome::Timeout));
    }

    #[tokio::test]
    async fn test_results_are_persisted_and_failures_counted() {
        let sink = Arc::new(MemorySink::new());
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()))
            .with_persistence(sink.clone());
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA", "BBB"]), Arc::new(cfg.clone())).await;
        assert_eq!(sink.stored(), 2);
        assert_eq!(result.persistence_failures, 0);

        let failing = Arc::new(MemorySink::failing());
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()))
            .with_persistence(failing);
        let result = pipeline.run_batch(&ids(&["AAA"]), Arc::new(cfg)).await;
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.persistence_failures, 1);
    }

    #[tokio::test]
    async fn test_prefilter_reports_filtered_instruments() {
        let flat: Vec<f64> = (0..80).map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let mut surging = bars_from(&flat, 1_000.0);
        if let Some(last) = surging.last_mut() {
            last.volume = 10_000.0;
        }
        let source = StubSource::new()
            .with_bars_for("HOT", surging)
            .with_bars_for("COLD", bars_from(&flat, 1_000.0));
        let pipeline = AnalysisPipeline::new(Arc::new(source));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            prefilter: PrefilterStrategy::Volume { min_ratio: 2.0 },
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["COLD", "HOT"]), Arc::new(cfg)).await;

        assert_eq!(result.filtered_out, ids(&["COLD"]));
        assert_eq!(result.attempted, 1);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].instrument().as_str(), "HOT");
    }

    #[tokio::test]
    async fn test_duplicate_instruments_are_analyzed_once() {
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA", "AAA"]), Arc::new(cfg)).await;
        assert_eq!(result.attempted, 1);
        assert_eq!(result.entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_sink_does_not_cost_the_result() {
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()))
            .with_persistence(Arc::new(MemorySink::hanging()));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            run_timeout_ms: 10_000,
            persistence_timeout_ms: 2_000,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA"]), Arc::new(cfg)).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(result.persistence_failures, 1);
    }

    /// Technical rules that blow up on one symbol.
    struct PanicsOn(&'static str);

    impl RuleExecutor for PanicsOn {
        fn dimension(&self) -> Dimension {
            Dimension::Technical
        }

        fn evaluate(
            &self,
            instrument: &InstrumentId,
            input: &DimensionInput,
        ) -> Result<RuleOutput, AnalysisError> {
            if instrument.as_str() == self.0 {
                panic!("indicator overflow");
            }
            TechnicalAnalysisEngine::new().evaluate(instrument, input)
        }
    }

    #[tokio::test]
    async fn test_panicked_instrument_is_aborted_not_timed_out() {
        let pipeline = AnalysisPipeline::new(Arc::new(StubSource::new()))
            .with_rule_executor(Arc::new(PanicsOn("BAD")));
        let cfg = PipelineConfig {
            mode: ExecutionMode::RuleBasedOnly,
            ..config()
        };
        let result = pipeline.run_batch(&ids(&["AAA", "BAD", "CCC"]), Arc::new(cfg)).await;

        assert_eq!(result.state, RunState::Done);
        assert_eq!(result.succeeded, 2);
        assert_eq!(result.failure_reasons.get(&ErrorTag::TaskAborted), Some(&1));
        assert_eq!(result.failure_reasons.get(&ErrorTag::RunTimeout), None);
        assert_eq!(result.entries[1].instrument().as_str(), "BAD");
    }
}
