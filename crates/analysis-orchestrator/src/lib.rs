//! Batch signal pipeline: cached data access, hybrid rule/model strategy
//! execution per dimension, weighted synthesis and persistence.

pub mod context;
pub mod data;
pub mod hybrid;
pub mod normalizer;
pub mod persistence;
pub mod pipeline;
pub mod screener;
pub mod strategy;
pub mod synthesis;

#[cfg(test)]
mod testing;

pub use context::RunContext;
pub use data::{DataFacade, SingleFlightCache};
pub use hybrid::{DimensionOutcome, DimensionStrategies, HybridCoordinator};
pub use normalizer::ResultNormalizer;
pub use persistence::SqlitePersistence;
pub use pipeline::AnalysisPipeline;
pub use screener::{Prefilter, ScreenOutcome};
pub use strategy::{build_context, ModelBackedStrategy, RuleBasedStrategy};
pub use synthesis::SignalSynthesizer;
