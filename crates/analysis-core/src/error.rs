use thiserror::Error;

use crate::types::{Dimension, ErrorTag};

#[derive(Error, Debug, Clone)]
pub enum AnalysisError {
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{dimension} strategy timed out after {elapsed_ms}ms")]
    StrategyTimeout { dimension: Dimension, elapsed_ms: u64 },

    #[error("Strategy output failed validation: {0}")]
    StrategyValidation(String),

    #[error("Strategy provider error: {0}")]
    StrategyFailed(String),

    #[error("Model budget exhausted")]
    BudgetExhausted,

    #[error("Insufficient data for rule: {0}")]
    InsufficientDataForRule(String),

    #[error("Synthesis impossible: {0}")]
    SynthesisImpossible(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Run timed out after {0}ms")]
    RunTimeout(u64),

    #[error("Data access facade unreachable: {0}")]
    FacadeUnreachable(String),
}

impl AnalysisError {
    /// Serializable classification carried on results and batch entries.
    pub fn tag(&self) -> ErrorTag {
        match self {
            AnalysisError::DataUnavailable(_) => ErrorTag::DataUnavailable,
            AnalysisError::StrategyTimeout { .. } => ErrorTag::StrategyTimeout,
            AnalysisError::StrategyValidation(_) => ErrorTag::StrategyValidation,
            AnalysisError::StrategyFailed(_) => ErrorTag::StrategyFailed,
            AnalysisError::BudgetExhausted => ErrorTag::BudgetExhausted,
            AnalysisError::InsufficientDataForRule(_) => ErrorTag::InsufficientDataForRule,
            AnalysisError::SynthesisImpossible(_) => ErrorTag::SynthesisImpossible,
            AnalysisError::PersistenceFailure(_) => ErrorTag::PersistenceFailure,
            AnalysisError::Config(_) => ErrorTag::Config,
            AnalysisError::ApiError(_) => ErrorTag::DataUnavailable,
            AnalysisError::RunTimeout(_) => ErrorTag::RunTimeout,
            AnalysisError::FacadeUnreachable(_) => ErrorTag::FacadeUnreachable,
        }
    }
}
