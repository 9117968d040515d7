use analysis_core::{AnalysisError, Dimension};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MLError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,
}

pub type MLResult<T> = Result<T, MLError>;

impl MLError {
    pub fn is_timeout(&self) -> bool {
        match self {
            MLError::Timeout => true,
            MLError::RequestFailed(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Classify a failed provider call for the dimension it served.
    pub fn into_analysis_error(self, dimension: Dimension, elapsed_ms: u64) -> AnalysisError {
        if self.is_timeout() {
            return AnalysisError::StrategyTimeout {
                dimension,
                elapsed_ms,
            };
        }
        match self {
            MLError::InvalidResponse(msg) => AnalysisError::StrategyValidation(msg),
            other => AnalysisError::StrategyFailed(other.to_string()),
        }
    }
}
