pub mod error;
pub mod provider;
pub mod schema;

pub use error::{MLError, MLResult};
pub use provider::{HttpModelProvider, ModelProvider, ModelResponse};
pub use schema::OutputSchema;

use std::time::Duration;

/// Configuration for the reasoning provider
#[derive(Debug, Clone)]
pub struct MLConfig {
    /// Unset means model-backed strategies are not configured
    pub provider_url: Option<String>,
    pub timeout: Duration,
}

impl MLConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let provider_url = std::env::var("MODEL_PROVIDER_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let timeout_ms = std::env::var("MODEL_PROVIDER_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30_000);

        Self {
            provider_url,
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Build the HTTP provider when a URL is configured.
    pub fn build_provider(&self) -> MLResult<Option<HttpModelProvider>> {
        match &self.provider_url {
            Some(url) => Ok(Some(HttpModelProvider::new(url.clone(), self.timeout)?)),
            None => Ok(None),
        }
    }
}

impl Default for MLConfig {
    fn default() -> Self {
        Self {
            provider_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}
