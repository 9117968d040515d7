use analysis_core::{Dimension, TokenUsage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{MLError, MLResult};
use crate::schema::OutputSchema;

/// Raw structure returned by a reasoning provider, prior to schema validation.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub output: Value,
    pub usage: TokenUsage,
}

/// Backend-agnostic interface for schema-constrained model inference.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn invoke(
        &self,
        dimension: Dimension,
        context: &Value,
        schema: &OutputSchema,
    ) -> MLResult<ModelResponse>;

    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Serialize)]
struct ReasonRequest<'a> {
    dimension: Dimension,
    context: &'a Value,
    output_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ReasonResponse {
    output: Value,
    #[serde(default)]
    usage: TokenUsage,
}

/// HTTP-backed provider posting to a reasoning microservice.
#[derive(Clone)]
pub struct HttpModelProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModelProvider {
    pub fn new(base_url: String, timeout: Duration) -> MLResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Check service health
    pub async fn health(&self) -> MLResult<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| if e.is_timeout() { MLError::Timeout } else { MLError::RequestFailed(e) })?;

        Ok(response.status().is_success())
    }
}

#[async_trait]
impl ModelProvider for HttpModelProvider {
    async fn invoke(
        &self,
        dimension: Dimension,
        context: &Value,
        schema: &OutputSchema,
    ) -> MLResult<ModelResponse> {
        let request = ReasonRequest {
            dimension,
            context,
            output_schema: schema.to_json_schema(),
        };

        let response = self
            .client
            .post(format!("{}/v1/reason", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { MLError::Timeout } else { MLError::RequestFailed(e) })?;

        if !response.status().is_success() {
            return Err(MLError::ServiceUnavailable(format!(
                "Status: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        let parsed: ReasonResponse = serde_json::from_str(&body)
            .map_err(|e| MLError::InvalidResponse(format!("malformed provider envelope: {}", e)))?;

        tracing::debug!(
            dimension = %dimension,
            prompt_tokens = parsed.usage.prompt_tokens,
            completion_tokens = parsed.usage.completion_tokens,
            "Model provider responded"
        );

        Ok(ModelResponse {
            output: parsed.output,
            usage: parsed.usage,
        })
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let provider =
            HttpModelProvider::new("http://localhost:8010/".to_string(), Duration::from_secs(1))
                .unwrap();
        assert_eq!(provider.base_url, "http://localhost:8010");
        assert_eq!(provider.backend_name(), "http");
    }

    #[test]
    fn test_envelope_defaults_usage() {
        let parsed: ReasonResponse =
            serde_json::from_str(r#"{"output": {"score": 50}}"#).unwrap();
        assert_eq!(parsed.usage.total(), 0);
        assert_eq!(parsed.output["score"], 50);
    }

    #[tokio::test]
    async fn test_unreachable_provider_errors() {
        let provider =
            HttpModelProvider::new("http://127.0.0.1:9".to_string(), Duration::from_millis(200))
                .unwrap();
        let schema = OutputSchema::for_dimension(Dimension::Technical);
        let result = provider
            .invoke(Dimension::Technical, &serde_json::json!({}), &schema)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_health_reports_unreachable_service() {
        let provider =
            HttpModelProvider::new("http://127.0.0.1:9".to_string(), Duration::from_millis(200))
                .unwrap();
        assert!(provider.health().await.is_err());
    }
}
