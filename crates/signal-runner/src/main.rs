use std::sync::Arc;

use analysis_core::{Dimension, InstrumentId, PipelineConfig, RunState};
use analysis_orchestrator::{AnalysisPipeline, SqlitePersistence};
use anyhow::{bail, Context, Result};
use ml_client::MLConfig;
use polygon_client::PolygonClient;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let instruments: Vec<InstrumentId> = std::env::args()
        .skip(1)
        .map(|arg| arg.trim().to_uppercase())
        .filter(|arg| !arg.is_empty())
        .map(InstrumentId::from)
        .collect();
    if instruments.is_empty() {
        bail!("usage: signal-runner <INSTRUMENT>...");
    }

    let config = PipelineConfig::from_env().context("invalid pipeline configuration")?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Mode: {:?} (fallback: {})", config.mode, config.fallback_enabled);
    tracing::info!(
        "  Weights: fundamental {:.2} / technical {:.2} / sentiment {:.2}",
        config.weights.get(Dimension::Fundamental),
        config.weights.get(Dimension::Technical),
        config.weights.get(Dimension::Sentiment)
    );
    tracing::info!("  Max concurrency: {}", config.max_concurrency);
    tracing::info!("  Pre-filter: {:?}", config.prefilter);

    let api_key = std::env::var("POLYGON_API_KEY").context("POLYGON_API_KEY must be set")?;
    let mut pipeline = AnalysisPipeline::new(Arc::new(PolygonClient::new(api_key)));

    let ml_config = MLConfig::from_env();
    match ml_config
        .build_provider()
        .context("failed to build model provider")?
    {
        Some(provider) => {
            tracing::info!("Model provider configured at {:?}", ml_config.provider_url);
            match provider.health().await {
                Ok(true) => tracing::info!("Model provider healthy"),
                Ok(false) => {
                    tracing::warn!("Model provider reports unhealthy; expect rule-based fallbacks")
                }
                Err(e) => {
                    tracing::warn!("Model provider unreachable ({}); expect rule-based fallbacks", e)
                }
            }
            pipeline = pipeline.with_model_provider(Arc::new(provider));
        }
        None => tracing::info!("No model provider configured; rule-based strategies only"),
    }

    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        let sink = SqlitePersistence::connect(&database_url)
            .await
            .with_context(|| format!("failed to open {}", database_url))?;
        tracing::info!("Persisting results to {}", database_url);
        pipeline = pipeline.with_persistence(Arc::new(sink));
    }

    let result = pipeline.run_batch(&instruments, Arc::new(config)).await;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to serialize batch result")?
    );

    if result.state == RunState::Failed {
        bail!(
            "batch {} failed: {}",
            result.batch_id,
            result.run_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
