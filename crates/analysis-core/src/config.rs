use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AnalysisError;
use crate::types::{Dimension, ExecutionMode};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Base synthesis weights. Construction validates they sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawWeights")]
pub struct DimensionWeights {
    fundamental: f64,
    technical: f64,
    sentiment: f64,
}

#[derive(Deserialize)]
struct RawWeights {
    fundamental: f64,
    technical: f64,
    sentiment: f64,
}

impl TryFrom<RawWeights> for DimensionWeights {
    type Error = AnalysisError;

    fn try_from(raw: RawWeights) -> Result<Self, Self::Error> {
        DimensionWeights::new(raw.fundamental, raw.technical, raw.sentiment)
    }
}

impl DimensionWeights {
    pub fn new(fundamental: f64, technical: f64, sentiment: f64) -> Result<Self, AnalysisError> {
        for (name, w) in [
            ("fundamental", fundamental),
            ("technical", technical),
            ("sentiment", sentiment),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(AnalysisError::Config(format!(
                    "{} weight must be a non-negative number, got {}",
                    name, w
                )));
            }
        }
        let sum = fundamental + technical + sentiment;
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(AnalysisError::Config(format!(
                "dimension weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        Ok(Self {
            fundamental,
            technical,
            sentiment,
        })
    }

    pub fn get(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Fundamental => self.fundamental,
            Dimension::Technical => self.technical,
            Dimension::Sentiment => self.sentiment,
        }
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            fundamental: 0.35,
            technical: 0.35,
            sentiment: 0.30,
        }
    }
}

/// Tier classification bounds. All comparisons are strict.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub avoid_score: f64,
    pub buy_score: f64,
    pub buy_confidence: f64,
    pub strong_buy_score: f64,
    pub strong_buy_confidence: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            avoid_score: 40.0,
            buy_score: 70.0,
            buy_confidence: 60.0,
            strong_buy_score: 85.0,
            strong_buy_confidence: 80.0,
        }
    }
}

impl TierThresholds {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let all = [
            self.avoid_score,
            self.buy_score,
            self.buy_confidence,
            self.strong_buy_score,
            self.strong_buy_confidence,
        ];
        if all.iter().any(|v| !(0.0..=100.0).contains(v)) {
            return Err(AnalysisError::Config(
                "tier thresholds must lie within [0, 100]".to_string(),
            ));
        }
        if self.avoid_score > self.buy_score || self.buy_score > self.strong_buy_score {
            return Err(AnalysisError::Config(format!(
                "tier score thresholds out of order: avoid {} / buy {} / strong buy {}",
                self.avoid_score, self.buy_score, self.strong_buy_score
            )));
        }
        if self.buy_confidence > self.strong_buy_confidence {
            return Err(AnalysisError::Config(
                "buy confidence threshold exceeds strong buy threshold".to_string(),
            ));
        }
        Ok(())
    }
}

/// Selection rule applied before expensive analysis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PrefilterStrategy {
    None,
    /// Keep instruments whose latest daily return is an outlier
    Anomaly { z_threshold: f64 },
    /// Keep instruments trading above their recent average volume
    Volume { min_ratio: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub mode: ExecutionMode,
    pub fallback_enabled: bool,
    pub weights: DimensionWeights,
    pub thresholds: TierThresholds,
    pub max_rationale_findings: usize,
    pub strategy_timeout_ms: u64,
    pub instrument_timeout_ms: u64,
    pub run_timeout_ms: u64,
    /// Bound on each result write; a write past it counts as a persistence failure
    pub persistence_timeout_ms: u64,
    pub max_concurrency: usize,
    pub prefilter: PrefilterStrategy,
    pub price_history_days: i64,
    pub news_limit: u32,
    pub cache_ttl_secs: i64,
    pub token_budget: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Hybrid,
            fallback_enabled: true,
            weights: DimensionWeights::default(),
            thresholds: TierThresholds::default(),
            max_rationale_findings: 6,
            strategy_timeout_ms: 20_000,
            instrument_timeout_ms: 60_000,
            run_timeout_ms: 600_000,
            persistence_timeout_ms: 10_000,
            max_concurrency: 4,
            prefilter: PrefilterStrategy::None,
            price_history_days: 365,
            news_limit: 50,
            cache_ttl_secs: 300,
            token_budget: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, AnalysisError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AnalysisError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

impl PipelineConfig {
    /// Load from environment (after `.env`) and validate.
    pub fn from_env() -> Result<Self, AnalysisError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        let default_weights = DimensionWeights::default();
        let default_thresholds = TierThresholds::default();

        let weights = DimensionWeights::new(
            env_or("SIGNAL_WEIGHT_FUNDAMENTAL", default_weights.fundamental)?,
            env_or("SIGNAL_WEIGHT_TECHNICAL", default_weights.technical)?,
            env_or("SIGNAL_WEIGHT_SENTIMENT", default_weights.sentiment)?,
        )?;

        let thresholds = TierThresholds {
            avoid_score: env_or("SIGNAL_AVOID_SCORE", default_thresholds.avoid_score)?,
            buy_score: env_or("SIGNAL_BUY_SCORE", default_thresholds.buy_score)?,
            buy_confidence: env_or("SIGNAL_BUY_CONFIDENCE", default_thresholds.buy_confidence)?,
            strong_buy_score: env_or(
                "SIGNAL_STRONG_BUY_SCORE",
                default_thresholds.strong_buy_score,
            )?,
            strong_buy_confidence: env_or(
                "SIGNAL_STRONG_BUY_CONFIDENCE",
                default_thresholds.strong_buy_confidence,
            )?,
        };

        let prefilter = match env::var("SIGNAL_PREFILTER")
            .unwrap_or_else(|_| "none".to_string())
            .trim()
            .to_ascii_lowercase()
            .as_str()
        {
            "none" | "" => PrefilterStrategy::None,
            "anomaly" => PrefilterStrategy::Anomaly {
                z_threshold: env_or("SIGNAL_ANOMALY_Z", 2.0)?,
            },
            "volume" => PrefilterStrategy::Volume {
                min_ratio: env_or("SIGNAL_VOLUME_RATIO", 1.5)?,
            },
            other => {
                return Err(AnalysisError::Config(format!(
                    "unknown prefilter strategy '{}'",
                    other
                )))
            }
        };

        let token_budget = match env::var("SIGNAL_TOKEN_BUDGET") {
            Ok(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|e| AnalysisError::Config(format!("SIGNAL_TOKEN_BUDGET: {}", e)))?,
            ),
            Err(_) => None,
        };

        let config = Self {
            mode: env_or("SIGNAL_MODE", defaults.mode)?,
            fallback_enabled: env_or("SIGNAL_FALLBACK_ENABLED", defaults.fallback_enabled)?,
            weights,
            thresholds,
            max_rationale_findings: env_or(
                "SIGNAL_MAX_RATIONALE_FINDINGS",
                defaults.max_rationale_findings,
            )?,
            strategy_timeout_ms: env_or("SIGNAL_STRATEGY_TIMEOUT_MS", defaults.strategy_timeout_ms)?,
            instrument_timeout_ms: env_or(
                "SIGNAL_INSTRUMENT_TIMEOUT_MS",
                defaults.instrument_timeout_ms,
            )?,
            run_timeout_ms: env_or("SIGNAL_RUN_TIMEOUT_MS", defaults.run_timeout_ms)?,
            persistence_timeout_ms: env_or(
                "SIGNAL_PERSISTENCE_TIMEOUT_MS",
                defaults.persistence_timeout_ms,
            )?,
            max_concurrency: env_or("SIGNAL_MAX_CONCURRENCY", defaults.max_concurrency)?,
            prefilter,
            price_history_days: env_or("SIGNAL_PRICE_HISTORY_DAYS", defaults.price_history_days)?,
            news_limit: env_or("SIGNAL_NEWS_LIMIT", defaults.news_limit)?,
            cache_ttl_secs: env_or("SIGNAL_CACHE_TTL_SECS", defaults.cache_ttl_secs)?,
            token_budget,
        };

        config.validate()?;
        tracing::debug!(?config, "Pipeline configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.thresholds.validate()?;
        if self.max_concurrency == 0 {
            return Err(AnalysisError::Config(
                "SIGNAL_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.strategy_timeout_ms == 0
            || self.instrument_timeout_ms == 0
            || self.run_timeout_ms == 0
            || self.persistence_timeout_ms == 0
        {
            return Err(AnalysisError::Config("timeouts must be positive".to_string()));
        }
        if self.price_history_days <= 0 {
            return Err(AnalysisError::Config(
                "price history window must be positive".to_string(),
            ));
        }
        match self.prefilter {
            PrefilterStrategy::Anomaly { z_threshold } if !(z_threshold > 0.0) => Err(
                AnalysisError::Config("anomaly z threshold must be positive".to_string()),
            ),
            PrefilterStrategy::Volume { min_ratio } if !(min_ratio > 0.0) => Err(
                AnalysisError::Config("volume ratio must be positive".to_string()),
            ),
            _ => Ok(()),
        }
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }

    pub fn instrument_timeout(&self) -> Duration {
        Duration::from_millis(self.instrument_timeout_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn persistence_timeout(&self) -> Duration {
        Duration::from_millis(self.persistence_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = DimensionWeights::default();
        let sum: f64 = Dimension::ALL.iter().map(|d| w.get(*d)).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_weights_rejected_when_sum_is_off() {
        let err = DimensionWeights::new(0.4, 0.4, 0.4).unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
        assert!(DimensionWeights::new(-0.1, 0.6, 0.5).is_err());
    }

    #[test]
    fn test_weights_deserialize_through_validation() {
        let ok: DimensionWeights =
            serde_json::from_str(r#"{"fundamental":0.5,"technical":0.25,"sentiment":0.25}"#)
                .unwrap();
        assert_eq!(ok.get(Dimension::Fundamental), 0.5);

        let bad = serde_json::from_str::<DimensionWeights>(
            r#"{"fundamental":0.9,"technical":0.25,"sentiment":0.25}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_threshold_ordering_is_checked() {
        let thresholds = TierThresholds {
            buy_score: 90.0,
            ..Default::default()
        };
        assert!(thresholds.validate().is_err());
        assert!(TierThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.strategy_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = PipelineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_persistence_timeout_rejected() {
        let config = PipelineConfig {
            persistence_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(
            PipelineConfig::default().persistence_timeout(),
            Duration::from_secs(10)
        );
    }
}
