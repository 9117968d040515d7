use analysis_core::{
    adaptive, AnalysisError, AnalysisRequest, Dimension, DimensionResult, DimensionWeights,
    ExecutionPath, PipelineConfig, Tier, TierThresholds, UnifiedAnalysisResult,
};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Weight of a missing confidence when ordering rationale findings
const DEFAULT_CONFIDENCE: f64 = 50.0;

/// Combines normalized dimension results into one scored recommendation.
///
/// Pure: the same inputs always produce the same output.
#[derive(Debug, Clone)]
pub struct SignalSynthesizer {
    weights: DimensionWeights,
    thresholds: TierThresholds,
    max_rationale_findings: usize,
}

impl SignalSynthesizer {
    pub fn new(
        weights: DimensionWeights,
        thresholds: TierThresholds,
        max_rationale_findings: usize,
    ) -> Self {
        Self {
            weights,
            thresholds,
            max_rationale_findings,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.weights, config.thresholds, config.max_rationale_findings)
    }

    pub fn synthesize(
        &self,
        request: &AnalysisRequest,
        results: Vec<DimensionResult>,
        completed_at: DateTime<Utc>,
    ) -> Result<UnifiedAnalysisResult, AnalysisError> {
        let dimensions: BTreeMap<Dimension, DimensionResult> =
            results.into_iter().map(|r| (r.dimension, r)).collect();

        // Iterate in dimension order so float sums do not depend on input order
        let present: Vec<(&DimensionResult, f64)> = dimensions
            .values()
            .filter_map(|r| r.score.map(|s| (r, s)))
            .collect();

        if present.is_empty() {
            let reasons: Vec<String> = dimensions
                .values()
                .map(|r| match &r.error {
                    Some(e) => format!("{}: {}", r.dimension, e.detail),
                    None => format!("{}: no result", r.dimension),
                })
                .collect();
            return Err(AnalysisError::SynthesisImpossible(format!(
                "no dimension produced a score for {} ({})",
                request.instrument,
                reasons.join("; ")
            )));
        }

        let weights = self.renormalized_weights(&present);
        let weighted: f64 = present
            .iter()
            .zip(&weights)
            .map(|((_, score), w)| w * score)
            .sum();
        let overall_score = weighted.round().clamp(0.0, 100.0) as u8;

        let overall_confidence = self.overall_confidence(&present);
        let high_risk = present.iter().any(|(r, _)| r.high_risk);
        let tier = self.classify(overall_score, overall_confidence, high_risk);
        let rationale = self.rationale(&present);

        Ok(UnifiedAnalysisResult {
            instrument: request.instrument.clone(),
            as_of: request.as_of,
            dimensions,
            overall_score,
            overall_confidence,
            tier,
            rationale,
            high_risk,
            requested_at: request.requested_at,
            completed_at,
        })
    }

    /// Base weights of the present dimensions, scaled to sum to 1.0.
    fn renormalized_weights(&self, present: &[(&DimensionResult, f64)]) -> Vec<f64> {
        let base: Vec<f64> = present
            .iter()
            .map(|(r, _)| self.weights.get(r.dimension))
            .collect();
        let total: f64 = base.iter().sum();
        if total > 0.0 {
            base.iter().map(|w| w / total).collect()
        } else {
            // Every present dimension carries zero base weight
            vec![1.0 / present.len() as f64; present.len()]
        }
    }

    /// Agreement and completeness in equal parts, averaged with any
    /// confidence reported by model-backed results.
    fn overall_confidence(&self, present: &[(&DimensionResult, f64)]) -> f64 {
        let scores: Vec<f64> = present.iter().map(|(_, s)| *s).collect();
        let dispersion = adaptive::population_std_dev(&scores);
        let agreement = (100.0 * (1.0 - dispersion / 50.0)).clamp(0.0, 100.0);
        let completeness = present.len() as f64 / Dimension::ALL.len() as f64 * 100.0;
        let structural = 0.5 * agreement + 0.5 * completeness;

        let model_confidences: Vec<f64> = present
            .iter()
            .filter(|(r, _)| r.path == ExecutionPath::ModelBacked)
            .filter_map(|(r, _)| r.confidence)
            .collect();

        let combined = if model_confidences.is_empty() {
            structural
        } else {
            (structural + adaptive::mean(&model_confidences)) / 2.0
        };
        combined.clamp(0.0, 100.0)
    }

    /// Strict comparisons throughout; risk overrides score.
    pub fn classify(&self, overall_score: u8, overall_confidence: f64, high_risk: bool) -> Tier {
        let score = overall_score as f64;
        let t = &self.thresholds;
        if score < t.avoid_score || high_risk {
            Tier::Avoid
        } else if score > t.buy_score && overall_confidence > t.buy_confidence {
            if score > t.strong_buy_score && overall_confidence > t.strong_buy_confidence {
                Tier::StrongBuy
            } else {
                Tier::Buy
            }
        } else {
            Tier::Hold
        }
    }

    fn rationale(&self, present: &[(&DimensionResult, f64)]) -> String {
        let mut ranked: Vec<&DimensionResult> = present.iter().map(|(r, _)| *r).collect();
        ranked.sort_by(|a, b| {
            let ka = self.weights.get(a.dimension) * a.confidence.unwrap_or(DEFAULT_CONFIDENCE);
            let kb = self.weights.get(b.dimension) * b.confidence.unwrap_or(DEFAULT_CONFIDENCE);
            kb.partial_cmp(&ka)
                .unwrap_or(Ordering::Equal)
                .then(a.dimension.cmp(&b.dimension))
        });

        let findings: Vec<String> = ranked
            .iter()
            .flat_map(|r| {
                r.key_findings
                    .iter()
                    .map(move |f| format!("{}: {}", r.dimension, f))
            })
            .take(self.max_rationale_findings)
            .collect();

        if findings.is_empty() {
            "No notable findings".to_string()
        } else {
            findings.join("; ")
        }
    }
}
