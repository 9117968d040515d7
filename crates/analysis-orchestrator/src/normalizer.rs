use analysis_core::{
    AnalysisError, Dimension, DimensionIndicators, DimensionResult, ExecutionPath, RawOutput,
};

/// Maps either strategy's raw output onto the canonical `DimensionResult`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultNormalizer;

impl ResultNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(
        &self,
        raw: RawOutput,
        path: ExecutionPath,
        dimension: Dimension,
    ) -> Result<DimensionResult, AnalysisError> {
        match (raw, path) {
            (RawOutput::Rule(rule), ExecutionPath::RuleBased) => {
                check_indicators(&rule.indicators, dimension)?;
                let score = finite(rule.sub_score, "rule sub-score")?.clamp(0.0, 100.0);
                let confidence = rule
                    .confidence
                    .map(|c| finite(c, "rule confidence").map(|c| c.clamp(0.0, 100.0)))
                    .transpose()?;
                Ok(DimensionResult {
                    dimension,
                    score: Some(score),
                    confidence,
                    key_findings: rule.findings,
                    indicators: rule.indicators,
                    reasoning: None,
                    path,
                    high_risk: rule.high_risk,
                    error: None,
                    fallback_reason: None,
                })
            }
            (RawOutput::Model(model), ExecutionPath::ModelBacked) => {
                check_indicators(&model.indicators, dimension)?;
                // Schema validation already bounded both values
                Ok(DimensionResult {
                    dimension,
                    score: Some(model.score),
                    confidence: Some(model.confidence),
                    key_findings: model.key_findings,
                    indicators: model.indicators,
                    reasoning: Some(model.reasoning),
                    path,
                    high_risk: model.high_risk,
                    error: None,
                    fallback_reason: None,
                })
            }
            (_, path) => Err(AnalysisError::StrategyValidation(format!(
                "{} output does not match execution path {}",
                dimension, path
            ))),
        }
    }
}

fn finite(value: f64, what: &str) -> Result<f64, AnalysisError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AnalysisError::StrategyValidation(format!("{} is not finite", what)))
    }
}

fn check_indicators(indicators: &DimensionIndicators, dimension: Dimension) -> Result<(), AnalysisError> {
    let found = indicators.dimension();
    if found != dimension {
        return Err(AnalysisError::StrategyValidation(format!(
            "{} indicators returned for {} dimension",
            found, dimension
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{ModelOutput, RuleOutput, TechnicalIndicators};

    fn rule_output(sub_score: f64) -> RuleOutput {
        RuleOutput {
            sub_score,
            confidence: Some(55.0),
            findings: vec!["+ Uptrend".to_string()],
            indicators: DimensionIndicators::Technical(TechnicalIndicators {
                rsi: Some(48.0),
                ..Default::default()
            }),
            high_risk: false,
        }
    }

    #[test]
    fn test_rule_output_maps_fields() {
        let result = ResultNormalizer::new()
            .normalize(
                RawOutput::Rule(rule_output(64.0)),
                ExecutionPath::RuleBased,
                Dimension::Technical,
            )
            .unwrap();
        assert_eq!(result.score, Some(64.0));
        assert_eq!(result.confidence, Some(55.0));
        assert_eq!(result.path, ExecutionPath::RuleBased);
        assert!(result.reasoning.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_rule_score_is_clamped() {
        let result = ResultNormalizer::new()
            .normalize(
                RawOutput::Rule(rule_output(104.0)),
                ExecutionPath::RuleBased,
                Dimension::Technical,
            )
            .unwrap();
        assert_eq!(result.score, Some(100.0));
    }

    #[test]
    fn test_nan_score_is_rejected() {
        let err = ResultNormalizer::new()
            .normalize(
                RawOutput::Rule(rule_output(f64::NAN)),
                ExecutionPath::RuleBased,
                Dimension::Technical,
            )
            .unwrap_err();
        assert!(matches!(err, AnalysisError::StrategyValidation(_)));
    }

    #[test]
    fn test_model_output_keeps_reasoning() {
        let model = ModelOutput {
            score: 81.0,
            confidence: 90.0,
            key_findings: vec!["Margins expanding".to_string()],
            reasoning: "Profitability improving".to_string(),
            indicators: DimensionIndicators::empty(Dimension::Fundamental),
            high_risk: false,
        };
        let result = ResultNormalizer::new()
            .normalize(
                RawOutput::Model(model),
                ExecutionPath::ModelBacked,
                Dimension::Fundamental,
            )
            .unwrap();
        assert_eq!(result.reasoning.as_deref(), Some("Profitability improving"));
        assert_eq!(result.path, ExecutionPath::ModelBacked);
    }

    #[test]
    fn test_mismatched_dimension_is_rejected() {
        let err = ResultNormalizer::new().normalize(
            RawOutput::Rule(rule_output(50.0)),
            ExecutionPath::RuleBased,
            Dimension::Sentiment,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_mismatched_path_is_rejected() {
        let err = ResultNormalizer::new().normalize(
            RawOutput::Rule(rule_output(50.0)),
            ExecutionPath::ModelBacked,
            Dimension::Technical,
        );
        assert!(err.is_err());
    }
}
