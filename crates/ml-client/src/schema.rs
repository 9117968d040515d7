use analysis_core::{
    AnalysisError, Dimension, DimensionIndicators, FundamentalIndicators, ModelOutput,
    SentimentIndicators, TechnicalIndicators,
};
use serde::Serialize;
use serde_json::{json, Map, Value};

const REQUIRED_FIELDS: &[&str] = &["score", "confidence", "key_findings", "reasoning"];

/// Fixed per-dimension output contract for model-backed strategies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSchema {
    pub dimension: Dimension,
    pub required: Vec<&'static str>,
    pub indicator_fields: Vec<&'static str>,
}

impl OutputSchema {
    pub fn for_dimension(dimension: Dimension) -> Self {
        let indicator_fields = match dimension {
            Dimension::Technical => vec![
                "last_close",
                "rsi",
                "macd_histogram",
                "sma_20",
                "sma_50",
                "bollinger_percent_b",
                "stochastic_k",
                "annualized_volatility",
                "drawdown_from_high",
            ],
            Dimension::Fundamental => vec![
                "pe_ratio",
                "debt_to_equity",
                "roe",
                "profit_margin",
                "operating_margin",
                "revenue_growth",
                "current_ratio",
            ],
            Dimension::Sentiment => vec![
                "article_count",
                "positive_articles",
                "negative_articles",
                "avg_sentiment",
                "direct_mention_ratio",
            ],
        };
        Self {
            dimension,
            required: REQUIRED_FIELDS.to_vec(),
            indicator_fields,
        }
    }

    /// JSON Schema sent alongside the context so the provider constrains its output.
    pub fn to_json_schema(&self) -> Value {
        let indicator_props: Map<String, Value> = self
            .indicator_fields
            .iter()
            .map(|f| (f.to_string(), json!({ "type": ["number", "null"] })))
            .collect();
        json!({
            "type": "object",
            "required": self.required,
            "properties": {
                "score": { "type": "number", "minimum": 0, "maximum": 100 },
                "confidence": { "type": "number", "minimum": 0, "maximum": 100 },
                "key_findings": { "type": "array", "items": { "type": "string" } },
                "reasoning": { "type": "string" },
                "high_risk": { "type": "boolean" },
                "indicators": { "type": "object", "properties": indicator_props },
            }
        })
    }

    /// Check a provider response and lift it into a typed output.
    ///
    /// Any missing field, wrong type or out-of-range number is a validation error.
    pub fn validate(&self, value: &Value) -> Result<ModelOutput, AnalysisError> {
        let obj = value.as_object().ok_or_else(|| {
            AnalysisError::StrategyValidation(format!(
                "{} output is not a JSON object",
                self.dimension
            ))
        })?;

        for field in &self.required {
            if !obj.contains_key(*field) {
                return Err(AnalysisError::StrategyValidation(format!(
                    "{} output missing required field '{}'",
                    self.dimension, field
                )));
            }
        }

        let score = bounded_number(obj, "score")?;
        let confidence = bounded_number(obj, "confidence")?;

        let key_findings = match obj.get("key_findings") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        AnalysisError::StrategyValidation(
                            "key_findings must contain only strings".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(AnalysisError::StrategyValidation(
                    "key_findings must be an array".to_string(),
                ))
            }
        };

        let reasoning = obj
            .get("reasoning")
            .and_then(Value::as_str)
            .ok_or_else(|| AnalysisError::StrategyValidation("reasoning must be a string".to_string()))?
            .to_string();

        let high_risk = match obj.get("high_risk") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(AnalysisError::StrategyValidation(
                    "high_risk must be a boolean".to_string(),
                ))
            }
        };

        let indicators = self.parse_indicators(obj.get("indicators"))?;

        Ok(ModelOutput {
            score,
            confidence,
            key_findings,
            reasoning,
            indicators,
            high_risk,
        })
    }

    fn parse_indicators(&self, raw: Option<&Value>) -> Result<DimensionIndicators, AnalysisError> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(DimensionIndicators::empty(self.dimension)),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => {
                return Err(AnalysisError::StrategyValidation(
                    "indicators must be an object".to_string(),
                ))
            }
        };
        let invalid = |e: serde_json::Error| {
            AnalysisError::StrategyValidation(format!("{} indicators: {}", self.dimension, e))
        };
        Ok(match self.dimension {
            Dimension::Technical => DimensionIndicators::Technical(
                serde_json::from_value::<TechnicalIndicators>(raw).map_err(invalid)?,
            ),
            Dimension::Fundamental => DimensionIndicators::Fundamental(
                serde_json::from_value::<FundamentalIndicators>(raw).map_err(invalid)?,
            ),
            Dimension::Sentiment => DimensionIndicators::Sentiment(
                serde_json::from_value::<SentimentIndicators>(raw).map_err(invalid)?,
            ),
        })
    }
}

fn bounded_number(obj: &Map<String, Value>, field: &str) -> Result<f64, AnalysisError> {
    let value = obj.get(field).and_then(Value::as_f64).ok_or_else(|| {
        AnalysisError::StrategyValidation(format!("'{}' must be numeric", field))
    })?;
    if !(0.0..=100.0).contains(&value) {
        return Err(AnalysisError::StrategyValidation(format!(
            "'{}' out of range: {}",
            field, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_technical() -> Value {
        json!({
            "score": 72.5,
            "confidence": 64,
            "key_findings": ["Price above 50-day average"],
            "reasoning": "Trend intact",
            "indicators": { "rsi": 55.0, "sma_50": 101.2 }
        })
    }

    #[test]
    fn test_accepts_conforming_output() {
        let schema = OutputSchema::for_dimension(Dimension::Technical);
        let out = schema.validate(&valid_technical()).unwrap();
        assert_eq!(out.score, 72.5);
        assert_eq!(out.confidence, 64.0);
        assert!(!out.high_risk);
        match out.indicators {
            DimensionIndicators::Technical(ind) => assert_eq!(ind.rsi, Some(55.0)),
            other => panic!("unexpected indicators {:?}", other),
        }
    }

    #[test]
    fn test_rejects_missing_field() {
        let schema = OutputSchema::for_dimension(Dimension::Technical);
        let mut value = valid_technical();
        value.as_object_mut().unwrap().remove("reasoning");
        assert!(matches!(
            schema.validate(&value),
            Err(AnalysisError::StrategyValidation(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let schema = OutputSchema::for_dimension(Dimension::Fundamental);
        let mut value = valid_technical();
        value["score"] = json!(140);
        value["indicators"] = json!({});
        assert!(schema.validate(&value).is_err());
    }

    #[test]
    fn test_rejects_textual_score() {
        let schema = OutputSchema::for_dimension(Dimension::Sentiment);
        let mut value = valid_technical();
        value["score"] = json!("seventy");
        value["indicators"] = Value::Null;
        assert!(schema.validate(&value).is_err());
    }

    #[test]
    fn test_rejects_free_text() {
        let schema = OutputSchema::for_dimension(Dimension::Sentiment);
        assert!(schema.validate(&json!("The stock looks great")).is_err());
    }

    #[test]
    fn test_json_schema_lists_required_fields() {
        let schema = OutputSchema::for_dimension(Dimension::Sentiment).to_json_schema();
        assert_eq!(schema["required"], json!(["score", "confidence", "key_findings", "reasoning"]));
        assert!(schema["properties"]["indicators"]["properties"]["article_count"].is_object());
    }
}
