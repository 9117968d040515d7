use analysis_core::{
    AnalysisError, Bar, Dimension, DimensionIndicators, DimensionInput, InstrumentId, RuleExecutor,
    RuleOutput, TechnicalIndicators,
};

use crate::indicators::*;

/// Minimum history for the 50-bar moving average to exist.
pub const MIN_BARS: usize = 50;

const VOLATILITY_LOOKBACK: usize = 20;
const HIGH_LOOKBACK: usize = 252;
const HIGH_RISK_VOLATILITY: f64 = 100.0;
const HIGH_RISK_DRAWDOWN: f64 = 50.0;

pub struct TechnicalAnalysisEngine;

/// Shared signal data computed from bars
struct SignalData {
    signals: Vec<(&'static str, i32, bool)>,
    indicators: TechnicalIndicators,
}

impl TechnicalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    fn build_signals(&self, bars: &[Bar]) -> Result<SignalData, AnalysisError> {
        if bars.len() < MIN_BARS {
            return Err(AnalysisError::InsufficientDataForRule(format!(
                "need at least {} bars for technical analysis, got {}",
                MIN_BARS,
                bars.len()
            )));
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let current_price = closes[closes.len() - 1];
        let mut signals: Vec<(&'static str, i32, bool)> = Vec::new();

        // RSI (deeper oversold = stronger reversal signal)
        let rsi_values = rsi(&closes, 14);
        let last_rsi = rsi_values.last().copied();
        if let Some(value) = last_rsi {
            if value < 25.0 {
                signals.push(("RSI deeply oversold", 3, true));
            } else if value < 30.0 {
                signals.push(("RSI oversold", 2, true));
            } else if value > 70.0 {
                signals.push(("RSI overbought", 2, false));
            }
        }

        // MACD
        let macd_result = macd(&closes, 12, 26, 9);
        let hist = &macd_result.histogram;
        let last_hist = hist.last().copied();
        if hist.len() > 1 {
            let last = hist[hist.len() - 1];
            let prev = hist[hist.len() - 2];
            if last > 0.0 && prev <= 0.0 {
                signals.push(("MACD bullish cross", 3, true));
            } else if last < 0.0 && prev >= 0.0 {
                signals.push(("MACD bearish cross", 3, false));
            } else if last > 0.0 {
                signals.push(("MACD momentum positive", 1, true));
            } else if last < 0.0 {
                signals.push(("MACD momentum negative", 1, false));
            }
        }

        // Moving averages
        let sma_20 = sma(&closes, 20);
        let sma_50 = sma(&closes, 50);
        let last_sma_20 = sma_20.last().copied();
        let last_sma_50 = sma_50.last().copied();
        if let (Some(s20), Some(s50)) = (last_sma_20, last_sma_50) {
            if current_price > s20 && current_price > s50 {
                signals.push(("Price above 20/50-day averages", 2, true));
            } else if current_price < s20 && current_price < s50 {
                signals.push(("Price below 20/50-day averages", 2, false));
            }

            if sma_20.len() > 1 && sma_50.len() > 1 {
                let prev_20 = sma_20[sma_20.len() - 2];
                let prev_50 = sma_50[sma_50.len() - 2];
                if s20 > s50 && prev_20 <= prev_50 {
                    signals.push(("Golden cross", 4, true));
                } else if s20 < s50 && prev_20 >= prev_50 {
                    signals.push(("Death cross", 4, false));
                }
            }

            // Trend: slope of the 20-day average over the last 10 sessions
            if sma_20.len() > 10 {
                let earlier = sma_20[sma_20.len() - 11];
                if earlier > 0.0 {
                    let slope = (s20 - earlier) / earlier * 100.0;
                    if slope > 2.0 {
                        signals.push(("Uptrend", 2, true));
                    } else if slope < -2.0 {
                        signals.push(("Downtrend", 2, false));
                    }
                }
            }
        }

        // Bollinger Bands
        let bb = bollinger_bands(&closes, 20, 2.0);
        let percent_b = match (bb.upper.last(), bb.lower.last()) {
            (Some(&upper), Some(&lower)) => {
                if current_price < lower {
                    signals.push(("Below lower Bollinger band", 2, true));
                } else if current_price > upper {
                    signals.push(("Above upper Bollinger band", 2, false));
                }
                if upper - lower != 0.0 {
                    Some((current_price - lower) / (upper - lower))
                } else {
                    Some(0.5)
                }
            }
            _ => None,
        };

        // Stochastic Oscillator
        let stoch = stochastic(bars, 14, 3);
        let last_k = stoch.k.last().copied();
        if let Some(k) = last_k {
            if k < 20.0 {
                signals.push(("Stochastic oversold", 2, true));
            } else if k > 80.0 {
                signals.push(("Stochastic overbought", 2, false));
            }
        }

        let indicators = TechnicalIndicators {
            last_close: Some(current_price),
            rsi: last_rsi,
            macd_histogram: last_hist,
            sma_20: last_sma_20,
            sma_50: last_sma_50,
            bollinger_percent_b: percent_b,
            stochastic_k: last_k,
            annualized_volatility: annualized_volatility(&closes, VOLATILITY_LOOKBACK),
            drawdown_from_high: drawdown_from_high(&closes, HIGH_LOOKBACK),
        };

        Ok(SignalData { signals, indicators })
    }

    /// Score a price series. Pure over the bars given.
    pub fn analyze_bars(&self, bars: &[Bar]) -> Result<RuleOutput, AnalysisError> {
        let data = self.build_signals(bars)?;

        let mut total_score = 0;
        let mut total_weight = 0;
        for (_, weight, bullish) in &data.signals {
            total_weight += weight;
            total_score += if *bullish { *weight } else { -weight };
        }

        // -100..100 vote balance, re-centred onto 0..100
        let normalized = if total_weight > 0 {
            (total_score as f64 / total_weight as f64) * 100.0
        } else {
            0.0
        };
        let sub_score = ((normalized + 100.0) / 2.0).clamp(0.0, 100.0);
        let confidence = (total_weight as f64 / 20.0).min(1.0) * 100.0;

        let mut findings: Vec<String> = data
            .signals
            .iter()
            .map(|(name, _, bullish)| format!("{} {}", if *bullish { "+" } else { "-" }, name))
            .collect();

        let volatility = data.indicators.annualized_volatility.unwrap_or(0.0);
        let drawdown = data.indicators.drawdown_from_high.unwrap_or(0.0);
        let high_risk = volatility > HIGH_RISK_VOLATILITY || drawdown > HIGH_RISK_DRAWDOWN;
        if high_risk {
            findings.push(format!(
                "! Elevated price risk (volatility {:.0}%, drawdown {:.0}%)",
                volatility, drawdown
            ));
        }
        if findings.is_empty() {
            findings.push("No decisive technical signals".to_string());
        }

        Ok(RuleOutput {
            sub_score,
            confidence: Some(confidence),
            findings,
            indicators: DimensionIndicators::Technical(data.indicators),
            high_risk,
        })
    }
}

impl RuleExecutor for TechnicalAnalysisEngine {
    fn dimension(&self) -> Dimension {
        Dimension::Technical
    }

    fn evaluate(
        &self,
        _instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<RuleOutput, AnalysisError> {
        match input {
            DimensionInput::Technical { bars } => self.analyze_bars(bars),
            other => Err(AnalysisError::InsufficientDataForRule(format!(
                "technical executor received {} input",
                other.dimension()
            ))),
        }
    }
}

impl Default for TechnicalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close * 0.995,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000_000.0,
            })
            .collect()
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let engine = TechnicalAnalysisEngine::new();
        let bars = bars_from_closes(&vec![100.0; 20]);
        let err = engine.analyze_bars(&bars).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientDataForRule(_)));
    }

    #[test]
    fn test_steady_uptrend_scores_above_neutral() {
        let engine = TechnicalAnalysisEngine::new();
        // Zigzag climb ending on a down bar keeps RSI and stochastic out of extremes
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 2.0 } else { -2.0 })
            .collect();
        let output = engine.analyze_bars(&bars_from_closes(&closes)).unwrap();

        assert!(output.sub_score > 50.0, "score was {}", output.sub_score);
        assert!((0.0..=100.0).contains(&output.sub_score));
        assert!(!output.high_risk);
        match output.indicators {
            DimensionIndicators::Technical(ind) => {
                assert!(ind.rsi.is_some());
                assert!(ind.sma_50.is_some());
            }
            other => panic!("unexpected indicators {:?}", other),
        }
    }

    #[test]
    fn test_steady_downtrend_scores_below_neutral() {
        let engine = TechnicalAnalysisEngine::new();
        let closes: Vec<f64> = (0..120)
            .map(|i| 200.0 - i as f64 * 0.5 + if i % 2 == 0 { -2.0 } else { 2.0 })
            .collect();
        let output = engine.analyze_bars(&bars_from_closes(&closes)).unwrap();
        assert!(output.sub_score < 50.0, "score was {}", output.sub_score);
    }

    #[test]
    fn test_collapse_raises_risk_flag() {
        let engine = TechnicalAnalysisEngine::new();
        let mut closes: Vec<f64> = vec![100.0; 80];
        closes.extend((1..=20).map(|i| 100.0 - i as f64 * 3.0));
        let output = engine.analyze_bars(&bars_from_closes(&closes)).unwrap();
        assert!(output.high_risk);
    }

    #[test]
    fn test_wrong_input_shape_is_rejected() {
        let engine = TechnicalAnalysisEngine::new();
        let input = DimensionInput::Sentiment { news: vec![] };
        assert!(engine.evaluate(&InstrumentId::from("AAPL"), &input).is_err());
    }
}
