use analysis_core::{
    AnalysisError, Dimension, DimensionIndicators, DimensionInput, Financials,
    FundamentalIndicators, InstrumentId, RuleExecutor, RuleOutput,
};

/// Metrics that can contribute to a fundamental score
const TOTAL_FIELDS: u32 = 8;
/// Fewer computed metrics than this is not enough to score
const MIN_FIELDS: u32 = 2;
const HIGH_RISK_DEBT_TO_EQUITY: f64 = 4.0;

pub struct FundamentalAnalysisEngine;

impl FundamentalAnalysisEngine {
    pub fn new() -> Self {
        Self
    }

    fn calculate_pe_ratio(&self, price: f64, eps: f64) -> Option<f64> {
        if eps > 0.0 {
            Some(price / eps)
        } else {
            None
        }
    }

    fn calculate_debt_to_equity(&self, liabilities: f64, equity: f64) -> Option<f64> {
        if equity > 0.0 {
            Some(liabilities / equity)
        } else {
            None
        }
    }

    fn calculate_roe(&self, net_income: f64, equity: f64) -> Option<f64> {
        if equity > 0.0 {
            Some((net_income / equity) * 100.0)
        } else {
            None
        }
    }

    fn calculate_margin(&self, numerator: f64, revenue: f64) -> Option<f64> {
        if revenue > 0.0 {
            Some((numerator / revenue) * 100.0)
        } else {
            None
        }
    }

    fn calculate_current_ratio(&self, assets: f64, liabilities: f64) -> Option<f64> {
        if liabilities > 0.0 {
            Some(assets / liabilities)
        } else {
            None
        }
    }

    /// Score quarterly financials (newest first) with an optional current price.
    pub fn analyze_financials(
        &self,
        financials: &[Financials],
        current_price: Option<f64>,
    ) -> Result<RuleOutput, AnalysisError> {
        if financials.is_empty() {
            return Err(AnalysisError::InsufficientDataForRule(
                "no financial statements available".to_string(),
            ));
        }

        // Flow metrics use the trailing four quarters; balance sheet uses the latest.
        let ttm_slice = &financials[..financials.len().min(4)];

        fn sum_ttm(quarters: &[Financials], accessor: fn(&Financials) -> Option<f64>) -> Option<f64> {
            let values: Vec<f64> = quarters.iter().filter_map(accessor).collect();
            if values.is_empty() { None } else { Some(values.iter().sum()) }
        }

        let ttm_revenue = sum_ttm(ttm_slice, |f| f.revenue);
        let ttm_operating_income = sum_ttm(ttm_slice, |f| f.operating_income);
        let ttm_net_income = sum_ttm(ttm_slice, |f| f.net_income);
        let ttm_eps = sum_ttm(ttm_slice, |f| f.eps);
        let ttm_ocf = sum_ttm(ttm_slice, |f| f.cash_flow_operating);

        let latest = &financials[0];
        let equity = latest.shareholders_equity;
        let liabilities = latest.total_liabilities;

        let mut signals: Vec<(&'static str, i32, bool)> = Vec::new();
        let mut indicators = FundamentalIndicators::default();
        let mut fields_present: u32 = 0;

        // Revenue growth: TTM against the prior-year TTM
        if financials.len() >= 8 {
            let current: Option<f64> = sum_ttm(&financials[..4], |f| f.revenue);
            let prior: Option<f64> = sum_ttm(&financials[4..8], |f| f.revenue);
            if let (Some(current), Some(prior)) = (current, prior) {
                if prior > 0.0 {
                    let growth = (current - prior) / prior * 100.0;
                    indicators.revenue_growth = Some(growth);
                    fields_present += 1;
                    if growth > 10.0 {
                        signals.push(("Revenue growing", 2, true));
                    } else if growth < 0.0 {
                        signals.push(("Revenue shrinking", 2, false));
                    }
                }
            }
        }

        // P/E with growth-adjusted thresholds
        if let (Some(eps), Some(price)) = (ttm_eps, current_price.filter(|p| *p > 0.0)) {
            if let Some(pe) = self.calculate_pe_ratio(price, eps) {
                indicators.pe_ratio = Some(pe);
                fields_present += 1;
                let (low, high) = match indicators.revenue_growth {
                    Some(g) if g > 25.0 => (25.0, 60.0),
                    Some(g) if g > 10.0 => (18.0, 40.0),
                    _ => (15.0, 30.0),
                };
                if pe < low {
                    signals.push(("Low P/E ratio", 3, true));
                } else if pe > high {
                    signals.push(("High P/E ratio", 2, false));
                }
            } else {
                fields_present += 1;
                signals.push(("Negative trailing earnings", 2, false));
            }
        }

        if let (Some(net_income), Some(eq)) = (ttm_net_income, equity) {
            if let Some(roe) = self.calculate_roe(net_income, eq) {
                indicators.roe = Some(roe);
                fields_present += 1;
                if roe > 15.0 {
                    signals.push(("Strong ROE", 3, true));
                } else if roe < 5.0 {
                    signals.push(("Weak ROE", 2, false));
                }
            }
        }

        if let (Some(net_income), Some(revenue)) = (ttm_net_income, ttm_revenue) {
            if let Some(margin) = self.calculate_margin(net_income, revenue) {
                indicators.profit_margin = Some(margin);
                fields_present += 1;
                if margin > 20.0 {
                    signals.push(("High profit margin", 3, true));
                } else if margin < 5.0 {
                    signals.push(("Low profit margin", 2, false));
                }
            }
        }

        if let (Some(op_income), Some(revenue)) = (ttm_operating_income, ttm_revenue) {
            if let Some(margin) = self.calculate_margin(op_income, revenue) {
                indicators.operating_margin = Some(margin);
                fields_present += 1;
                if margin > 20.0 {
                    signals.push(("Strong operating margin", 2, true));
                } else if margin < 5.0 {
                    signals.push(("Weak operating margin", 2, false));
                }
            }
        }

        if let (Some(liab), Some(eq)) = (liabilities, equity) {
            if let Some(d2e) = self.calculate_debt_to_equity(liab, eq) {
                indicators.debt_to_equity = Some(d2e);
                fields_present += 1;
                if d2e < 0.5 {
                    signals.push(("Low debt", 2, true));
                } else if d2e > 2.0 {
                    signals.push(("High debt", 3, false));
                }
            }
        }

        if let (Some(assets), Some(liab)) = (latest.total_assets, liabilities) {
            if let Some(ratio) = self.calculate_current_ratio(assets, liab) {
                indicators.current_ratio = Some(ratio);
                fields_present += 1;
                if ratio > 1.5 {
                    signals.push(("Strong asset coverage", 2, true));
                } else if ratio < 1.0 {
                    signals.push(("Weak asset coverage", 2, false));
                }
            }
        }

        if let Some(ocf) = ttm_ocf {
            fields_present += 1;
            if ocf > 0.0 {
                signals.push(("Positive operating cash flow", 2, true));
            } else {
                signals.push(("Negative operating cash flow", 3, false));
            }
        }

        if fields_present < MIN_FIELDS {
            return Err(AnalysisError::InsufficientDataForRule(format!(
                "only {} fundamental metric(s) computable",
                fields_present
            )));
        }

        let mut total_score = 0;
        let mut total_weight = 0;
        for (_, weight, bullish) in &signals {
            total_weight += weight;
            total_score += if *bullish { *weight } else { -weight };
        }
        let normalized = if total_weight > 0 {
            (total_score as f64 / total_weight as f64) * 100.0
        } else {
            0.0
        };
        let sub_score = ((normalized + 100.0) / 2.0).clamp(0.0, 100.0);
        let confidence = (fields_present as f64 / TOTAL_FIELDS as f64).min(1.0) * 100.0;

        let negative_equity = equity.map_or(false, |e| e <= 0.0);
        let overleveraged = indicators
            .debt_to_equity
            .map_or(false, |d| d > HIGH_RISK_DEBT_TO_EQUITY);
        let high_risk = negative_equity || overleveraged;

        let mut findings: Vec<String> = signals
            .iter()
            .map(|(name, _, bullish)| format!("{} {}", if *bullish { "+" } else { "-" }, name))
            .collect();
        if negative_equity {
            findings.push("! Non-positive shareholders' equity".to_string());
        } else if overleveraged {
            findings.push("! Leverage above risk limit".to_string());
        }

        Ok(RuleOutput {
            sub_score,
            confidence: Some(confidence),
            findings,
            indicators: DimensionIndicators::Fundamental(indicators),
            high_risk,
        })
    }
}

impl RuleExecutor for FundamentalAnalysisEngine {
    fn dimension(&self) -> Dimension {
        Dimension::Fundamental
    }

    fn evaluate(
        &self,
        _instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<RuleOutput, AnalysisError> {
        match input {
            DimensionInput::Fundamental {
                financials,
                current_price,
            } => self.analyze_financials(financials, *current_price),
            other => Err(AnalysisError::InsufficientDataForRule(format!(
                "fundamental executor received {} input",
                other.dimension()
            ))),
        }
    }
}

impl Default for FundamentalAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}
