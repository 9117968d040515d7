use analysis_core::{
    adaptive, AnalysisError, Dimension, DimensionIndicators, DimensionInput, InstrumentId,
    NewsArticle, RuleExecutor, RuleOutput, SentimentIndicators,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};

const NEGATION_WORDS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "isn't", "aren't",
    "wasn't", "weren't", "won't", "wouldn't", "couldn't", "shouldn't", "hardly",
    "barely", "neither", "nor", "without",
];

const NEGATION_WINDOW: usize = 3;

/// Phrases that mark an existential risk for the issuer
const RISK_PHRASES: &[&str] = &["bankruptcy", "fraud", "delisting", "delisted", "going concern"];
const RISK_ARTICLE_THRESHOLD: usize = 2;

/// Article count at which confidence saturates
const CONFIDENCE_ARTICLES: f64 = 20.0;

/// News event type with importance weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum NewsEventType {
    Earnings,
    MergersAcq,
    Regulatory,
    AnalystAction,
    Management,
    Product,
    Legal,
    Macro,
    General,
}

impl NewsEventType {
    fn importance_weight(&self) -> f64 {
        match self {
            NewsEventType::Earnings => 2.0,
            NewsEventType::MergersAcq => 2.5,
            NewsEventType::Regulatory => 2.0,
            NewsEventType::AnalystAction => 1.5,
            NewsEventType::Management => 1.3,
            NewsEventType::Product => 1.2,
            NewsEventType::Legal => 1.5,
            NewsEventType::Macro => 0.8,
            NewsEventType::General => 1.0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            NewsEventType::Earnings => "earnings",
            NewsEventType::MergersAcq => "M&A",
            NewsEventType::Regulatory => "regulatory",
            NewsEventType::AnalystAction => "analyst action",
            NewsEventType::Management => "management",
            NewsEventType::Product => "product",
            NewsEventType::Legal => "legal",
            NewsEventType::Macro => "macro",
            NewsEventType::General => "general",
        }
    }
}

fn article_text(article: &NewsArticle) -> String {
    format!(
        "{} {}",
        article.title,
        article.description.as_deref().unwrap_or("")
    )
    .to_lowercase()
}

fn classify_event(text: &str) -> NewsEventType {
    if text.contains("earnings") || text.contains("quarterly") || text.contains("guidance")
        || text.contains("revenue") && (text.contains("beat") || text.contains("miss") || text.contains("report"))
        || text.contains("eps") || text.contains("profit") && text.contains("quarter") {
        NewsEventType::Earnings
    } else if text.contains("acqui") || text.contains("merger") || text.contains("buyout")
        || text.contains("takeover") || text.contains("spinoff") || text.contains("spin-off") {
        NewsEventType::MergersAcq
    } else if text.contains("fda") || text.contains("sec ") || text.contains("regulat")
        || text.contains("approval") || text.contains("antitrust") || text.contains("compliance") {
        NewsEventType::Regulatory
    } else if text.contains("upgrade") || text.contains("downgrade") || text.contains("price target")
        || text.contains("initiat") || text.contains("analyst") || text.contains("rating") {
        NewsEventType::AnalystAction
    } else if text.contains("ceo") || text.contains("cfo") || text.contains("board")
        || text.contains("executive") || text.contains("resign") || text.contains("appoint") {
        NewsEventType::Management
    } else if text.contains("launch") || text.contains("product") || text.contains("recall")
        || text.contains("patent") || text.contains("innovation") {
        NewsEventType::Product
    } else if text.contains("lawsuit") || text.contains("litigation") || text.contains("settlement")
        || text.contains("sued") || text.contains("court") || text.contains("indictment") {
        NewsEventType::Legal
    } else if text.contains("fed ") || text.contains("federal reserve") || text.contains("interest rate")
        || text.contains("inflation") || text.contains("gdp") || text.contains("unemployment") {
        NewsEventType::Macro
    } else {
        NewsEventType::General
    }
}

pub struct SentimentAnalysisEngine {
    positive_words: HashSet<&'static str>,
    negative_words: HashSet<&'static str>,
    negation_words: HashSet<&'static str>,
}

impl SentimentAnalysisEngine {
    pub fn new() -> Self {
        Self {
            positive_words: [
                "bullish", "rally", "surge", "gain", "profit", "growth", "beat",
                "upgrade", "outperform", "strong", "positive", "rise", "increase",
                "breakthrough", "innovation", "success", "exceed", "momentum",
                "buy", "recommend", "optimistic", "record", "high", "advance",
                "dividend", "buyback", "repurchase", "accretive", "upside",
                "recovery", "rebound", "expansion", "robust", "accelerating",
                "overweight", "raised", "upgraded", "reiterated", "outpacing",
                "tailwind",
            ]
            .into_iter()
            .collect(),
            negative_words: [
                "bearish", "decline", "loss", "fall", "plunge", "crash", "miss",
                "downgrade", "underperform", "weak", "negative", "drop", "decrease",
                "concern", "risk", "fail", "disappoint", "slump", "sell",
                "warning", "pessimistic", "low", "retreat", "fear", "trouble",
                "dilution", "dilutive", "headwind", "lawsuit", "litigation",
                "recall", "investigation", "probe", "default", "bankruptcy",
                "restructuring", "layoff", "downside", "overvalued", "bubble",
                "underweight", "lowered", "suspended", "fraud",
            ]
            .into_iter()
            .collect(),
            negation_words: NEGATION_WORDS.iter().copied().collect(),
        }
    }

    fn analyze_text(&self, text: &str) -> f64 {
        let text_lower = text.to_lowercase();
        let words: Vec<&str> = text_lower
            .split(|c: char| c.is_whitespace() || c == ',' || c == ';' || c == '.' || c == '!' || c == '?')
            .filter(|w| !w.is_empty())
            .collect();

        let negation_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter(|(_, w)| self.negation_words.contains(*w))
            .map(|(i, _)| i)
            .collect();

        let mut score: i32 = 0;
        for (i, word) in words.iter().enumerate() {
            let is_positive = self.positive_words.contains(*word);
            let is_negative = self.negative_words.contains(*word);
            if !is_positive && !is_negative {
                continue;
            }

            let negated = negation_positions
                .iter()
                .any(|&neg_pos| neg_pos < i && (i - neg_pos) <= NEGATION_WINDOW);

            if is_positive {
                score += if negated { -1 } else { 1 };
            } else {
                score += if negated { 1 } else { -1 };
            }
        }

        score as f64
    }

    fn analyze_article(&self, article: &NewsArticle) -> f64 {
        // Title counts double
        let mut total = self.analyze_text(&article.title) * 2.0;
        if let Some(desc) = &article.description {
            total += self.analyze_text(desc);
        }
        for keyword in &article.keywords {
            total += self.analyze_text(keyword) * 0.5;
        }
        total
    }

    /// Articles that list the instrument among few tickers are weighted more heavily.
    fn calculate_entity_weight(&self, article: &NewsArticle, symbol: &str) -> f64 {
        let sym_upper = symbol.to_uppercase();
        let is_primary = article.tickers.iter().any(|t| t.to_uppercase() == sym_upper);

        if is_primary {
            if article.tickers.len() <= 2 {
                1.5
            } else {
                1.2
            }
        } else {
            0.5
        }
    }

    /// Score a set of articles. Recency is measured against the newest article,
    /// so the result depends only on the input.
    pub fn analyze_news(
        &self,
        symbol: &str,
        news: &[NewsArticle],
    ) -> Result<RuleOutput, AnalysisError> {
        if news.is_empty() {
            return Err(AnalysisError::InsufficientDataForRule(
                "no news articles available".to_string(),
            ));
        }

        let article_scores: Vec<f64> = news.iter().map(|a| self.analyze_article(a)).collect();

        let reference: DateTime<Utc> = news
            .iter()
            .map(|a| a.published_utc)
            .max()
            .unwrap_or_else(Utc::now);
        let max_age_hours = news
            .iter()
            .map(|a| (reference - a.published_utc).num_hours() as f64)
            .fold(0.0_f64, f64::max);
        // Half-life is a quarter of the covered span
        let half_life_hours = (max_age_hours / 4.0).clamp(12.0, 168.0);

        let mut total_score = 0.0;
        let mut total_weight = 0.0;
        let mut positive_count = 0u32;
        let mut negative_count = 0u32;
        let mut direct_mention_count = 0u32;
        let mut risk_articles = 0usize;
        let mut event_counts: BTreeMap<NewsEventType, u32> = BTreeMap::new();

        for (article, &sentiment_score) in news.iter().zip(&article_scores) {
            let age_hours = (reference - article.published_utc).num_hours() as f64;
            let recency_weight = 0.5_f64.powf(age_hours.max(0.0) / half_life_hours);
            let entity_weight = self.calculate_entity_weight(article, symbol);

            let text = article_text(article);
            let event_type = classify_event(&text);
            *event_counts.entry(event_type).or_insert(0) += 1;

            let combined_weight = recency_weight * entity_weight * event_type.importance_weight();
            total_score += sentiment_score * combined_weight;
            total_weight += combined_weight;

            if entity_weight >= 1.0 {
                direct_mention_count += 1;
            }
            if sentiment_score > 0.0 {
                positive_count += 1;
            } else if sentiment_score < 0.0 {
                negative_count += 1;
            }
            if RISK_PHRASES.iter().any(|p| text.contains(p)) {
                risk_articles += 1;
            }
        }

        let avg_sentiment = if total_weight > 0.0 {
            total_score / total_weight
        } else {
            0.0
        };

        // Scale by dispersion so a few loud headlines do not saturate the score
        let score_std = adaptive::std_dev(&article_scores);
        let scale = if score_std > 0.0 { score_std.max(1.0) } else { 3.0 };
        let normalized = 100.0 * (avg_sentiment / scale).tanh();
        let sub_score = ((normalized + 100.0) / 2.0).clamp(0.0, 100.0);

        let article_count = news.len() as u32;
        let direct_ratio = direct_mention_count as f64 / article_count as f64;
        let volume_factor = (article_count as f64 / CONFIDENCE_ARTICLES).min(1.0);
        let confidence = (volume_factor * (0.5 + 0.5 * direct_ratio) * 100.0).clamp(0.0, 100.0);

        let high_risk = risk_articles >= RISK_ARTICLE_THRESHOLD;

        let mut findings = Vec::new();
        if normalized > 20.0 {
            findings.push(format!(
                "+ Positive news flow ({} of {} articles positive)",
                positive_count, article_count
            ));
        } else if normalized < -20.0 {
            findings.push(format!(
                "- Negative news flow ({} of {} articles negative)",
                negative_count, article_count
            ));
        } else {
            findings.push(format!("Mixed news flow across {} articles", article_count));
        }
        if let Some((event, count)) = event_counts
            .iter()
            .filter(|(e, _)| **e != NewsEventType::General)
            .max_by_key(|(_, c)| **c)
        {
            findings.push(format!("Dominant topic: {} ({} articles)", event.label(), count));
        }
        if high_risk {
            findings.push(format!(
                "! {} articles mention bankruptcy, fraud, delisting or going-concern risk",
                risk_articles
            ));
        }

        Ok(RuleOutput {
            sub_score,
            confidence: Some(confidence),
            findings,
            indicators: DimensionIndicators::Sentiment(SentimentIndicators {
                article_count: Some(article_count),
                positive_articles: Some(positive_count),
                negative_articles: Some(negative_count),
                avg_sentiment: Some(avg_sentiment),
                direct_mention_ratio: Some(direct_ratio),
            }),
            high_risk,
        })
    }
}

impl RuleExecutor for SentimentAnalysisEngine {
    fn dimension(&self) -> Dimension {
        Dimension::Sentiment
    }

    fn evaluate(
        &self,
        instrument: &InstrumentId,
        input: &DimensionInput,
    ) -> Result<RuleOutput, AnalysisError> {
        match input {
            DimensionInput::Sentiment { news } => self.analyze_news(instrument.as_str(), news),
            other => Err(AnalysisError::InsufficientDataForRule(format!(
                "sentiment executor received {} input",
                other.dimension()
            ))),
        }
    }
}

impl Default for SentimentAnalysisEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn article(title: &str, hours_ago: i64, tickers: &[&str]) -> NewsArticle {
        NewsArticle {
            id: title.to_string(),
            title: title.to_string(),
            author: None,
            published_utc: Utc::now() - Duration::hours(hours_ago),
            article_url: "https://example.com".to_string(),
            description: None,
            keywords: vec![],
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_negation_flips_polarity() {
        let engine = SentimentAnalysisEngine::new();
        assert!(engine.analyze_text("strong growth") > 0.0);
        assert!(engine.analyze_text("not strong at all") < 0.0);
        assert!(engine.analyze_text("no concern about supply") > 0.0);
    }

    #[test]
    fn test_classify_event() {
        assert_eq!(classify_event("company beats quarterly earnings"), NewsEventType::Earnings);
        assert_eq!(classify_event("merger talks continue"), NewsEventType::MergersAcq);
        assert_eq!(classify_event("weather is nice"), NewsEventType::General);
    }

    #[test]
    fn test_empty_news_is_insufficient() {
        let engine = SentimentAnalysisEngine::new();
        let err = engine.analyze_news("AAPL", &[]).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientDataForRule(_)));
    }

    #[test]
    fn test_positive_flow_scores_above_neutral() {
        let engine = SentimentAnalysisEngine::new();
        let news: Vec<NewsArticle> = (0..10)
            .map(|i| article("Shares surge on record profit and strong growth", i * 6, &["AAPL"]))
            .collect();
        let output = engine.analyze_news("AAPL", &news).unwrap();
        assert!(output.sub_score > 60.0, "score was {}", output.sub_score);
        assert!(!output.high_risk);
        match output.indicators {
            DimensionIndicators::Sentiment(ind) => {
                assert_eq!(ind.article_count, Some(10));
                assert_eq!(ind.positive_articles, Some(10));
                assert_eq!(ind.direct_mention_ratio, Some(1.0));
            }
            other => panic!("unexpected indicators {:?}", other),
        }
    }

    #[test]
    fn test_negative_flow_scores_below_neutral() {
        let engine = SentimentAnalysisEngine::new();
        let news: Vec<NewsArticle> = (0..6)
            .map(|i| article("Stock plunge deepens amid weak demand and layoff warning", i, &["XYZ"]))
            .collect();
        let output = engine.analyze_news("XYZ", &news).unwrap();
        assert!(output.sub_score < 40.0, "score was {}", output.sub_score);
    }

    #[test]
    fn test_risk_phrases_flag_high_risk() {
        let engine = SentimentAnalysisEngine::new();
        let news = vec![
            article("Auditor raises going concern doubt", 1, &["XYZ"]),
            article("Regulators open fraud inquiry", 2, &["XYZ"]),
            article("New product launch", 3, &["XYZ"]),
        ];
        let output = engine.analyze_news("XYZ", &news).unwrap();
        assert!(output.high_risk);

        let single = vec![article("Regulators open fraud inquiry", 2, &["XYZ"])];
        assert!(!engine.analyze_news("XYZ", &single).unwrap().high_risk);
    }

    #[test]
    fn test_peripheral_mentions_lower_confidence() {
        let engine = SentimentAnalysisEngine::new();
        let direct: Vec<NewsArticle> =
            (0..20).map(|i| article("Strong quarter", i, &["AAPL"])).collect();
        let peripheral: Vec<NewsArticle> =
            (0..20).map(|i| article("Strong quarter", i, &["MSFT"])).collect();
        let a = engine.analyze_news("AAPL", &direct).unwrap().confidence.unwrap();
        let b = engine.analyze_news("AAPL", &peripheral).unwrap().confidence.unwrap();
        assert!(a > b);
    }
}
