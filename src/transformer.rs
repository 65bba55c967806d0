//! Title refinement, bullet points, summary and topic classification.
//!
//! One prompt per release. The answer is parsed in three passes:
//!
//! 1. strip code fences, take the outermost `{ ... }` and read it as JSON;
//! 2. if that fails, pull the fields out with regexes (models sometimes emit
//!    almost-JSON with a stray quote or trailing comma);
//! 3. if that fails too, keep the original title and say so in the summary.
//!
//! Whatever the pass, a category the model is not confident about becomes
//! [`Category::General`]. Only a failure of the pool call itself is returned
//! as an error.

use crate::error::CompletionError;
use crate::llm::CompletionPool;
use crate::models::{Category, ClassificationResult};
use crate::utils::{looks_truncated, normalize_whitespace, outermost_json_object, truncate_chars, truncate_for_log};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_SUMMARY_CHARS: usize = 1000;
pub const MAX_BULLETS: usize = 2;
pub const FAILED_SUMMARY: &str = "Unable to generate summary";
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// `"field": "string value"` allowing escaped quotes inside the value.
static STRING_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(title|summary|category|bullets)"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid field regex")
});
static BULLET_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""bullets"\s*:\s*\[([^\]]*)\]"#).expect("valid bullets regex"));
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid quoted regex"));
static CONFIDENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""confidence"\s*:\s*"?([0-9]*\.?[0-9]+)"#).expect("valid confidence regex"));

/// One-line descriptions shown to the model for each topic.
const CATEGORY_HINTS: [(Category, &str); 15] = [
    (Category::MergersAcquisitions, "mergers, acquisitions, takeovers, asset purchases"),
    (Category::SpinOffs, "spin-offs, carve-outs, separating business units"),
    (Category::Buybacks, "share repurchases, buyback authorizations, special dividends"),
    (Category::Guidance, "earnings guidance, forecasts, outlook changes, pre-announcements"),
    (Category::Leadership, "CEO or CFO appointments, executive departures, board changes"),
    (Category::Approvals, "FDA or other regulatory approvals, clearances, authorizations"),
    (Category::Activism, "activist investors, proxy fights, governance campaigns"),
    (Category::Earnings, "quarterly or annual results, revenue and EPS reports"),
    (Category::Offerings, "IPOs, secondary offerings, debt or convertible note issuance"),
    (Category::Partnerships, "strategic alliances, joint ventures, licensing agreements"),
    (Category::Litigation, "lawsuits, settlements, regulatory investigations"),
    (Category::Restructuring, "layoffs, reorganizations, bankruptcy, cost programs"),
    (Category::Contracts, "major customer contracts, government awards, supply deals"),
    (Category::ClinicalTrials, "trial initiations, enrollment milestones, data readouts"),
    (Category::General, "anything else: product news, business updates, events"),
];

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TransformerSettings {
    pub temperature: f64,
    pub max_tokens: u32,
    /// Confidence below this forces `General`.
    pub default_threshold: f64,
    pub max_text_length: usize,
}

impl Default for TransformerSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 500,
            default_threshold: 0.3,
            max_text_length: 2000,
        }
    }
}

pub struct ArticleTransformer {
    pool: Arc<CompletionPool>,
    settings: TransformerSettings,
}

impl ArticleTransformer {
    pub fn new(pool: Arc<CompletionPool>, settings: TransformerSettings) -> Self {
        Self { pool, settings }
    }

    /// Classify and summarize one release.
    ///
    /// # Arguments
    ///
    /// * `title` - Release headline, whitespace-normalized before use
    /// * `text` - Body text, normalized and cut to `max_text_length` characters
    /// * `threshold` - Overrides the configured confidence cut-off
    ///
    /// # Returns
    ///
    /// Always a [`ClassificationResult`] once the model answered, even if the
    /// answer was unreadable (see [`parse_response`]). Only a pool failure is
    /// an error.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let r = transformer.transform("Acme to acquire Widget", &text, Some(0.5)).await?;
    /// assert!(r.bullets.len() <= MAX_BULLETS);
    /// ```
    #[instrument(level = "debug", skip_all, fields(%title))]
    pub async fn transform(
        &self,
        title: &str,
        text: &str,
        threshold: Option<f64>,
    ) -> Result<ClassificationResult, CompletionError> {
        let threshold = threshold.unwrap_or(self.settings.default_threshold);
        let clean_title = normalize_whitespace(title);
        let clean_text = self.preprocess(text);
        let prompt = build_prompt(&clean_title, &clean_text, threshold);

        let completion = self
            .pool
            .call(&prompt, Some(self.settings.temperature), Some(self.settings.max_tokens))
            .await?;

        let result = parse_response(&completion.text, threshold, &clean_title);
        info!(
            model = %completion.model,
            category = %result.category,
            confidence = result.confidence,
            "Transformed release"
        );
        Ok(result)
    }

    fn preprocess(&self, text: &str) -> String {
        let normalized = normalize_whitespace(text);
        let capped = truncate_chars(&normalized, self.settings.max_text_length);
        if capped.len() < normalized.len() {
            debug!(
                from = normalized.chars().count(),
                to = self.settings.max_text_length,
                "Release text truncated for prompt"
            );
        }
        capped.to_string()
    }
}

fn build_prompt(title: &str, text: &str, threshold: f64) -> String {
    let categories = CATEGORY_HINTS
        .iter()
        .map(|(c, hint)| format!("  - {c}: {hint}"))
        .join("\n");

    format!(
        r#"You are a financial analyst who reads corporate press releases for a living.

For the press release below, produce:
1. TITLE: a refined headline of at most 10 words.
2. BULLETS: exactly two bullet points of at most 10 words each, covering the two most important facts beyond the headline.
3. SUMMARY: a plain-English explanation of at most 300 words, free of jargon.
4. CATEGORY: the single best category from the list below, spelled exactly as listed.
5. CONFIDENCE: your confidence in the category, from 0.0 to 1.0.

CATEGORIES:
{categories}

Only choose a specific category when your confidence is at least {threshold}; otherwise answer "General".

TITLE: {title}

TEXT:
{text}

Respond ONLY with JSON in exactly this shape:
{{"title": "...", "bullets": ["...", "..."], "summary": "...", "category": "...", "confidence": 0.95}}"#
    )
}

/// Parse model output into a classification; never fails.
pub fn parse_response(output: &str, threshold: f64, original_title: &str) -> ClassificationResult {
    let parsed = match outermost_json_object(output).map(serde_json::from_str::<Value>) {
        Some(Ok(value)) if value.is_object() => from_json(&value, original_title),
        Some(Err(e)) if looks_truncated(&e) => {
            warn!(error = %e, "Classification JSON looks truncated; trying regex extraction");
            from_regex(output)
        }
        other => {
            if let Some(Err(e)) = other {
                warn!(error = %e, "Classification JSON did not parse; trying regex extraction");
            }
            from_regex(output)
        }
    };

    match parsed {
        Some(mut result) => {
            if result.confidence < threshold && result.category != Category::General {
                info!(
                    confidence = result.confidence,
                    threshold,
                    raw = %result.category,
                    "Confidence below threshold; using General"
                );
                result.category = Category::General;
            }
            result
        }
        None => {
            warn!(output = %truncate_for_log(output, 200), "Could not read classification; using defaults");
            ClassificationResult {
                title: truncate_chars(original_title, MAX_TITLE_CHARS).to_string(),
                bullets: Vec::new(),
                summary: FAILED_SUMMARY.to_string(),
                category: Category::General,
                confidence: 0.0,
            }
        }
    }
}

fn from_json(value: &Value, original_title: &str) -> Option<ClassificationResult> {
    let title = value
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(original_title);
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("No summary available");
    let bullets = match value.get("bullets") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|b| b.trim().to_string())
            .collect(),
        Some(Value::String(s)) => vec![s.trim().to_string()],
        _ => Vec::new(),
    };
    let confidence = match value.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|c: &f64| c.is_finite())
    .unwrap_or(DEFAULT_CONFIDENCE);

    Some(build(
        title,
        bullets,
        summary,
        value.get("category").and_then(Value::as_str).unwrap_or("General"),
        confidence,
    ))
}

fn from_regex(output: &str) -> Option<ClassificationResult> {
    let mut title = None;
    let mut summary = None;
    let mut category = None;
    let mut bullets = Vec::new();

    for caps in STRING_FIELD.captures_iter(output) {
        let value = unescape(&caps[2]);
        match &caps[1] {
            "title" => title = title.or(Some(value)),
            "summary" => summary = summary.or(Some(value)),
            "category" => category = category.or(Some(value)),
            "bullets" => bullets.push(value),
            _ => {}
        }
    }
    if let Some(array) = BULLET_ARRAY.captures(output) {
        bullets.extend(QUOTED.captures_iter(&array[1]).map(|c| unescape(&c[1])));
    }

    let confidence = CONFIDENCE
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(DEFAULT_CONFIDENCE);

    Some(build(&title?, bullets, &summary?, &category?, confidence))
}

fn build(title: &str, bullets: Vec<String>, summary: &str, category: &str, confidence: f64) -> ClassificationResult {
    let category = Category::from_label(category).unwrap_or_else(|| {
        warn!(%category, "Unknown category; using General");
        Category::General
    });
    ClassificationResult {
        title: truncate_chars(title, MAX_TITLE_CHARS).to_string(),
        bullets: bullets
            .into_iter()
            .filter(|b| !b.is_empty())
            .take(MAX_BULLETS)
            .collect(),
        summary: truncate_chars(summary, MAX_SUMMARY_CHARS).to_string(),
        category,
        confidence: if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE
        },
    }
}

/// Decode JSON string escapes, leaving the raw text on failure.
fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedBackend, pool_over, rate_limited};

    fn transformer(reply: &str) -> (ArticleTransformer, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::replying(reply));
        (
            ArticleTransformer::new(pool_over(backend.clone()), TransformerSettings::default()),
            backend,
        )
    }

    #[tokio::test]
    async fn test_low_confidence_forces_general() {
        let (t, _) = transformer(
            r#"{"title": "Acme buys Widget", "bullets": ["a", "b"], "summary": "s", "category": "M&A", "confidence": 0.2}"#,
        );
        let r = t.transform("Acme", "text", Some(0.3)).await.unwrap();
        assert_eq!(r.category, Category::General);
        assert_eq!(r.title, "Acme buys Widget");
    }

    #[tokio::test]
    async fn test_confident_category_kept_and_params_sent() {
        let (t, backend) = transformer(
            "Here you go:\n```json\n{\"title\": \"Acme buys Widget\", \"bullets\": [\"a\", \"b\", \"c\"], \"summary\": \"s\", \"category\": \"m&a\", \"confidence\": 0.9}\n```\nThanks!",
        );
        let r = t.transform("Acme", "text", None).await.unwrap();
        assert_eq!(r.category, Category::MergersAcquisitions);
        assert_eq!(r.bullets, vec!["a", "b"]);
        assert_eq!(backend.last_params(), Some((0.1, 500)));
    }

    #[test]
    fn test_spin_offs_alias() {
        let r = parse_response(
            r#"{"title": "t", "summary": "s", "category": "SPIN OFFS", "confidence": 0.8}"#,
            0.3,
            "orig",
        );
        assert_eq!(r.category, Category::SpinOffs);
        assert!(r.bullets.is_empty());
    }

    #[test]
    fn test_unknown_category_becomes_general() {
        let r = parse_response(
            r#"{"title": "t", "summary": "s", "category": "Weather", "confidence": 0.99}"#,
            0.3,
            "orig",
        );
        assert_eq!(r.category, Category::General);
    }

    #[test]
    fn test_lengths_are_capped() {
        let output = serde_json::json!({
            "title": "T".repeat(300),
            "summary": "S".repeat(5000),
            "category": "Earnings",
            "confidence": 0.9,
        })
        .to_string();
        let r = parse_response(&output, 0.3, "orig");
        assert_eq!(r.title.chars().count(), MAX_TITLE_CHARS);
        assert_eq!(r.summary.chars().count(), MAX_SUMMARY_CHARS);
    }

    #[test]
    fn test_regex_fallback_on_broken_json() {
        let output = r#"{"title": "Beta \"Bio\" wins approval", "bullets": ["FDA nod", "Launch in Q3",], "summary": "Beta got approval.", "category": "Approvals", "confidence": 0.8,,}"#;
        let r = parse_response(output, 0.3, "orig");
        assert_eq!(r.title, "Beta \"Bio\" wins approval");
        assert_eq!(r.bullets, vec!["FDA nod", "Launch in Q3"]);
        assert_eq!(r.category, Category::Approvals);
        assert_eq!(r.confidence, 0.8);
    }

    #[test]
    fn test_regex_fallback_respects_threshold() {
        let output = r#"title: x {"title": "t", "summary": "s", "category": "Earnings", "confidence": 0.1"#;
        let r = parse_response(output, 0.3, "orig");
        assert_eq!(r.category, Category::General);
        assert_eq!(r.summary, "s");
    }

    #[test]
    fn test_non_finite_confidence_falls_back_to_default() {
        let r = parse_response(
            r#"{"title": "t", "summary": "s", "category": "M&A", "confidence": "NaN"}"#,
            0.3,
            "o",
        );
        assert_eq!(r.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(r.category, Category::MergersAcquisitions);

        let strict = parse_response(
            r#"{"title": "t", "summary": "s", "category": "M&A", "confidence": "inf"}"#,
            0.6,
            "o",
        );
        assert_eq!(strict.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(strict.category, Category::General);
    }

    #[test]
    fn test_total_failure_defaults() {
        let r = parse_response("I'm sorry, I can't help with that.", 0.3, "Original Title");
        assert_eq!(r.title, "Original Title");
        assert!(r.bullets.is_empty());
        assert_eq!(r.summary, FAILED_SUMMARY);
        assert_eq!(r.category, Category::General);
    }

    #[tokio::test]
    async fn test_text_is_preprocessed() {
        let (t, backend) = transformer(r#"{"title": "t", "summary": "s", "category": "General"}"#);
        let long = format!("a  b\n\nc {}", "x".repeat(5000));
        t.transform("  Spaced   title ", &long, None).await.unwrap();
        let prompt = &backend.calls()[0].prompt;
        assert!(prompt.contains("TITLE: Spaced title\n"));
        assert!(prompt.contains("a b c xxx"));
        assert!(!prompt.contains(&"x".repeat(2000)));
    }

    #[tokio::test]
    async fn test_pool_failure_propagates() {
        let backend = Arc::new(ScriptedBackend::new(|model, _| Err(rate_limited(model))));
        let t = ArticleTransformer::new(pool_over(backend), TransformerSettings::default());
        assert!(t.transform("t", "x", None).await.is_err());
    }
}
