//! Data models shared across the ingestion pipeline.
//!
//! - [`ProviderConfig`] / [`FeedMode`]: static description of a wire service
//! - [`FeedItem`]: a candidate release discovered from a feed or listing page
//! - [`ArticleDraft`]: what a provider parser extracts from a release page
//! - [`ClassificationResult`] and [`MaterialityAssessment`]: LLM verdicts
//! - [`FinalArticle`]: the flat record posted to the article store

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a provider discovers new releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    /// Poll an RSS or Atom feed.
    Rss,
    /// Scrape a newsroom listing page for release links.
    Scrape,
}

impl fmt::Display for FeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedMode::Rss => f.write_str("rss"),
            FeedMode::Scrape => f.write_str("scrape"),
        }
    }
}

/// Immutable settings for one provider instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Display name, also sent to the store as `provider`.
    pub name: String,
    pub mode: FeedMode,
    pub feed_url: Option<String>,
    pub listing_url: Option<String>,
    pub poll_interval: Duration,
}

/// A release candidate, consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
    /// Publication time in epoch milliseconds.
    pub published_at_ms: i64,
    pub guid: String,
}

/// Provider-parsed release before any LLM work.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleDraft {
    pub url: String,
    pub title: String,
    pub published_at_ms: i64,
    pub provider: String,
    pub provider_url: String,
    pub image_url: Option<String>,
    pub article_text: String,
    pub tickers: Vec<String>,
}

/// Fixed topic taxonomy used for classification.
///
/// `General` is the catch-all and the forced answer for low-confidence
/// classifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    MergersAcquisitions,
    SpinOffs,
    Buybacks,
    Guidance,
    Leadership,
    Approvals,
    Activism,
    Earnings,
    Offerings,
    Partnerships,
    Litigation,
    Restructuring,
    Contracts,
    ClinicalTrials,
    General,
}

impl Category {
    pub const ALL: [Category; 15] = [
        Category::MergersAcquisitions,
        Category::SpinOffs,
        Category::Buybacks,
        Category::Guidance,
        Category::Leadership,
        Category::Approvals,
        Category::Activism,
        Category::Earnings,
        Category::Offerings,
        Category::Partnerships,
        Category::Litigation,
        Category::Restructuring,
        Category::Contracts,
        Category::ClinicalTrials,
        Category::General,
    ];

    /// Canonical label stored in `topics`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MergersAcquisitions => "M&A",
            Category::SpinOffs => "Spin-offs",
            Category::Buybacks => "Buybacks",
            Category::Guidance => "Guidance",
            Category::Leadership => "Leadership",
            Category::Approvals => "Approvals",
            Category::Activism => "Activism",
            Category::Earnings => "Earnings",
            Category::Offerings => "Offerings",
            Category::Partnerships => "Partnerships",
            Category::Litigation => "Litigation",
            Category::Restructuring => "Restructuring",
            Category::Contracts => "Contracts",
            Category::ClinicalTrials => "Clinical Trials",
            Category::General => "General",
        }
    }

    /// Match a model-produced label case-insensitively, accepting legacy aliases.
    ///
    /// Returns `None` for anything outside the taxonomy.
    pub fn from_label(raw: &str) -> Option<Category> {
        let label = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
        if label.is_empty() {
            return None;
        }
        let lowered = label.to_lowercase();
        if let Some(found) = Category::ALL
            .iter()
            .find(|c| c.as_str().to_lowercase() == lowered)
        {
            return Some(*found);
        }
        match lowered.as_str() {
            "spin offs" | "spin off" | "spin-off" | "spinoff" | "spinoffs" => {
                Some(Category::SpinOffs)
            }
            "m and a" | "m & a" | "mergers and acquisitions" | "mergers & acquisitions" => {
                Some(Category::MergersAcquisitions)
            }
            "share buybacks" | "buyback" | "share repurchases" => Some(Category::Buybacks),
            "clinical trial" => Some(Category::ClinicalTrials),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the article transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub title: String,
    /// At most two bullet points.
    pub bullets: Vec<String>,
    pub summary: String,
    pub category: Category,
    /// Model self-reported confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Output of the materiality filter.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialityAssessment {
    pub score: f64,
    pub is_material: bool,
    pub is_borderline: bool,
    pub reason: String,
}

/// The record posted to the article store.
///
/// Serializes to the store's flat JSON schema. Materiality fields are
/// omitted entirely when no assessment ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalArticle {
    pub url: String,
    pub title: String,
    pub timestamp_ms: i64,
    pub provider: String,
    pub provider_url: String,
    pub image_url: Option<String>,
    pub bullets: Vec<String>,
    pub summary: String,
    pub topics: Vec<String>,
    pub article_text: String,
    pub tickers: Vec<String>,
    pub extracted_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_material: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub materiality_score: Option<f64>,
}

impl FinalArticle {
    /// Merge a draft with its classification and optional materiality verdict.
    pub fn assemble(
        draft: ArticleDraft,
        classification: ClassificationResult,
        materiality: Option<&MaterialityAssessment>,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: draft.url,
            title: classification.title,
            timestamp_ms: draft.published_at_ms,
            provider: draft.provider,
            provider_url: draft.provider_url,
            image_url: draft.image_url,
            bullets: classification.bullets,
            summary: classification.summary,
            topics: vec![classification.category.to_string()],
            article_text: draft.article_text,
            tickers: draft.tickers,
            extracted_at: extracted_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            is_material: materiality.map(|m| m.is_material),
            materiality_score: materiality.map(|m| m.score),
        }
    }
}
