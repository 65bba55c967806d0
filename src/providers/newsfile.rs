//! Newsfile Corp.
//!
//! Has both a feed and a category listing page. Release URLs contain
//! `/release/` followed by a numeric id.

use super::{Provider, collect_listing_links};
use crate::error::ProviderError;
use crate::models::{FeedItem, FeedMode, ProviderConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "Newsfile";
pub const FEED_URL: &str = "https://www.newsfilecorp.com/rss";
pub const LISTING_URL: &str = "https://www.newsfilecorp.com/newscategories.php";

const LOCATORS: &[&str] = &[
    "div.article-content",
    "div#release-body",
    "div.news-content",
    "article",
];

static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+/").expect("valid segment regex"));

pub fn default_config() -> ProviderConfig {
    ProviderConfig {
        name: NAME.to_string(),
        mode: FeedMode::Rss,
        feed_url: Some(FEED_URL.to_string()),
        listing_url: Some(LISTING_URL.to_string()),
        poll_interval: Duration::from_secs(90),
    }
}

#[derive(Debug)]
pub struct Newsfile {
    config: ProviderConfig,
}

impl Newsfile {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for Newsfile {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn body_locators(&self) -> &'static [&'static str] {
        LOCATORS
    }

    fn supports_listing(&self) -> bool {
        true
    }

    fn get_listing_urls(&self, html: &str) -> Result<Vec<FeedItem>, ProviderError> {
        let base = self.config.listing_url.as_deref().unwrap_or(LISTING_URL);
        let items = collect_listing_links(html, base, |href| {
            href.contains("/release/") || NUMERIC_SEGMENT.is_match(href)
        });
        info!(provider = NAME, count = items.len(), "Found releases on listing page");
        Ok(items)
    }
}
