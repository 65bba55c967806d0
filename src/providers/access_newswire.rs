//! ACCESS Newswire (formerly ACCESSWIRE).
//!
//! Publishes an RSS feed and a public newsroom page, so it can run in either
//! feed mode. Release links on the newsroom either live under `/newsroom/`
//! or end in a long numeric release id.

use super::{Provider, collect_listing_links};
use crate::error::ProviderError;
use crate::models::{FeedItem, FeedMode, ProviderConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tracing::info;

pub const NAME: &str = "ACCESS Newswire";
pub const FEED_URL: &str = "https://www.accesswire.com/rssfeed.aspx";
pub const LISTING_URL: &str = "https://www.accessnewswire.com/newsroom";

const LOCATORS: &[&str] = &[
    "div.release-body",
    "div#annotate-release",
    "div.article-content",
    "article",
];

static RELEASE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d{6,}").expect("valid release id regex"));

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
pub struct AccessNewswire {
    config: ProviderConfig,
}

impl AccessNewswire {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for AccessNewswire {
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
            href.contains("/newsroom/") || RELEASE_ID.is_match(href)
        });
        info!(provider = NAME, count = items.len(), "Found releases on newsroom page");
        Ok(items)
    }
}
