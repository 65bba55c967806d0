//! PR Newswire (Cision).
//!
//! Feed-only. Release pages keep the body in `section.release-body`; some
//! older templates use a `div` with the same class.

use super::Provider;
use crate::models::{FeedMode, ProviderConfig};
use std::time::Duration;

pub const NAME: &str = "PR Newswire";
pub const FEED_URL: &str = "https://www.prnewswire.com/rss/news-releases-list.rss";

const LOCATORS: &[&str] = &["section.release-body", "div.release-body", "article"];

pub fn default_config() -> ProviderConfig {
    ProviderConfig {
        name: NAME.to_string(),
        mode: FeedMode::Rss,
        feed_url: Some(FEED_URL.to_string()),
        listing_url: None,
        poll_interval: Duration::from_secs(60),
    }
}

#[derive(Debug)]
pub struct PrNewswire {
    config: ProviderConfig,
}

impl PrNewswire {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for PrNewswire {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn body_locators(&self) -> &'static [&'static str] {
        LOCATORS
    }
}
