//! Business Wire.
//!
//! Feed-only. Story text sits in `div.bw-release-story`; the mobile
//! template uses `div.bwNewRelease` and a few syndication partners only
//! mark it with `role="article"`.

use super::Provider;
use crate::models::{FeedMode, ProviderConfig};
use std::time::Duration;

pub const NAME: &str = "Business Wire";
pub const FEED_URL: &str = "https://feed.businesswire.com/rss/home/?rss=G1QFDERJXkJeEFpRWg==";

const LOCATORS: &[&str] = &[
    "div.bw-release-story",
    "div.bwNewRelease",
    "div[role=article]",
    "article",
];

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
pub struct BusinessWire {
    config: ProviderConfig,
}

impl BusinessWire {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for BusinessWire {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn body_locators(&self) -> &'static [&'static str] {
        LOCATORS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeedItem;

    #[test]
    fn test_role_article_locator() {
        let html = r#"<html><body>
            <div role="article"><p>Gamma Inc. (NYSE:GMA) raises full-year guidance.</p></div>
          </body></html>"#;
        let item = FeedItem {
            title: "Gamma raises guidance".into(),
            link: "https://www.businesswire.com/news/home/1/en".into(),
            description: String::new(),
            published_at_ms: 0,
            guid: "1".into(),
        };
        let draft = BusinessWire::new(default_config())
            .parse_article(&item.link, html, &item)
            .unwrap();
        assert_eq!(draft.tickers, vec!["GMA"]);
        assert_eq!(draft.article_text, "Gamma Inc. (NYSE:GMA) raises full-year guidance.");
    }
}
