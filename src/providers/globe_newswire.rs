//! GlobeNewswire (Notified).
//!
//! Feed-only. Current pages use `div.main-body-container`; releases
//! distributed before the Notified rebrand still carry `div.notified-body`
//! or `div.article-body`.

use super::Provider;
use crate::models::{FeedMode, ProviderConfig};
use std::time::Duration;

pub const NAME: &str = "GlobeNewswire";
pub const FEED_URL: &str = "https://www.globenewswire.com/RssFeed/subjectcode/72-Press+Releases/feedTitle/GlobeNewswire+-+Press+Releases";

const LOCATORS: &[&str] = &[
    "div.main-body-container",
    "div.notified-body",
    "div.article-body",
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
pub struct GlobeNewswire {
    config: ProviderConfig,
}

impl GlobeNewswire {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

impl Provider for GlobeNewswire {
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
    fn test_falls_back_to_legacy_container() {
        let html = r#"<html><body>
            <div class="notified-body"><p>Beta Bio (NASDAQ: BBIO) reports topline Phase 3 data.</p></div>
          </body></html>"#;
        let item = FeedItem {
            title: "Beta Bio Phase 3".into(),
            link: "https://www.globenewswire.com/news-release/1".into(),
            description: String::new(),
            published_at_ms: 0,
            guid: "1".into(),
        };
        let draft = GlobeNewswire::new(default_config())
            .parse_article(&item.link, html, &item)
            .unwrap();
        assert_eq!(draft.tickers, vec!["BBIO"]);
        assert_eq!(draft.provider, NAME);
    }
}
