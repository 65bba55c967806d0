//! Wire-service parsers.
//!
//! Every provider implements [`Provider`]. The variants only differ in where
//! their release pages keep the body text and, for the two services with a
//! public newsroom page, how release links look on that page. Everything else
//! (text extraction, ticker and image detection) lives in the trait's default
//! methods and the helpers below.
//!
//! The orchestrator holds providers as `Arc<dyn Provider>` and never needs the
//! concrete type.

pub mod access_newswire;
pub mod business_wire;
pub mod globe_newswire;
pub mod newsfile;
pub mod pr_newswire;

use crate::error::ProviderError;
use crate::models::{ArticleDraft, FeedItem, ProviderConfig};
use crate::utils::now_millis;
use clap::ValueEnum;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// `(NYSE: ABC)` / `(NASDAQ:ABCD)`; only these two exchanges count.
static TICKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\((NYSE|NASDAQ):\s*([A-Z]{1,5})\)").expect("valid ticker regex")
});
static OG_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).expect("valid og:image selector"));
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img[src]").expect("valid img selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid anchor selector"));
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").expect("valid title selector"));

/// Elements whose text never belongs to a release body.
const HIDDEN_TAGS: [&str; 3] = ["script", "style", "nav"];

/// Contract shared by all wire-service parsers.
pub trait Provider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    /// Body container selectors, most specific first, ending with `article`.
    fn body_locators(&self) -> &'static [&'static str];

    /// Turn a fetched release page into a draft.
    ///
    /// # Arguments
    ///
    /// * `url` - Where the page came from; used for the draft and to resolve
    ///   relative image links
    /// * `html` - The raw page
    /// * `item` - The feed or listing entry that pointed here; supplies the
    ///   title (page `<title>` when blank) and publication time
    ///
    /// # Returns
    ///
    /// `None` when the page has no recognizable body or the body holds no
    /// text. Never panics on malformed HTML. A draft with no tickers is still
    /// returned; filtering is the caller's job.
    fn parse_article(&self, url: &str, html: &str, item: &FeedItem) -> Option<ArticleDraft> {
        if html.trim().is_empty() {
            warn!(provider = self.name(), %url, "Empty page body");
            return None;
        }

        let document = Html::parse_document(html);
        let Some(body) = locate_body(&document, self.body_locators()) else {
            warn!(provider = self.name(), %url, "No body container matched");
            return None;
        };

        let article_text = visible_text(body);
        if article_text.is_empty() {
            warn!(provider = self.name(), %url, "No article text extracted");
            return None;
        }

        let tickers = self.extract_tickers(&article_text);
        let image_url = self.extract_image(&document, Some(body), url);
        let title = match item.title.trim() {
            "" => page_title(&document).unwrap_or_default(),
            t => t.to_string(),
        };

        debug!(
            provider = self.name(),
            %url,
            chars = article_text.len(),
            tickers = ?tickers,
            "Parsed release page"
        );

        Some(ArticleDraft {
            url: url.to_string(),
            title,
            published_at_ms: item.published_at_ms,
            provider: self.name().to_string(),
            provider_url: url.to_string(),
            image_url,
            article_text,
            tickers,
        })
    }

    /// Exchange-qualified symbols in first-seen order, without duplicates.
    fn extract_tickers(&self, text: &str) -> Vec<String> {
        extract_tickers(text)
    }

    /// `og:image` when present, else the first image inside the body.
    fn extract_image(&self, document: &Html, body: Option<ElementRef<'_>>, page_url: &str) -> Option<String> {
        let og = document
            .select(&OG_IMAGE)
            .filter_map(|m| m.value().attr("content"))
            .map(str::trim)
            .find(|c| !c.is_empty());
        let src = og.or_else(|| {
            body.and_then(|b| {
                b.select(&IMG)
                    .filter_map(|img| img.value().attr("src"))
                    .map(str::trim)
                    .find(|s| !s.is_empty())
            })
        })?;
        Some(resolve_link(page_url, src).unwrap_or_else(|| src.to_string()))
    }

    fn supports_listing(&self) -> bool {
        false
    }

    /// Release links found on the provider's listing page.
    ///
    /// Feed-only providers answer with [`ProviderError::ListingUnsupported`].
    fn get_listing_urls(&self, _html: &str) -> Result<Vec<FeedItem>, ProviderError> {
        Err(ProviderError::ListingUnsupported {
            provider: self.name().to_string(),
        })
    }
}

/// The five supported wire services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    PrNewswire,
    GlobeNewswire,
    BusinessWire,
    AccessNewswire,
    Newsfile,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::PrNewswire,
        ProviderKind::GlobeNewswire,
        ProviderKind::BusinessWire,
        ProviderKind::AccessNewswire,
        ProviderKind::Newsfile,
    ];

    /// Built-in name, URLs and cadence for this service.
    pub fn default_config(self) -> ProviderConfig {
        match self {
            ProviderKind::PrNewswire => pr_newswire::default_config(),
            ProviderKind::GlobeNewswire => globe_newswire::default_config(),
            ProviderKind::BusinessWire => business_wire::default_config(),
            ProviderKind::AccessNewswire => access_newswire::default_config(),
            ProviderKind::Newsfile => newsfile::default_config(),
        }
    }

    pub fn build(self, config: ProviderConfig) -> Arc<dyn Provider> {
        match self {
            ProviderKind::PrNewswire => Arc::new(pr_newswire::PrNewswire::new(config)),
            ProviderKind::GlobeNewswire => Arc::new(globe_newswire::GlobeNewswire::new(config)),
            ProviderKind::BusinessWire => Arc::new(business_wire::BusinessWire::new(config)),
            ProviderKind::AccessNewswire => Arc::new(access_newswire::AccessNewswire::new(config)),
            ProviderKind::Newsfile => Arc::new(newsfile::Newsfile::new(config)),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderKind::PrNewswire => "pr_newswire",
            ProviderKind::GlobeNewswire => "globe_newswire",
            ProviderKind::BusinessWire => "business_wire",
            ProviderKind::AccessNewswire => "access_newswire",
            ProviderKind::Newsfile => "newsfile",
        };
        f.write_str(s)
    }
}

pub fn extract_tickers(text: &str) -> Vec<String> {
    TICKER
        .captures_iter(text)
        .filter_map(|c| c.get(2))
        .map(|m| m.as_str().to_string())
        .unique()
        .collect()
}

/// First element matching any of `locators`, tried in order.
fn locate_body<'a>(document: &'a Html, locators: &[&str]) -> Option<ElementRef<'a>> {
    locators
        .iter()
        .filter_map(|css| Selector::parse(css).ok())
        .find_map(|sel| document.select(&sel).next())
}

/// Trimmed, non-empty text nodes of `body` joined by newlines, skipping
/// anything nested in a script, style or nav element.
pub fn visible_text(body: ElementRef<'_>) -> String {
    body.descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node
                .ancestors()
                .take_while(|a| a.id() != body.id())
                .filter_map(|a| a.value().as_element())
                .any(|el| HIDDEN_TAGS.contains(&el.name()));
            if hidden {
                return None;
            }
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .join("\n")
}

fn page_title(document: &Html) -> Option<String> {
    document
        .select(&PAGE_TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn resolve_link(base: &str, href: &str) -> Option<String> {
    Url::parse(base).ok()?.join(href).ok().map(|u| u.to_string())
}

/// Collect release links from a listing page.
///
/// Anchors need non-empty text and an `href` accepted by `is_release`.
/// Relative links resolve against `base`. Each link appears once, in page
/// order, stamped with the current time and using the link as its guid.
pub fn collect_listing_links(html: &str, base: &str, is_release: impl Fn(&str) -> bool) -> Vec<FeedItem> {
    let document = Html::parse_document(html);
    let published_at_ms = now_millis();

    document
        .select(&ANCHOR)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            if !is_release(href) {
                return None;
            }
            let title = a.text().collect::<String>().trim().to_string();
            if title.is_empty() {
                return None;
            }
            let link = if href.starts_with("http") {
                href.to_string()
            } else {
                resolve_link(base, href)?
            };
            Some((title, link))
        })
        .unique_by(|(_, link)| link.clone())
        .map(|(title, link)| FeedItem {
            title,
            description: String::new(),
            published_at_ms,
            guid: link.clone(),
            link,
        })
        .collect()
}
