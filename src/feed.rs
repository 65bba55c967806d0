//! RSS / Atom polling with per-feed guid deduplication.
//!
//! A [`FeedReader`] is bound to one feed URL and remembers every guid it has
//! handed out for the lifetime of the process. Items are marked seen at the
//! moment they are returned, before the caller has done anything with them,
//! so an item whose processing later fails will not come back from this
//! reader.

use crate::error::FeedError;
use crate::fetcher::Fetcher;
use crate::models::FeedItem;
use crate::utils::now_millis;
use chrono::DateTime;
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Element text, ignoring any attributes (`<guid isPermaLink="false">`).
#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

impl TextNode {
    fn text(&self) -> &str {
        self.value.trim()
    }
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<TextNode>,
    link: Option<TextNode>,
    description: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<TextNode>,
    guid: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    id: Option<TextNode>,
    summary: Option<TextNode>,
    published: Option<TextNode>,
    updated: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

pub struct FeedReader {
    fetcher: Arc<Fetcher>,
    url: String,
    seen_guids: HashSet<String>,
}

impl FeedReader {
    pub fn new(fetcher: Arc<Fetcher>, url: impl Into<String>) -> Self {
        Self {
            fetcher,
            url: url.into(),
            seen_guids: HashSet::new(),
        }
    }

    /// Fetch the feed and return the items this reader has not returned before,
    /// in feed order.
    ///
    /// # Returns
    ///
    /// New items only; they are marked seen before this returns. A transport
    /// or status failure is [`FeedError::Fetch`], a document that is neither
    /// RSS nor Atom is [`FeedError::Malformed`]. Neither changes the seen set.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let mut reader = FeedReader::new(fetcher, "https://www.prnewswire.com/rss/news-releases-list.rss");
    /// let first = reader.fetch_new_items().await?;
    /// let again = reader.fetch_new_items().await?; // empty unless the feed moved
    /// ```
    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    pub async fn fetch_new_items(&mut self) -> Result<Vec<FeedItem>, FeedError> {
        let xml = self.fetcher.get(&self.url).await?;
        let items = parse_feed(&xml, &self.url)?;
        let total = items.len();
        let fresh = self.take_unseen(items);
        info!(total, new = fresh.len(), "Polled feed");
        Ok(fresh)
    }

    fn take_unseen(&mut self, items: Vec<FeedItem>) -> Vec<FeedItem> {
        items
            .into_iter()
            .filter(|item| self.seen_guids.insert(item.guid.clone()))
            .collect()
    }
}

/// Parse an RSS 2.0 or Atom document into feed items.
///
/// Items without a link are skipped. A missing guid falls back to the link,
/// a missing or unparsable date to the current time.
pub fn parse_feed(xml: &str, url: &str) -> Result<Vec<FeedItem>, FeedError> {
    let clean = scrub_html_entities_for_xml(xml);

    let rss_err = match from_str::<Rss>(&clean) {
        Ok(rss) => return Ok(rss.channel.items.into_iter().filter_map(rss_item).collect()),
        Err(e) => e,
    };
    match from_str::<Atom>(&clean) {
        Ok(atom) if !atom.entries.is_empty() || clean.contains("<feed") => {
            Ok(atom.entries.into_iter().filter_map(atom_entry).collect())
        }
        _ => Err(FeedError::Malformed {
            url: url.to_string(),
            reason: rss_err.to_string(),
        }),
    }
}

fn rss_item(item: RssItem) -> Option<FeedItem> {
    let link = text_of(&item.link);
    if link.is_empty() {
        return None;
    }
    let guid = match text_of(&item.guid) {
        g if g.is_empty() => link.clone(),
        g => g,
    };
    Some(FeedItem {
        title: text_of(&item.title),
        description: text_of(&item.description),
        published_at_ms: parse_timestamp(item.pub_date.as_ref().map(TextNode::text)),
        guid,
        link,
    })
}

fn atom_entry(entry: AtomEntry) -> Option<FeedItem> {
    let link = entry
        .links
        .iter()
        .find(|l| l.rel.as_deref().is_none_or(|r| r == "alternate"))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|l| !l.is_empty())?;
    let guid = match text_of(&entry.id) {
        g if g.is_empty() => link.clone(),
        g => g,
    };
    let date = entry.published.as_ref().or(entry.updated.as_ref()).map(TextNode::text);
    Some(FeedItem {
        title: text_of(&entry.title),
        description: text_of(&entry.summary),
        published_at_ms: parse_timestamp(date),
        guid,
        link,
    })
}

fn text_of(node: &Option<TextNode>) -> String {
    node.as_ref().map(|n| n.text().to_string()).unwrap_or_default()
}

/// RFC 2822 (RSS) or RFC 3339 (Atom) to epoch millis; now when absent.
fn parse_timestamp(raw: Option<&str>) -> i64 {
    raw.filter(|s| !s.is_empty())
        .and_then(|s| {
            DateTime::parse_from_rfc2822(s)
                .or_else(|_| DateTime::parse_from_rfc3339(s))
                .ok()
        })
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(now_millis)
}

/// `&name;` references; numeric ones (`&#233;`) are left to the XML parser.
static NAMED_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]{0,31});").expect("valid entity regex"));

const XML_ENTITIES: [&str; 5] = ["amp", "lt", "gt", "quot", "apos"];

/// Rewrite HTML named entities, which XML parsers reject, into plain text.
///
/// The common typographic ones map to ASCII. Any other HTML5 entity is
/// decoded; a name that is not an entity at all is kept as literal text.
fn scrub_html_entities_for_xml(s: &str) -> String {
    let ascii = s
        .replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...");

    NAMED_ENTITY
        .replace_all(&ascii, |caps: &Captures<'_>| {
            let name = &caps[1];
            if XML_ENTITIES.contains(&name) {
                return caps[0].to_string();
            }
            match resolve_html5_entity(name) {
                Some(text) => text.replace('&', "&amp;").replace('<', "&lt;"),
                None => format!("&amp;{name};"),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::HttpSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RSS_ONE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Press Releases</title>
    <link>https://wire.test</link>
    <item>
      <title>Acme&nbsp;Announces Buyback</title>
      <link>https://wire.test/r/1</link>
      <description><![CDATA[<p>Acme (NYSE: ACME)</p>]]></description>
      <pubDate>Tue, 03 Jun 2025 13:30:00 GMT</pubDate>
      <guid isPermaLink="false">acme-1</guid>
      <dc:creator>Acme</dc:creator>
    </item>
    <item>
      <title>No Guid Release</title>
      <link>https://wire.test/r/2</link>
    </item>
  </channel>
</rss>"#;

    const RSS_TWO: &str = r#"<rss version="2.0"><channel>
    <item><title>Third</title><link>https://wire.test/r/3</link><guid>acme-3</guid></item>
    <item><title>Acme Announces Buyback</title><link>https://wire.test/r/1</link><guid>acme-1</guid></item>
    </channel></rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let items = parse_feed(RSS_ONE, "u").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].title, "Acme Announces Buyback");
        assert_eq!(items[0].guid, "acme-1");
        assert_eq!(items[0].published_at_ms, 1_748_957_400_000);
        assert_eq!(items[0].description, "<p>Acme (NYSE: ACME)</p>");
        assert_eq!(items[1].guid, "https://wire.test/r/2");
    }

    #[test]
    fn test_missing_date_defaults_to_now() {
        let before = now_millis();
        let items = parse_feed(RSS_ONE, "u").unwrap();
        assert!(items[1].published_at_ms >= before);
    }

    #[test]
    fn test_parse_atom_entries() {
        let atom = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Releases</title>
  <entry>
    <title type="html">Zeta Prices Offering</title>
    <link rel="alternate" href="https://wire.test/a/9"/>
    <id>tag:wire.test,2025:9</id>
    <updated>2025-06-03T13:30:00Z</updated>
    <summary>Zeta (NASDAQ: ZETA)</summary>
  </entry>
</feed>"#;
        let items = parse_feed(atom, "u").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].link, "https://wire.test/a/9");
        assert_eq!(items[0].guid, "tag:wire.test,2025:9");
        assert_eq!(items[0].published_at_ms, 1_748_957_400_000);
    }

    #[test]
    fn test_unknown_html_entities_do_not_sink_the_feed() {
        let rss = r#"<rss version="2.0"><channel>
    <item><title>Caf&eacute; Corp &bull; Q2 (NYSE: CAFE)</title><link>https://wire.test/r/7</link></item>
    <item><title>Fine &amp; Dandy &notanentity; Inc</title><link>https://wire.test/r/8</link></item>
    <item><title>Acme&reg; &lt;Update&gt;</title><link>https://wire.test/r/9</link></item>
    </channel></rss>"#;
        let items = parse_feed(rss, "u").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].title, "Café Corp • Q2 (NYSE: CAFE)");
        assert_eq!(items[1].title, "Fine & Dandy &notanentity; Inc");
        assert_eq!(items[2].title, "Acme® <Update>");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = parse_feed("<html><body>not a feed</body></html>", "u").unwrap_err();
        assert!(matches!(err, FeedError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_guid_never_returned_twice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS_ONE))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RSS_TWO))
            .mount(&server)
            .await;

        let fetcher = Arc::new(Fetcher::new(&HttpSettings::default()).unwrap());
        let mut reader = FeedReader::new(fetcher, format!("{}/feed", server.uri()));

        let first = reader.fetch_new_items().await.unwrap();
        assert_eq!(first.len(), 2);

        let second = reader.fetch_new_items().await.unwrap();
        assert!(second.is_empty());

        let third = reader.fetch_new_items().await.unwrap();
        let guids: Vec<_> = third.iter().map(|i| i.guid.as_str()).collect();
        assert_eq!(guids, vec!["acme-3"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let fetcher = Arc::new(Fetcher::new(&HttpSettings::default()).unwrap());
        let mut reader = FeedReader::new(fetcher, format!("{}/feed", server.uri()));
        assert!(matches!(reader.fetch_new_items().await, Err(FeedError::Fetch(_))));
    }
}
