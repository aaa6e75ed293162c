//! RSS/Atom parsing (feed-rs), feed URL discovery from page HTML, and the
//! curated OPML catalog used by feed discovery.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub url: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub id: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub total_entries: usize,
    pub entries: Vec<FeedEntry>,
}

pub struct FeedService {
    client: reqwest::Client,
}

impl FeedService {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("Failed to build RSS HTTP client");
        Self { client }
    }

    /// Fetch and parse an RSS/Atom feed.
    pub async fn fetch(&self, feed_url: &str) -> Result<ParsedFeed> {
        let resp = self
            .client
            .get(feed_url)
            .header("User-Agent", "skein/0.1")
            .send()
            .await
            .context("RSS feed fetch failed")?;

        let bytes = resp.bytes().await.context("Failed to read RSS feed body")?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<ParsedFeed> {
        let feed = feed_rs::parser::parse(bytes).context("Failed to parse RSS/Atom feed")?;

        let total_entries = feed.entries.len();
        let entries: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter_map(|entry| {
                let url = entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))?;

                Some(FeedEntry {
                    url,
                    title: entry.title.as_ref().map(|t| t.content.clone()),
                    summary: entry.summary.as_ref().map(|s| s.content.clone()),
                    published: entry
                        .published
                        .or(entry.updated)
                        .map(|dt| dt.with_timezone(&Utc)),
                    id: entry.id,
                    authors: entry.authors.into_iter().map(|p| p.name).collect(),
                    categories: entry.categories.into_iter().map(|c| c.term).collect(),
                })
            })
            .collect();

        info!(entries = entries.len(), "feed parsed successfully");

        Ok(ParsedFeed {
            title: feed.title.map(|t| t.content),
            description: feed.description.map(|d| d.content),
            language: feed.language,
            total_entries,
            entries,
        })
    }

    /// Parse a feed and report metadata without creating anything.
    pub async fn preview(&self, feed_url: &str, max_items: usize) -> Result<ParsedFeed> {
        let mut parsed = self.fetch(feed_url).await?;
        parsed.entries.truncate(max_items);
        Ok(parsed)
    }
}

impl Default for FeedService {
    fn default() -> Self {
        Self::new()
    }
}

const FEED_MIME_TYPES: [&str; 2] = ["application/rss+xml", "application/atom+xml"];

/// Feed URLs advertised by a page's `<link>` tags. Relative hrefs are
/// resolved against the page URL.
pub fn discover_feed_urls(html: &str, page_url: &str) -> Vec<String> {
    fn link_attr(tag: &str, name: &str) -> Option<String> {
        let re = regex::Regex::new(&format!(r#"(?i){name}\s*=\s*["']([^"']*)["']"#)).ok()?;
        re.captures(tag)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    let Ok(link_tags) = regex::Regex::new(r"(?is)<link\b[^>]*>") else {
        return Vec::new();
    };
    let page = url::Url::parse(page_url).ok();

    let mut feeds: Vec<String> = Vec::new();
    for found in link_tags.find_iter(html) {
        let tag = found.as_str();
        let is_feed = link_attr(tag, "type")
            .map(|mime| FEED_MIME_TYPES.contains(&mime.as_str()))
            .unwrap_or(false);
        if !is_feed {
            continue;
        }
        let Some(href) = link_attr(tag, "href").filter(|h| !h.is_empty()) else {
            continue;
        };
        let resolved = if href.starts_with("http://") || href.starts_with("https://") {
            Some(href)
        } else {
            page.as_ref()
                .and_then(|p| p.join(&href).ok())
                .map(|u| u.to_string())
        };
        if let Some(resolved) = resolved {
            if !feeds.contains(&resolved) {
                feeds.push(resolved);
            }
        }
    }

    feeds
}

// =============================================================================
// Curated OPML catalog
// =============================================================================

const CATALOG_BASE_URL: &str =
    "https://raw.githubusercontent.com/plenaryapp/awesome-rss-feeds/master/countries/with_category";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogFeed {
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub country: String,
}

/// Country-indexed OPML catalog of curated feeds.
pub struct FeedCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl FeedCatalog {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: CATALOG_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the curated feeds for a country, optionally filtered by
    /// category, capped at `limit`.
    pub async fn discover(
        &self,
        country: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CatalogFeed>> {
        let url = format!("{}/{}.opml", self.base_url, country);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!(
                "OPML catalog fetch failed ({}) for country {country}",
                resp.status()
            ));
        }
        let content = resp.text().await?;
        let mut feeds = parse_opml(&content, country)?;
        if let Some(category) = category {
            let wanted = category.to_lowercase();
            feeds.retain(|f| {
                f.category
                    .as_deref()
                    .map(|c| c.to_lowercase().contains(&wanted))
                    .unwrap_or(false)
            });
        }
        feeds.truncate(limit);
        Ok(feeds)
    }
}

impl Default for FeedCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse OPML: nested `<outline>` groups carry the category in their
/// `text`/`title` attribute; leaves carry `xmlUrl`.
pub fn parse_opml(content: &str, country: &str) -> Result<Vec<CatalogFeed>> {
    fn outline_attrs(e: &quick_xml::events::BytesStart<'_>) -> (Option<String>, Option<String>) {
        let mut title = None;
        let mut xml_url = None;
        for attr in e.attributes().flatten() {
            let key = attr.key.as_ref().to_vec();
            let value = attr.unescape_value().unwrap_or_default().to_string();
            match key.as_slice() {
                b"text" | b"title" if title.is_none() => title = Some(value),
                b"xmlUrl" => xml_url = Some(value),
                _ => {}
            }
        }
        (title, xml_url)
    }

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    // Groups push Some(title); feed leaves that happen to have children
    // push None so the matching End pops cleanly.
    let mut category_stack: Vec<Option<String>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                let (title, xml_url) = outline_attrs(&e);
                match xml_url {
                    Some(url) => {
                        feeds.push(CatalogFeed {
                            title: title.unwrap_or_else(|| url.clone()),
                            url,
                            category: category_stack.iter().rev().find_map(|c| c.clone()),
                            country: country.to_string(),
                        });
                        category_stack.push(None);
                    }
                    None => category_stack.push(Some(title.unwrap_or_default())),
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let (title, xml_url) = outline_attrs(&e);
                if let Some(url) = xml_url {
                    feeds.push(CatalogFeed {
                        title: title.unwrap_or_else(|| url.clone()),
                        url,
                        category: category_stack.iter().rev().find_map(|c| c.clone()),
                        country: country.to_string(),
                    });
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                category_stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow!("OPML parse error: {e}")),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rss_feed() {
        let rss = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
            <title>Example Feed</title>
            <description>News</description>
            <item>
              <title>First</title>
              <link>https://example.com/1</link>
              <guid>https://example.com/1</guid>
              <pubDate>Fri, 01 Mar 2024 09:00:00 +0000</pubDate>
            </item>
            <item>
              <title>Second</title>
              <link>https://example.com/2</link>
            </item>
            </channel></rss>"#;
        let parsed = FeedService::parse(rss.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example Feed"));
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].url, "https://example.com/1");
        assert!(parsed.entries[0].published.is_some());
        assert!(parsed.entries[1].published.is_none());
    }

    #[test]
    fn test_discover_feed_urls() {
        let html = r#"
            <link rel="alternate" type="application/rss+xml" href="/feed.xml">
            <link rel="alternate" type="application/atom+xml" href="https://example.com/atom">
        "#;
        let feeds = discover_feed_urls(html, "https://example.com/page");
        assert_eq!(
            feeds,
            vec![
                "https://example.com/feed.xml".to_string(),
                "https://example.com/atom".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_opml_with_categories() {
        let opml = r#"<?xml version="1.0"?>
            <opml version="1.0"><body>
              <outline text="Technology">
                <outline text="Tech Daily" type="rss" xmlUrl="https://tech.example.com/rss"/>
              </outline>
              <outline text="Standalone" type="rss" xmlUrl="https://solo.example.com/rss"/>
            </body></opml>"#;
        let feeds = parse_opml(opml, "us").unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].category.as_deref(), Some("Technology"));
        assert_eq!(feeds[0].url, "https://tech.example.com/rss");
        assert!(feeds[1].category.is_none());
    }
}
