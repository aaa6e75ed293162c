//! Scraping provider: a plain HTTP fetcher with HTML-to-text conversion
//! and metadata extraction, plus an optional language-model wrapper that
//! adds structured source analysis.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use ai_client::{ChatMessage, GenerationRequest, ModelRegistryService, StructuredOutput};

/// Everything one scrape yields. `text_content` empty or `None` means the
/// scrape produced nothing usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub text_content: Option<String>,
    pub publication_date: Option<String>,
    pub top_image: Option<String>,
    pub images: Vec<String>,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub keywords: Vec<String>,
    pub scraped_at: Option<String>,
    pub scraping_method: Option<String>,
}

/// Structured output of `analyze_source` for providers that support it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SourceAnalysis {
    pub brand: Option<String>,
    pub description: Option<String>,
    pub feed_urls: Vec<String>,
    pub recent_articles: Vec<String>,
    pub categories: Vec<String>,
}

#[async_trait]
pub trait ScrapingProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn scrape_url(&self, url: &str, timeout_secs: u64) -> Result<ScrapedPage>;

    /// Bulk scrape with bounded concurrency; results stay in input order
    /// and per-item failures are isolated.
    async fn scrape_urls_bulk(
        &self,
        urls: &[String],
        max_threads: usize,
    ) -> Vec<Result<ScrapedPage>> {
        futures::stream::iter(urls.to_vec())
            .map(|url| async move { self.scrape_url(&url, 30).await })
            .buffered(max_threads.max(1))
            .collect()
            .await
    }

    /// Structured source analysis; `None` when the provider cannot do it
    /// (callers fall back to a bounded crawl).
    async fn analyze_source(&self, _base_url: &str) -> Result<Option<SourceAnalysis>> {
        Ok(None)
    }

    /// RSS/Atom feed URLs advertised by a page.
    async fn discover_feeds(&self, base_url: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Plain HTTP scraper
// =============================================================================

pub struct HttpScraper {
    http: reqwest::Client,
}

impl HttpScraper {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build scraper HTTP client");
        Self { http }
    }

    fn html_to_text(html: &str) -> String {
        html2text::from_read(html.as_bytes(), 120).unwrap_or_default()
    }

    fn meta_content(html: &str, attr: &str, name: &str) -> Option<String> {
        let pattern = format!(
            r#"(?is)<meta[^>]+{attr}\s*=\s*["']{name}["'][^>]*content\s*=\s*["']([^"']+)["']"#,
            attr = attr,
            name = regex::escape(name)
        );
        let re = Regex::new(&pattern).ok()?;
        if let Some(cap) = re.captures(html) {
            return cap.get(1).map(|m| m.as_str().trim().to_string());
        }
        // content attribute can also precede the name/property attribute.
        let reversed = format!(
            r#"(?is)<meta[^>]+content\s*=\s*["']([^"']+)["'][^>]*{attr}\s*=\s*["']{name}["']"#,
            attr = attr,
            name = regex::escape(name)
        );
        Regex::new(&reversed)
            .ok()?
            .captures(html)
            .and_then(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
    }

    fn extract_title(html: &str) -> Option<String> {
        if let Some(title) = Self::meta_content(html, "property", "og:title") {
            return Some(title);
        }
        let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
        re.captures(html)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn extract_images(html: &str, base_url: &str) -> Vec<String> {
        let re = match Regex::new(r#"(?i)<img[^>]+src\s*=\s*["']([^"']+)["']"#) {
            Ok(re) => re,
            Err(_) => return Vec::new(),
        };
        let base = url::Url::parse(base_url).ok();
        let mut images = Vec::new();
        for cap in re.captures_iter(html) {
            let Some(src) = cap.get(1) else { continue };
            let src = src.as_str();
            let absolute = if src.starts_with("http://") || src.starts_with("https://") {
                Some(src.to_string())
            } else {
                base.as_ref()
                    .and_then(|b| b.join(src).ok())
                    .map(|u| u.to_string())
            };
            if let Some(absolute) = absolute {
                if !images.contains(&absolute) {
                    images.push(absolute);
                }
            }
        }
        images
    }
}

impl Default for HttpScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScrapingProvider for HttpScraper {
    fn name(&self) -> &str {
        "http"
    }

    async fn scrape_url(&self, url: &str, timeout_secs: u64) -> Result<ScrapedPage> {
        info!(url, scraper = "http", "scraping URL");

        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(timeout_secs))
            .header("User-Agent", "skein/0.1")
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("Fetch failed ({}) for {url}", response.status()));
        }

        let html = response.text().await?;
        let text = Self::html_to_text(&html);
        let text = text.trim();

        if text.is_empty() {
            warn!(url, "empty text after HTML conversion");
        } else {
            info!(url, bytes = text.len(), "scraped successfully");
        }

        Ok(ScrapedPage {
            url: url.to_string(),
            title: Self::extract_title(&html),
            text_content: (!text.is_empty()).then(|| text.to_string()),
            publication_date: Self::meta_content(&html, "property", "article:published_time")
                .or_else(|| Self::meta_content(&html, "name", "date")),
            top_image: Self::meta_content(&html, "property", "og:image"),
            images: Self::extract_images(&html, url),
            summary: Self::meta_content(&html, "name", "description")
                .or_else(|| Self::meta_content(&html, "property", "og:description")),
            authors: Self::meta_content(&html, "name", "author")
                .map(|a| vec![a])
                .unwrap_or_default(),
            keywords: Self::meta_content(&html, "name", "keywords")
                .map(|k| k.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
            scraped_at: Some(Utc::now().to_rfc3339()),
            scraping_method: Some("http".to_string()),
        })
    }

    async fn discover_feeds(&self, base_url: &str) -> Result<Vec<String>> {
        let response = self
            .http
            .get(base_url)
            .header("User-Agent", "skein/0.1")
            .send()
            .await?;
        let html = response.text().await?;
        Ok(crate::feeds::discover_feed_urls(&html, base_url))
    }
}

// =============================================================================
// Source-analysis wrapper
// =============================================================================

/// Decorates a scraper with `analyze_source` backed by a language model:
/// the page text goes in, a [`SourceAnalysis`] comes out as structured
/// output.
pub struct AnalyzingScraper {
    inner: Arc<dyn ScrapingProvider>,
    registry: Arc<ModelRegistryService>,
    model: String,
}

impl AnalyzingScraper {
    pub fn new(
        inner: Arc<dyn ScrapingProvider>,
        registry: Arc<ModelRegistryService>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            registry,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ScrapingProvider for AnalyzingScraper {
    fn name(&self) -> &str {
        "analyzing"
    }

    async fn scrape_url(&self, url: &str, timeout_secs: u64) -> Result<ScrapedPage> {
        self.inner.scrape_url(url, timeout_secs).await
    }

    async fn scrape_urls_bulk(
        &self,
        urls: &[String],
        max_threads: usize,
    ) -> Vec<Result<ScrapedPage>> {
        self.inner.scrape_urls_bulk(urls, max_threads).await
    }

    async fn analyze_source(&self, base_url: &str) -> Result<Option<SourceAnalysis>> {
        let page = self.inner.scrape_url(base_url, 30).await?;
        let Some(text) = page.text_content else {
            return Ok(None);
        };

        let prompt = format!(
            "Analyze this news source homepage and report its brand, a short \
             description, any RSS/Atom feed URLs, recent article URLs, and \
             content categories.\n\nURL: {base_url}\n\n{}",
            ai_client::util::truncate_to_char_boundary(&text, 20_000)
        );
        let request = GenerationRequest::new(&self.model, vec![ChatMessage::user(prompt)])
            .response_format(SourceAnalysis::output_schema());

        let response = self.registry.generate(request, None, None).await?;
        let analysis: SourceAnalysis = serde_json::from_str(&response.content)
            .with_context(|| "source analysis did not match the expected schema")?;
        Ok(Some(analysis))
    }

    async fn discover_feeds(&self, base_url: &str) -> Result<Vec<String>> {
        self.inner.discover_feeds(base_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
        <html><head>
        <title>Fallback Title</title>
        <meta property="og:title" content="The Big Story" />
        <meta property="og:image" content="https://cdn.example.com/hero.jpg" />
        <meta name="description" content="A summary." />
        <meta property="article:published_time" content="2024-03-01T09:00:00Z" />
        </head><body>
        <img src="/images/a.png"><img src="https://cdn.example.com/b.png">
        <p>Body text.</p>
        </body></html>
    "#;

    #[test]
    fn test_extract_title_prefers_og() {
        assert_eq!(
            HttpScraper::extract_title(HTML).as_deref(),
            Some("The Big Story")
        );
    }

    #[test]
    fn test_meta_extraction() {
        assert_eq!(
            HttpScraper::meta_content(HTML, "property", "og:image").as_deref(),
            Some("https://cdn.example.com/hero.jpg")
        );
        assert_eq!(
            HttpScraper::meta_content(HTML, "name", "description").as_deref(),
            Some("A summary.")
        );
    }

    #[test]
    fn test_images_absolutized_and_deduped() {
        let images = HttpScraper::extract_images(HTML, "https://example.com/story");
        assert_eq!(
            images,
            vec![
                "https://example.com/images/a.png".to_string(),
                "https://cdn.example.com/b.png".to_string(),
            ]
        );
    }
}
