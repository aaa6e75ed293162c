//! Site discovery: structured source analysis when the scraper can do it,
//! otherwise a bounded same-domain breadth-first crawl.

use std::collections::HashSet;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};
use url::Url;

use skein_common::{Asset, AssetCreate, AssetKind, Result};

use crate::options::IngestOptions;
use crate::router::IngestionRouter;

impl IngestionRouter {
    pub(crate) async fn handle_site_discovery(
        &self,
        base_url: String,
        infospace_id: i64,
        user_id: i64,
        options: &IngestOptions,
    ) -> Result<Vec<Asset>> {
        match self.scraper.analyze_source(&base_url).await {
            Ok(Some(analysis)) => {
                info!(base_url, "using structured source analysis");
                let mut assets = Vec::new();

                let mut create = AssetCreate::new(
                    infospace_id,
                    user_id,
                    format!(
                        "Source analysis: {}",
                        analysis.brand.clone().unwrap_or_else(|| base_url.clone())
                    ),
                    AssetKind::Text,
                );
                create.source_identifier = Some(base_url.clone());
                create.text_content = analysis.description.clone();
                create
                    .source_metadata
                    .insert("brand".into(), serde_json::json!(analysis.brand));
                create
                    .source_metadata
                    .insert("feed_urls".into(), serde_json::json!(analysis.feed_urls));
                create
                    .source_metadata
                    .insert("categories".into(), serde_json::json!(analysis.categories));
                create.source_metadata.insert(
                    "ingested_at".into(),
                    serde_json::json!(Utc::now().to_rfc3339()),
                );
                create.source_metadata.insert(
                    "ingestion_method".into(),
                    serde_json::json!("source_analysis"),
                );
                assets.push(self.store.create_asset(create).await?);

                let articles: Vec<String> = analysis
                    .recent_articles
                    .iter()
                    .take(options.max_urls)
                    .cloned()
                    .collect();
                if !articles.is_empty() {
                    let ingested = self
                        .handle_url_list(articles, infospace_id, user_id, options)
                        .await?;
                    assets.extend(ingested);
                }
                Ok(assets)
            }
            Ok(None) => {
                info!(base_url, "source analysis unavailable, crawling");
                let urls = self
                    .discover_site_urls(&base_url, options.max_depth, options.max_urls, options)
                    .await?;
                self.handle_url_list(urls, infospace_id, user_id, options)
                    .await
            }
            Err(e) => {
                warn!(base_url, error = %e, "source analysis failed, crawling");
                let urls = self
                    .discover_site_urls(&base_url, options.max_depth, options.max_urls, options)
                    .await?;
                self.handle_url_list(urls, infospace_id, user_id, options)
                    .await
            }
        }
    }

    /// Bounded breadth-first crawl: same domain only, absolute http(s)
    /// links extracted from page text.
    async fn discover_site_urls(
        &self,
        base_url: &str,
        max_depth: usize,
        max_urls: usize,
        options: &IngestOptions,
    ) -> Result<Vec<String>> {
        let base_host = Url::parse(base_url).ok().and_then(|u| u.host_str().map(String::from));

        let mut discovered: Vec<String> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![base_url.to_string()];

        for depth in 0..max_depth {
            if discovered.len() >= max_urls || frontier.is_empty() {
                break;
            }
            let mut next_frontier = Vec::new();

            for page_url in frontier {
                if discovered.len() >= max_urls {
                    break;
                }
                if !visited.insert(page_url.clone()) {
                    continue;
                }
                let page = match self.scraper.scrape_url(&page_url, options.timeout_secs).await {
                    Ok(page) => page,
                    Err(e) => {
                        warn!(url = %page_url, error = %e, "crawl fetch failed");
                        continue;
                    }
                };
                let Some(text) = page.text_content else { continue };

                for link in extract_links(&text) {
                    let same_domain = base_host.as_deref().is_some_and(|host| {
                        Url::parse(&link)
                            .ok()
                            .and_then(|u| u.host_str().map(|h| h == host))
                            .unwrap_or(false)
                    });
                    if !same_domain || visited.contains(&link) || discovered.contains(&link) {
                        continue;
                    }
                    discovered.push(link.clone());
                    next_frontier.push(link);
                    if discovered.len() >= max_urls {
                        break;
                    }
                }
            }
            info!(depth, found = discovered.len(), "crawl depth complete");
            frontier = next_frontier;
        }

        discovered.truncate(max_urls);
        Ok(discovered)
    }
}

/// Absolute http(s) links present in page text.
fn extract_links(content: &str) -> Vec<String> {
    let re = match Regex::new(r#"https?://[^\s"'<>\)\]]+"#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let mut links = Vec::new();
    for m in re.find_iter(content) {
        let link = m.as_str().trim_end_matches(['.', ',', ';']).to_string();
        if !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links() {
        let text = "Read https://example.com/a, then https://example.com/b. \
                    Ignore ftp://example.com/c and see https://other.org/x";
        let links = extract_links(text);
        assert_eq!(
            links,
            vec![
                "https://example.com/a".to_string(),
                "https://example.com/b".to_string(),
                "https://other.org/x".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_links_dedupes() {
        let text = "https://example.com/a https://example.com/a";
        assert_eq!(extract_links(text).len(), 1);
    }
}
