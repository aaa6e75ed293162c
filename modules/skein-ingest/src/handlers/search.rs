//! Search-query handler: one WEB asset per result, stamped with search
//! provenance.

use tracing::{error, info};

use skein_common::{Asset, Result, SkeinError};

use crate::options::IngestOptions;
use crate::router::IngestionRouter;

impl IngestionRouter {
    pub(crate) async fn handle_search_query(
        &self,
        query: String,
        infospace_id: i64,
        user_id: i64,
        options: &IngestOptions,
    ) -> Result<Vec<Asset>> {
        let provider = self
            .search
            .get_default_provider(None)
            .ok_or_else(|| SkeinError::Validation("No search provider available".into()))?;

        let results = provider
            .search(&query, options.limit)
            .await
            .map_err(|e| SkeinError::provider(provider.name(), e.to_string()))?;

        let mut scoped_options = options.clone();
        scoped_options.scrape_immediately = options.scrape_content;

        let mut assets = Vec::new();
        for (rank, result) in results.iter().enumerate() {
            let title = format!("{} (Search: {query})", result.title);
            let mut asset = match self
                .handle_web_page(
                    result.url.clone(),
                    infospace_id,
                    user_id,
                    Some(title),
                    &scoped_options,
                )
                .await
            {
                Ok(asset) => asset,
                Err(e) => {
                    error!(url = %result.url, error = %e, "failed to create asset from search result");
                    continue;
                }
            };

            asset
                .source_metadata
                .insert("search_query".into(), serde_json::json!(query));
            asset.source_metadata.insert(
                "search_provider".into(),
                serde_json::json!(result.provider),
            );
            asset
                .source_metadata
                .insert("search_score".into(), serde_json::json!(result.score));
            asset
                .source_metadata
                .insert("search_rank".into(), serde_json::json!(rank + 1));
            self.store.update_asset(&asset).await?;

            assets.push(asset);
        }

        info!(query, count = assets.len(), "search ingestion completed");
        Ok(assets)
    }
}
