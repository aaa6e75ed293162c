//! Package transfer entry points: export and import wired into the app
//! dependencies, including the post-import processing trigger.

use skein_common::{Asset, Result};
use skein_ingest::process_content;
use skein_package::{DataPackage, ImportOutcome, PackageBuilder, PackageImporter};
use tracing::{info, warn};

use crate::deps::AppDeps;

pub fn package_builder(deps: &AppDeps) -> PackageBuilder {
    PackageBuilder::new(
        deps.store.clone(),
        deps.storage.clone(),
        &deps.config.instance_id,
    )
}

pub fn package_importer(deps: &AppDeps, infospace_id: i64, user_id: i64) -> PackageImporter {
    PackageImporter::new(deps.store.clone(), deps.storage.clone(), infospace_id, user_id)
}

/// Import a package and then run content processing on every imported
/// asset whose kind requires it.
pub async fn import_and_process(
    deps: &AppDeps,
    infospace_id: i64,
    user_id: i64,
    package: &DataPackage,
) -> Result<ImportOutcome> {
    let mut importer = package_importer(deps, infospace_id, user_id);
    let outcome = importer.import_package(package).await?;

    for asset in &outcome.assets_needing_processing {
        let mut asset: Asset = asset.clone();
        if deps.processors.get_processor(&asset).is_none() {
            warn!(asset_id = asset.id, kind = %asset.kind, "no processor registered for imported asset");
            continue;
        }
        let ctx = skein_ingest::ProcessorContext {
            store: deps.store.clone(),
            storage: deps.storage.clone(),
            scraper: Some(deps.scraper.clone()),
            options: Default::default(),
        };
        match process_content(&mut asset, &deps.processors, &ctx).await {
            Ok(children) => {
                info!(asset_id = asset.id, children = children.len(), "processed imported asset")
            }
            Err(e) => warn!(asset_id = asset.id, error = %e, "processing imported asset failed"),
        }
    }

    Ok(outcome)
}
