//! Self-describing ZIP packages (`manifest.json` + `files/`) for moving
//! assets, sources, schemas, runs, bundles and datasets between
//! instances.

pub mod builder;
pub mod importer;
pub mod package;

pub use builder::PackageBuilder;
pub use importer::{ImportOutcome, PackageImporter};
pub use package::{DataPackage, PackageMetadata, PackageType};
