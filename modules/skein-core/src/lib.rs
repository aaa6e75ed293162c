//! Application wiring: the dependency container, explicit bootstrap, and
//! the descriptive provider catalog.

pub mod bootstrap;
pub mod deps;
pub mod packages;
pub mod unified;

pub use bootstrap::{build_deps, init_tracing};
pub use deps::AppDeps;
pub use unified::{ProviderCapability, ProviderMetadata, UnifiedProviderRegistry};
