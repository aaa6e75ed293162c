//! Structured annotation: schema contracts, run lifecycle, and the
//! executor that turns provider output into validated annotations.

pub mod executor;
pub mod run;
pub mod schema;

pub use executor::{AnnotationExecutor, Generator, RegistryGenerator};
pub use run::RunService;
pub use schema::SchemaService;
