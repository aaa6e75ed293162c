//! Annotation schema management. A schema's `output_contract` must be a
//! valid JSON schema, and annotation values are validated against it at
//! write time.

use std::sync::Arc;

use tracing::info;

use skein_common::{AnnotationSchema, Result, SchemaCreate, SkeinError};
use skein_store::Store;

pub struct SchemaService {
    store: Arc<dyn Store>,
}

impl SchemaService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a schema after verifying the output contract compiles as a
    /// JSON schema. Schemas are immutable per (uuid, version): there is no
    /// update path, a changed contract becomes a new version.
    pub async fn create_schema(&self, create: SchemaCreate) -> Result<AnnotationSchema> {
        validate_contract(&create.output_contract)?;
        let schema = self.store.create_schema(create).await?;
        info!(schema_id = schema.id, name = %schema.name, version = %schema.version, "created annotation schema");
        Ok(schema)
    }

    pub async fn get_schema(&self, schema_id: i64) -> Result<AnnotationSchema> {
        self.store
            .get_schema(schema_id)
            .await?
            .ok_or_else(|| SkeinError::NotFound(format!("schema {schema_id}")))
    }
}

/// Compile the contract to prove it is a valid JSON schema.
pub fn validate_contract(contract: &serde_json::Value) -> Result<()> {
    jsonschema::validator_for(contract)
        .map(|_| ())
        .map_err(|e| SkeinError::Validation(format!("output_contract is not a valid JSON schema: {e}")))
}

/// Validate an annotation value against a schema's output contract.
pub fn validate_value(contract: &serde_json::Value, value: &serde_json::Value) -> Result<()> {
    let validator = jsonschema::validator_for(contract)
        .map_err(|e| SkeinError::Validation(format!("output_contract is not a valid JSON schema: {e}")))?;
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SkeinError::Validation(format!(
            "annotation value does not match the output contract: {}",
            errors.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_common::SchemaTargetLevel;
    use skein_store::MemoryStore;

    fn contract() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "sentiment": {"type": "string", "enum": ["positive", "neutral", "negative"]},
                "confidence": {"type": "number"}
            },
            "required": ["sentiment"]
        })
    }

    #[tokio::test]
    async fn test_create_schema_validates_contract() {
        let service = SchemaService::new(Arc::new(MemoryStore::new()));

        let good = SchemaCreate {
            infospace_id: 1,
            user_id: 1,
            name: "sentiment".into(),
            version: "1.0".into(),
            description: None,
            output_contract: contract(),
            instructions: Some("Classify the sentiment.".into()),
            field_specific_justification_configs: Default::default(),
            target_level: SchemaTargetLevel::Asset,
            imported_from_uuid: None,
        };
        assert!(service.create_schema(good.clone()).await.is_ok());

        let mut bad = good;
        bad.output_contract = serde_json::json!({"type": "not-a-type"});
        assert!(service.create_schema(bad).await.is_err());
    }

    #[test]
    fn test_validate_value() {
        let contract = contract();
        assert!(validate_value(&contract, &serde_json::json!({"sentiment": "positive"})).is_ok());
        assert!(validate_value(&contract, &serde_json::json!({"sentiment": "angry"})).is_err());
        assert!(validate_value(&contract, &serde_json::json!({})).is_err());
    }
}
