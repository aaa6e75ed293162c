//! The annotation executor: feeds asset content and a schema contract to
//! a language model and persists validated, justified annotations.
//!
//! Provider failures fail the single annotation, never the run; the run
//! ends COMPLETED or COMPLETED_WITH_ERRORS accordingly. A pause request
//! is honored between items.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use ai_client::{
    ChatMessage, GenerationRequest, GenerationResponse, ModelRegistryService, RuntimeApiKeys,
};
use skein_common::{
    Annotation, AnnotationCreate, AnnotationRun, AnnotationSchema, AnnotationStatus, Asset,
    JustificationCreate, Result, RunStatus, SkeinError,
};
use skein_store::Store;

use crate::run::RunService;
use crate::schema::validate_value;

const DEFAULT_CONTEXT_WINDOW: usize = 4000;

/// The slice of the provider contract the executor consumes. Kept narrow
/// so tests can script responses without a network.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse>;
}

/// Production generator backed by the model registry.
pub struct RegistryGenerator {
    registry: Arc<ModelRegistryService>,
    runtime_api_keys: Option<RuntimeApiKeys>,
}

impl RegistryGenerator {
    pub fn new(registry: Arc<ModelRegistryService>, runtime_api_keys: Option<RuntimeApiKeys>) -> Self {
        Self {
            registry,
            runtime_api_keys,
        }
    }
}

#[async_trait]
impl Generator for RegistryGenerator {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        self.registry
            .generate(request, None, self.runtime_api_keys.as_ref())
            .await
    }
}

pub struct AnnotationExecutor {
    store: Arc<dyn Store>,
    generator: Arc<dyn Generator>,
    runs: RunService,
}

impl AnnotationExecutor {
    pub fn new(store: Arc<dyn Store>, generator: Arc<dyn Generator>) -> Self {
        Self {
            runs: RunService::new(store.clone()),
            store,
            generator,
        }
    }

    /// Execute a run across its target assets and schemas.
    pub async fn execute_run(&self, run_id: i64) -> Result<AnnotationRun> {
        let run = self.runs.transition(run_id, RunStatus::Running, None).await?;

        let Some(model) = run
            .configuration
            .get("model")
            .and_then(|m| m.as_str())
            .map(String::from)
        else {
            self.runs
                .transition(run_id, RunStatus::Failed, Some("no model configured".into()))
                .await?;
            return Err(SkeinError::Validation(format!(
                "run {run_id} has no model in its configuration"
            )));
        };

        let mut errors = 0usize;
        let mut produced = 0usize;

        'assets: for &asset_id in &run.target_asset_ids {
            // Honor pause requests between items.
            let current = self.runs.get_run(run_id).await?;
            if current.status == RunStatus::Paused {
                info!(run_id, "run paused, stopping between items");
                return Ok(current);
            }

            let Some(asset) = self.store.get_asset(asset_id).await? else {
                warn!(run_id, asset_id, "target asset missing, skipping");
                errors += 1;
                continue 'assets;
            };

            for &schema_id in &run.target_schema_ids {
                let Some(schema) = self.store.get_schema(schema_id).await? else {
                    warn!(run_id, schema_id, "target schema missing, skipping");
                    errors += 1;
                    continue;
                };

                match self.annotate_one(&run, &asset, &schema, &model).await {
                    Ok(_) => produced += 1,
                    Err(e) => {
                        warn!(run_id, asset_id, schema_id, error = %e, "annotation failed");
                        errors += 1;
                        // Record the failure so the (asset, schema, run)
                        // slot reflects what happened.
                        let _ = self
                            .store
                            .create_annotation(AnnotationCreate {
                                infospace_id: run.infospace_id,
                                user_id: run.user_id,
                                asset_id: asset.id,
                                schema_id: schema.id,
                                run_id: Some(run.id),
                                value: serde_json::json!({}),
                                status: AnnotationStatus::Failed,
                                error_message: Some(e.to_string()),
                                region: None,
                                links: None,
                                event_timestamp: None,
                                imported_from_uuid: None,
                            })
                            .await;
                    }
                }
            }
        }

        let final_status = if errors == 0 {
            RunStatus::Completed
        } else {
            RunStatus::CompletedWithErrors
        };
        info!(run_id, produced, errors, status = %final_status, "run finished");
        self.runs.transition(run_id, final_status, None).await
    }

    async fn annotate_one(
        &self,
        run: &AnnotationRun,
        asset: &Asset,
        schema: &AnnotationSchema,
        model: &str,
    ) -> Result<Annotation> {
        let content = asset
            .text_content
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                SkeinError::Validation(format!("asset {} has no text content", asset.id))
            })?;

        let mut messages = Vec::new();
        if let Some(instructions) = schema
            .instructions
            .as_deref()
            .filter(|i| !i.trim().is_empty())
        {
            messages.push(ChatMessage::system(instructions));
        }

        let mut user_content = String::new();
        if run.include_parent_context {
            if let Some(parent_id) = asset.parent_asset_id {
                if let Some(parent) = self.store.get_asset(parent_id).await? {
                    if let Some(parent_text) = parent.text_content.as_deref() {
                        let budget = run
                            .context_window
                            .map(|w| w as usize)
                            .unwrap_or(DEFAULT_CONTEXT_WINDOW);
                        user_content.push_str("Parent context:\n");
                        user_content.push_str(ai_client::util::truncate_to_char_boundary(
                            parent_text,
                            budget,
                        ));
                        user_content.push_str("\n\n");
                    }
                }
            }
        }
        user_content.push_str("Content:\n");
        user_content.push_str(content);
        messages.push(ChatMessage::user(user_content));

        let wants_justifications = !schema.field_specific_justification_configs.is_empty();
        let contract = if wants_justifications {
            wrap_contract_with_justifications(&schema.output_contract)
        } else {
            schema.output_contract.clone()
        };

        let request = GenerationRequest::new(model, messages).response_format(contract);
        let response = self
            .generator
            .generate(request)
            .await
            .map_err(|e| SkeinError::provider("language-model", e.to_string()))?;

        let parsed: serde_json::Value = serde_json::from_str(&response.content)
            .map_err(|e| SkeinError::Validation(format!("provider output is not JSON: {e}")))?;

        let (value, justifications) = if wants_justifications {
            let value = parsed
                .get("annotation")
                .cloned()
                .ok_or_else(|| SkeinError::Validation("missing annotation object".into()))?;
            let justifications = parsed
                .get("justifications")
                .and_then(|j| j.as_object())
                .cloned()
                .unwrap_or_default();
            (value, justifications)
        } else {
            (parsed, Default::default())
        };

        // The contract is enforced at write time, not trusted from the
        // provider.
        validate_value(&schema.output_contract, &value)?;

        let annotation = self
            .store
            .create_annotation(AnnotationCreate {
                infospace_id: run.infospace_id,
                user_id: run.user_id,
                asset_id: asset.id,
                schema_id: schema.id,
                run_id: Some(run.id),
                value,
                status: AnnotationStatus::Success,
                error_message: None,
                region: None,
                links: None,
                event_timestamp: asset.event_timestamp,
                imported_from_uuid: None,
            })
            .await?;

        for (field_name, payload) in justifications {
            let Some(reasoning) = payload.get("reasoning").and_then(|r| r.as_str()) else {
                continue;
            };
            let mut evidence = skein_common::Metadata::new();
            if let Some(e) = payload.get("evidence") {
                evidence.insert("evidence".into(), e.clone());
            }
            self.store
                .create_justification(JustificationCreate {
                    annotation_id: annotation.id,
                    field_name: Some(field_name),
                    reasoning: reasoning.to_string(),
                    evidence_payload: evidence,
                    score: payload.get("score").and_then(|s| s.as_f64()),
                    model_name: Some(response.model_used.clone()),
                })
                .await?;
        }

        Ok(annotation)
    }
}

/// Wrap the output contract so the model returns the annotation plus a
/// per-field justification map.
fn wrap_contract_with_justifications(contract: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "annotation": contract,
            "justifications": {
                "type": "object",
                "additionalProperties": {
                    "type": "object",
                    "properties": {
                        "reasoning": {"type": "string"},
                        "evidence": {"type": "string"},
                        "score": {"type": "number"}
                    },
                    "required": ["reasoning"]
                }
            }
        },
        "required": ["annotation", "justifications"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_common::{AssetCreate, AssetKind, RunCreate, SchemaCreate, SchemaTargetLevel};
    use skein_store::MemoryStore;
    use std::sync::Mutex;

    struct ScriptedGenerator {
        responses: Mutex<Vec<anyhow::Result<String>>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<anyhow::Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
            let next = self
                .responses
                .lock()
                .unwrap()
                .remove(0)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            Ok(GenerationResponse {
                content: next,
                model_used: request.model,
                ..Default::default()
            })
        }
    }

    async fn fixture(
        store: &Arc<MemoryStore>,
        justification_configs: bool,
    ) -> (i64, i64, i64) {
        let mut asset_create = AssetCreate::new(1, 1, "doc", AssetKind::Text);
        asset_create.text_content = Some("The product is wonderful.".into());
        let asset = store.create_asset(asset_create).await.unwrap();

        let mut configs = skein_common::Metadata::new();
        if justification_configs {
            configs.insert("sentiment".into(), serde_json::json!({"enabled": true}));
        }
        let schema = store
            .create_schema(SchemaCreate {
                infospace_id: 1,
                user_id: 1,
                name: "sentiment".into(),
                version: "1.0".into(),
                description: None,
                output_contract: serde_json::json!({
                    "type": "object",
                    "properties": {"sentiment": {"type": "string"}},
                    "required": ["sentiment"]
                }),
                instructions: Some("Classify the sentiment.".into()),
                field_specific_justification_configs: configs,
                target_level: SchemaTargetLevel::Asset,
                imported_from_uuid: None,
            })
            .await
            .unwrap();

        let mut configuration = skein_common::Metadata::new();
        configuration.insert("model".into(), serde_json::json!("scripted-model"));
        let run = store
            .create_run(RunCreate {
                infospace_id: 1,
                user_id: 1,
                name: "run".into(),
                configuration,
                target_schema_ids: vec![schema.id],
                target_asset_ids: vec![asset.id],
                ..Default::default()
            })
            .await
            .unwrap();

        (asset.id, schema.id, run.id)
    }

    #[tokio::test]
    async fn test_successful_run() {
        let store = Arc::new(MemoryStore::new());
        let (asset_id, _, run_id) = fixture(&store, false).await;
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            r#"{"sentiment": "positive"}"#.to_string(),
        )]));
        let executor = AnnotationExecutor::new(store.clone(), generator);

        let run = executor.execute_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let annotations = store.list_annotations_for_asset(asset_id).await.unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].value["sentiment"], "positive");
        assert_eq!(annotations[0].status, AnnotationStatus::Success);
    }

    #[tokio::test]
    async fn test_invalid_output_marks_annotation_failed() {
        let store = Arc::new(MemoryStore::new());
        let (asset_id, _, run_id) = fixture(&store, false).await;
        // Valid JSON, but violates the contract.
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(
            r#"{"sentiment": 42}"#.to_string(),
        )]));
        let executor = AnnotationExecutor::new(store.clone(), generator);

        let run = executor.execute_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::CompletedWithErrors);

        let annotations = store.list_annotations_for_asset(asset_id).await.unwrap();
        assert_eq!(annotations.len(), 1);
        assert_eq!(annotations[0].status, AnnotationStatus::Failed);
        assert!(annotations[0].error_message.is_some());
    }

    #[tokio::test]
    async fn test_provider_error_continues_run() {
        let store = Arc::new(MemoryStore::new());
        let (_, _, run_id) = fixture(&store, false).await;
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(anyhow::anyhow!(
            "rate limited"
        ))]));
        let executor = AnnotationExecutor::new(store.clone(), generator);

        let run = executor.execute_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::CompletedWithErrors);
    }

    #[tokio::test]
    async fn test_justifications_extracted() {
        let store = Arc::new(MemoryStore::new());
        let (asset_id, _, run_id) = fixture(&store, true).await;
        let generator = Arc::new(ScriptedGenerator::new(vec![Ok(r#"{
            "annotation": {"sentiment": "positive"},
            "justifications": {
                "sentiment": {"reasoning": "says wonderful", "evidence": "is wonderful", "score": 0.9}
            }
        }"#
        .to_string())]));
        let executor = AnnotationExecutor::new(store.clone(), generator);

        executor.execute_run(run_id).await.unwrap();

        let annotations = store.list_annotations_for_asset(asset_id).await.unwrap();
        assert_eq!(annotations[0].value["sentiment"], "positive");
        let justifications = store
            .list_justifications(annotations[0].id)
            .await
            .unwrap();
        assert_eq!(justifications.len(), 1);
        assert_eq!(justifications[0].field_name.as_deref(), Some("sentiment"));
        assert_eq!(justifications[0].score, Some(0.9));
        assert_eq!(
            justifications[0].model_name.as_deref(),
            Some("scripted-model")
        );
    }
}
