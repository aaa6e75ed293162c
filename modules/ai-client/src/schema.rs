//! Derive a provider-ready JSON schema from a Rust type.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Trait for types that can be used as structured output of `generate`.
///
/// Automatically implemented for any type that implements
/// `JsonSchema + DeserializeOwned`.
///
/// Strict providers require:
/// 1. `additionalProperties: false` on all object schemas
/// 2. ALL properties listed in `required`, even nullable ones
/// 3. Fully inlined schemas (no `$ref` references)
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn output_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        // Detach the definitions table so the tree can be rewritten while
        // lookups stay available.
        let definitions = root
            .as_object_mut()
            .and_then(|obj| obj.remove("definitions"));
        let definitions = definitions.as_ref().and_then(Value::as_object);

        normalize(&mut root, definitions);

        if let Some(obj) = root.as_object_mut() {
            obj.remove("$schema");
        }
        root
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// One recursive pass over the schema tree: splice `$ref` targets and
/// single-entry `allOf` wrappers in place, then tighten every object
/// node for strict-mode providers.
fn normalize(node: &mut Value, definitions: Option<&serde_json::Map<String, Value>>) {
    // Work out a replacement subtree first so the node borrow is free
    // again when we splice it in.
    let spliced = match node.as_object() {
        Some(obj) => {
            if let Some(target) = obj
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|r| r.strip_prefix("#/definitions/"))
            {
                definitions.and_then(|table| table.get(target)).cloned()
            } else {
                // schemars wraps referenced types in a one-element allOf.
                match obj.get("allOf").and_then(Value::as_array) {
                    Some(wrapped) if wrapped.len() == 1 => Some(wrapped[0].clone()),
                    _ => None,
                }
            }
        }
        None => None,
    };
    if let Some(mut replacement) = spliced {
        normalize(&mut replacement, definitions);
        *node = replacement;
        return;
    }

    match node {
        Value::Object(obj) => {
            if obj.get("type").and_then(Value::as_str) == Some("object") {
                obj.insert("additionalProperties".to_string(), Value::Bool(false));
                let property_names: Option<Vec<Value>> =
                    obj.get("properties").and_then(Value::as_object).map(|p| {
                        p.keys().cloned().map(Value::String).collect()
                    });
                if let Some(names) = property_names {
                    obj.insert("required".to_string(), Value::Array(names));
                }
            }
            for child in obj.values_mut() {
                normalize(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items {
                normalize(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct TestArticle {
        title: String,
        summary: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct TestAnalysis {
        articles: Vec<TestArticle>,
    }

    #[test]
    fn test_schema_is_strict_object() {
        let schema = TestAnalysis::output_schema();
        assert_eq!(schema["additionalProperties"], false);
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &[serde_json::json!("articles")]);
    }

    #[test]
    fn test_nested_refs_fully_inlined() {
        let schema = TestAnalysis::output_schema();
        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(!rendered.contains("$ref"));
        assert!(!rendered.contains("definitions"));
        // The nested article object was spliced in and tightened too.
        assert_eq!(
            schema["properties"]["articles"]["items"]["additionalProperties"],
            false
        );
    }
}
