//! Capability schema validation.
//!
//! A schema is the function-calling description an owner hands in:
//! `{ "name", "description", "parameters": { "type": "object", "properties": {...} } }`.

use convoke_core::capability::CapabilitySchema;
use convoke_core::error::RegistryError;
use convoke_core::token;
use serde_json::Value;

/// Largest serialized schema accepted, in tokens.
pub const MAX_SCHEMA_TOKENS: usize = 1024;

/// Capability names: 1 to 64 of `[A-Za-z0-9_-]`.
pub fn is_valid_name(name: &str) -> bool {
    (1..=64).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Fields that are missing or malformed, in a stable order.
fn problems(schema: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut missing = Vec::new();

    match schema.get("name").and_then(Value::as_str) {
        Some(name) if is_valid_name(name) => {}
        _ => missing.push("name".to_string()),
    }

    if !schema.get("description").is_some_and(Value::is_string) {
        missing.push("description".to_string());
    }

    match schema.get("parameters").and_then(Value::as_object) {
        None => missing.push("parameters".to_string()),
        Some(params) => {
            if params.get("type").and_then(Value::as_str) != Some("object") {
                missing.push("parameters.type".to_string());
            }
            if !params.get("properties").is_some_and(Value::is_object) {
                missing.push("parameters.properties".to_string());
            }
        }
    }

    missing
}

/// Validate a raw schema and convert it to a [`CapabilitySchema`].
pub fn validate_schema(schema: &Value) -> Result<CapabilitySchema, RegistryError> {
    let object = match schema {
        Value::Null => return Err(RegistryError::EmptySchema),
        Value::Object(map) if map.is_empty() => return Err(RegistryError::EmptySchema),
        Value::Object(map) => map,
        _ => {
            return Err(RegistryError::SchemaInvalid {
                missing: vec!["name".into(), "description".into(), "parameters".into()],
            });
        }
    };

    let missing = problems(object);
    if !missing.is_empty() {
        return Err(RegistryError::SchemaInvalid { missing });
    }

    let parsed = CapabilitySchema {
        name: object["name"].as_str().unwrap_or_default().to_string(),
        description: object["description"].as_str().unwrap_or_default().to_string(),
        parameters: object["parameters"].clone(),
    };

    let tokens = token::count_schema_tokens("", &parsed);
    if tokens > MAX_SCHEMA_TOKENS {
        return Err(RegistryError::SchemaInvalid {
            missing: vec![format!("size ({tokens} tokens, max {MAX_SCHEMA_TOKENS})")],
        });
    }

    Ok(parsed)
}
