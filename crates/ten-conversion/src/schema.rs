use dashmap::DashMap;
use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;
use ten_message::{Msg, PropertyMap};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid json schema for msg {0}: {1}")]
    InvalidSchema(String, String),
    #[error("no schema registered for msg {0}")]
    NotFound(String),
    #[error("properties failed validation for msg {0}: {1}")]
    ValidationFailed(String, String),
}

/// Contract a graph's schema layer must satisfy: register a schema per
/// message name, look it up, and validate/adjust a message's properties
/// against it. Kept as a trait (rather than a concrete struct baked into
/// `ten-runtime`) so a graph can swap in a stricter or no-op implementation.
pub trait SchemaStore: Send + Sync {
    fn register_msg_schema(&self, msg_name: &str, schema: Value) -> Result<(), SchemaError>;
    fn has_schema(&self, msg_name: &str) -> bool;
    fn validate_properties(&self, msg_name: &str, properties: &PropertyMap) -> Result<(), SchemaError>;
    fn validate_msg(&self, msg: &Msg) -> Result<(), SchemaError> {
        self.validate_properties(&msg.name, &msg.properties)
    }
}

/// JSON-schema-backed `SchemaStore`. One compiled `JSONSchema` per message
/// name, keyed in a `DashMap` so concurrent extensions can validate without
/// contending on a single lock.
pub struct JsonSchemaStore {
    schemas: DashMap<String, JSONSchema>,
}

impl Default for JsonSchemaStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSchemaStore {
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
        }
    }
}

impl SchemaStore for JsonSchemaStore {
    fn register_msg_schema(&self, msg_name: &str, schema: Value) -> Result<(), SchemaError> {
        let compiled = JSONSchema::compile(&schema)
            .map_err(|e| SchemaError::InvalidSchema(msg_name.to_string(), e.to_string()))?;
        self.schemas.insert(msg_name.to_string(), compiled);
        Ok(())
    }

    fn has_schema(&self, msg_name: &str) -> bool {
        self.schemas.contains_key(msg_name)
    }

    fn validate_properties(&self, msg_name: &str, properties: &PropertyMap) -> Result<(), SchemaError> {
        let entry = self
            .schemas
            .get(msg_name)
            .ok_or_else(|| SchemaError::NotFound(msg_name.to_string()))?;
        let as_json = serde_json::to_value(properties)
            .map_err(|e| SchemaError::ValidationFailed(msg_name.to_string(), e.to_string()))?;
        match entry.validate(&as_json) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let joined = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
                Err(SchemaError::ValidationFailed(msg_name.to_string(), joined))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ten_message::Location;

    #[test]
    fn register_and_validate_happy_path() {
        let store = JsonSchemaStore::new();
        store
            .register_msg_schema(
                "ping",
                json!({
                    "type": "object",
                    "properties": { "count": { "type": "integer" } },
                    "required": ["count"]
                }),
            )
            .unwrap();

        let mut msg = Msg::new_cmd("ping", Location::localhost());
        msg.set_property(&"count".into(), 1i64.into());
        assert!(store.validate_msg(&msg).is_ok());
    }

    #[test]
    fn validation_failure_reports_message_name() {
        let store = JsonSchemaStore::new();
        store
            .register_msg_schema(
                "ping",
                json!({
                    "type": "object",
                    "properties": { "count": { "type": "integer" } },
                    "required": ["count"]
                }),
            )
            .unwrap();

        let msg = Msg::new_cmd("ping", Location::localhost());
        let err = store.validate_msg(&msg).unwrap_err();
        assert!(matches!(err, SchemaError::ValidationFailed(name, _) if name == "ping"));
    }

    #[test]
    fn missing_schema_is_not_found() {
        let store = JsonSchemaStore::new();
        let msg = Msg::new_cmd("unregistered", Location::localhost());
        assert!(matches!(store.validate_msg(&msg), Err(SchemaError::NotFound(_))));
    }

    #[test]
    fn invalid_schema_document_is_rejected_at_registration() {
        let store = JsonSchemaStore::new();
        let result = store.register_msg_schema("bad", json!({"type": "not-a-real-type"}));
        assert!(result.is_err());
    }
}
