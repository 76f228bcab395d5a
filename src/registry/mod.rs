//! Task Registry & Validator (§4.2): the authoritative catalog of
//! `(method, api_version) -> {params_schema, default_priority, saga_definition?, capability}`.
//!
//! Schemas are compiled into [`jsonschema::Validator`]s once, at `register`
//! time, and reused across every `validate` call — the same amortization
//! strategy as the source codebase's `SchemaRegistry`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::types::{Capability, DefinitionId, Priority, RegistryError};

/// A single registered method entry: schema plus routing metadata.
struct MethodEntry {
    schema: serde_json::Value,
    validator: Arc<jsonschema::Validator>,
    default_priority: Priority,
    capability: Capability,
    saga_definition: Option<DefinitionId>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct MethodKey {
    method: String,
    api_version: String,
}

/// Descriptor passed to [`TaskRegistry::register`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub method: String,
    pub api_version: String,
    pub params_schema: serde_json::Value,
    pub default_priority: Priority,
    pub capability: Capability,
    pub saga_definition: Option<DefinitionId>,
}

/// Outcome of a successful `validate` call.
#[derive(Debug, Clone)]
pub struct ValidatedTask {
    pub params: serde_json::Value,
    pub default_priority: Priority,
    pub capability: Capability,
    pub saga_definition: Option<DefinitionId>,
}

/// Thread-safe, versioned catalog of task methods.
///
/// Invariant (§4.2): a method cannot be removed while any pending or
/// in-flight task references it; schemas are append-only per version. This
/// registry enforces the latter by never mutating an existing entry in
/// place — `register` with an existing `(method, version)` key is rejected
/// unless the schema is byte-identical, which keeps registration idempotent
/// per the contract without silently changing validation behavior underfoot.
#[derive(Clone)]
pub struct TaskRegistry {
    entries: Arc<RwLock<HashMap<MethodKey, MethodEntry>>>,
    latest_versions: Arc<RwLock<HashMap<String, String>>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            latest_versions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Idempotent registration: compiles and caches the validator.
    pub async fn register(&self, descriptor: MethodDescriptor) -> Result<(), RegistryError> {
        let validator = jsonschema::validator_for(&descriptor.params_schema).map_err(|e| {
            RegistryError::SchemaCompilation {
                method: descriptor.method.clone(),
                reason: e.to_string(),
            }
        })?;

        let key = MethodKey {
            method: descriptor.method.clone(),
            api_version: descriptor.api_version.clone(),
        };

        if let Some(existing) = self.entries.read().await.get(&key) {
            if existing.schema != descriptor.params_schema {
                return Err(RegistryError::SchemaCompilation {
                    method: descriptor.method.clone(),
                    reason: "schema is append-only per version and cannot be changed in place"
                        .to_string(),
                });
            }
            return Ok(());
        }

        let entry = MethodEntry {
            schema: descriptor.params_schema,
            validator: Arc::new(validator),
            default_priority: descriptor.default_priority,
            capability: descriptor.capability,
            saga_definition: descriptor.saga_definition,
        };

        self.entries.write().await.insert(key, entry);
        self.latest_versions
            .write()
            .await
            .insert(descriptor.method, descriptor.api_version);
        Ok(())
    }

    /// Validates `params` against the schema registered for `(method, api_version)`.
    ///
    /// `api_version: None` resolves to the latest registered version for `method`.
    pub async fn validate(
        &self,
        method: &str,
        api_version: Option<&str>,
        params: &serde_json::Value,
    ) -> Result<ValidatedTask, RegistryError> {
        let resolved_version = match api_version {
            Some(v) => v.to_string(),
            None => self
                .latest_versions
                .read()
                .await
                .get(method)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownMethod {
                    method: method.to_string(),
                    api_version: "latest".to_string(),
                })?,
        };

        let key = MethodKey {
            method: method.to_string(),
            api_version: resolved_version.clone(),
        };
        let entries = self.entries.read().await;
        let entry = entries.get(&key).ok_or_else(|| RegistryError::UnknownMethod {
            method: method.to_string(),
            api_version: resolved_version.clone(),
        })?;

        if let Some(error) = entry.validator.iter_errors(params).next() {
            return Err(RegistryError::ValidationFailed {
                pointer: error.instance_path.to_string(),
                reason: error.to_string(),
            });
        }

        Ok(ValidatedTask {
            params: params.clone(),
            default_priority: entry.default_priority,
            capability: entry.capability.clone(),
            saga_definition: entry.saga_definition.clone(),
        })
    }

    pub async fn list_methods(&self) -> Vec<(String, String)> {
        self.latest_versions
            .read()
            .await
            .iter()
            .map(|(m, v)| (m.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> MethodDescriptor {
        MethodDescriptor {
            method: "run_reasoning".to_string(),
            api_version: "v1".to_string(),
            params_schema: json!({
                "type": "object",
                "properties": { "prompt": { "type": "string" } },
                "required": ["prompt"],
            }),
            default_priority: Priority::Normal,
            capability: Capability::Reasoning,
            saga_definition: None,
        }
    }

    #[tokio::test]
    async fn register_then_validate_succeeds() {
        let registry = TaskRegistry::new();
        registry.register(descriptor()).await.unwrap();
        let result = registry
            .validate("run_reasoning", None, &json!({"prompt": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.capability, Capability::Reasoning);
    }

    #[tokio::test]
    async fn missing_required_field_is_rejected() {
        let registry = TaskRegistry::new();
        registry.register(descriptor()).await.unwrap();
        let err = registry.validate("run_reasoning", None, &json!({})).await;
        assert!(matches!(err, Err(RegistryError::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let registry = TaskRegistry::new();
        let err = registry.validate("run_unknown", None, &json!({})).await;
        assert!(matches!(err, Err(RegistryError::UnknownMethod { .. })));
    }

    #[tokio::test]
    async fn re_registering_identical_schema_is_idempotent() {
        let registry = TaskRegistry::new();
        registry.register(descriptor()).await.unwrap();
        registry.register(descriptor()).await.unwrap();
    }

    #[tokio::test]
    async fn re_registering_changed_schema_is_rejected() {
        let registry = TaskRegistry::new();
        registry.register(descriptor()).await.unwrap();
        let mut changed = descriptor();
        changed.params_schema = json!({"type": "object"});
        let err = registry.register(changed).await;
        assert!(err.is_err());
    }
}
