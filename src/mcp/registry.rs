//! Capability Registry
//!
//! The registration seam between the mirror and whatever framework exposes
//! capabilities to callers. `InMemoryRegistry` is the in-process
//! implementation used by the CLI host and tests.

use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

use super::error::{GatewayError, GatewayResult};
use super::mirror::LocalCapabilityBinding;

/// Accepts bindings and exposes them to external callers. Registrations are
/// never withdrawn by the gateway.
pub trait CapabilityRegistrar: Send + Sync {
    fn register(&self, binding: Arc<LocalCapabilityBinding>) -> GatewayResult<()>;
}

/// Registry keyed by invocation key. Registering an existing key replaces it.
#[derive(Default)]
pub struct InMemoryRegistry {
    bindings: DashMap<String, Arc<LocalCapabilityBinding>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<Arc<LocalCapabilityBinding>> {
        self.bindings.get(key).map(|entry| entry.value().clone())
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.bindings.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Invoke the binding registered under `key`
    pub async fn invoke(&self, key: &str, arguments: Value) -> GatewayResult<Value> {
        // Clone out of the map so no shard lock is held across the await
        let binding = self
            .get(key)
            .ok_or_else(|| GatewayError::remote(format!("unknown capability: {}", key)))?;
        binding.invoke(arguments).await
    }
}

impl CapabilityRegistrar for InMemoryRegistry {
    fn register(&self, binding: Arc<LocalCapabilityBinding>) -> GatewayResult<()> {
        let key = binding.invocation_key().to_string();
        if self.bindings.insert(key.clone(), binding).is_some() {
            debug!("Replaced binding {}", key);
        } else {
            debug!("Registered binding {}", key);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::mirror::BindingSource;
    use crate::mcp::schema::ParameterSchema;
    use serde_json::json;

    fn echo(key: &str) -> Arc<LocalCapabilityBinding> {
        Arc::new(LocalCapabilityBinding::new(
            BindingSource::Meta,
            key,
            key,
            "echoes its arguments",
            ParameterSchema::Unconstrained,
            |args| async move { Ok::<_, GatewayError>(args) },
        ))
    }

    #[tokio::test]
    async fn test_register_and_invoke() {
        let registry = InMemoryRegistry::new();
        registry.register(echo("tool_b")).unwrap();
        registry.register(echo("tool_a")).unwrap();

        assert_eq!(registry.keys(), vec!["tool_a", "tool_b"]);
        let out = registry.invoke("tool_a", json!({ "x": 1 })).await.unwrap();
        assert_eq!(out, json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn test_unknown_key() {
        let registry = InMemoryRegistry::new();
        let err = registry.invoke("tool_missing", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), "remote_invocation_error");
    }

    #[test]
    fn test_register_upserts() {
        let registry = InMemoryRegistry::new();
        registry.register(echo("tool_a")).unwrap();
        registry.register(echo("tool_a")).unwrap();
        assert_eq!(registry.len(), 1);
    }
}
