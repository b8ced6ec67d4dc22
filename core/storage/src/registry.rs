//! Store registry for dynamic content store resolution.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ContentStore;
use ledgervault_common::{Error, Result};

/// Factory function type for creating content stores.
pub type StoreFactory = Box<dyn Fn(Value) -> Result<Arc<dyn ContentStore>> + Send + Sync>;

/// Registry for content store factories.
///
/// Allows dynamic registration and resolution of content stores
/// by name and configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Store '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve a store by name and configuration.
    ///
    /// # Errors
    /// - Store not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn ContentStore>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Store '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered store names.
    pub fn stores(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a store is registered.
    pub fn has_store(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();

    let builtins: [(&str, StoreFactory); 2] = [
        (
            "memory",
            Box::new(|_config: Value| -> Result<Arc<dyn ContentStore>> {
                Ok(Arc::new(crate::memory::MemoryContentStore::new()))
            }),
        ),
        (
            "local",
            Box::new(|config: Value| -> Result<Arc<dyn ContentStore>> {
                let root = config.get("root").and_then(|v| v.as_str()).ok_or_else(|| {
                    Error::Validation("Local store requires 'root' path".to_string())
                })?;
                Ok(Arc::new(crate::local::LocalContentStore::new(root)?))
            }),
        ),
    ];

    for (name, factory) in builtins {
        // Names are distinct literals on a fresh registry.
        let _ = registry.register(name, factory);
    }

    registry
}
