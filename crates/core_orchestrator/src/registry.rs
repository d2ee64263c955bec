use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use core_types::{
    AdapterConstructor, BackendConfig, DEFAULT_FINGERPRINT, KbError, KbResult,
    KnowledgeBaseAdapter,
};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub registered_types: Vec<String>,
    pub cached_count: usize,
    pub cache_keys: Vec<String>,
}

#[derive(Default)]
pub struct AdapterRegistryBuilder {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistryBuilder {
    pub fn register<F>(mut self, adapter_type: &str, constructor: F) -> Self
    where
        F: Fn() -> Box<dyn KnowledgeBaseAdapter> + Send + Sync + 'static,
    {
        self.constructors
            .insert(adapter_type.trim().to_string(), Box::new(constructor));
        self
    }

    pub fn build(self) -> AdapterRegistry {
        AdapterRegistry {
            constructors: self.constructors,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

/// Maps adapter type tags to constructors and keeps one live adapter per
/// `type@fingerprint` key.
///
/// The type table is fixed once built. Instances are cached until an explicit clear.
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
    cache: RwLock<HashMap<String, Arc<dyn KnowledgeBaseAdapter>>>,
}

impl AdapterRegistry {
    pub fn builder() -> AdapterRegistryBuilder {
        AdapterRegistryBuilder::default()
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_registered(&self, adapter_type: &str) -> bool {
        self.constructors.contains_key(adapter_type.trim())
    }

    pub fn cache_key(adapter_type: &str, config: Option<&BackendConfig>) -> String {
        let fingerprint = config
            .map(BackendConfig::fingerprint)
            .unwrap_or_else(|| DEFAULT_FINGERPRINT.to_string());
        format!("{}@{fingerprint}", adapter_type.trim())
    }

    /// Cached adapter for `(adapter_type, config)`, built and validated on first use.
    ///
    /// Without a config (or with an empty one) the adapter is left unconfigured; it can
    /// still describe its supported and default settings.
    pub fn get_adapter(
        &self,
        adapter_type: &str,
        config: Option<&BackendConfig>,
    ) -> KbResult<Arc<dyn KnowledgeBaseAdapter>> {
        let adapter_type = adapter_type.trim();
        if adapter_type.is_empty() {
            return Err(KbError::UnsupportedAdapter(
                "backend profile has no adapter type".to_string(),
            ));
        }
        let constructor = self
            .constructors
            .get(adapter_type)
            .ok_or_else(|| KbError::UnsupportedAdapter(adapter_type.to_string()))?;

        let config = config.filter(|config| !config.is_empty());
        let key = Self::cache_key(adapter_type, config);
        if let Some(adapter) = self.cache.read().get(&key) {
            debug!(cache_key = %key, "adapter cache hit");
            return Ok(Arc::clone(adapter));
        }

        let mut adapter = constructor();
        if let Some(config) = config {
            adapter.initialize(config.clone())?;
            adapter.validate_config(config)?;
        }
        let adapter: Arc<dyn KnowledgeBaseAdapter> = Arc::from(adapter);

        match self.cache.write().entry(key) {
            Entry::Occupied(existing) => {
                debug!(cache_key = %existing.key(), "discarding concurrently built adapter");
                Ok(Arc::clone(existing.get()))
            }
            Entry::Vacant(slot) => {
                info!(cache_key = %slot.key(), "adapter cached");
                Ok(Arc::clone(slot.insert(adapter)))
            }
        }
    }

    pub fn clear_all(&self) {
        let mut cache = self.cache.write();
        let removed = cache.len();
        cache.clear();
        info!(removed, "adapter cache cleared");
    }

    pub fn clear_by_type(&self, adapter_type: &str) {
        let prefix = format!("{}@", adapter_type.trim());
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|key, _| !key.starts_with(&prefix));
        info!(
            adapter_type = %adapter_type,
            removed = before - cache.len(),
            "adapter cache cleared for type"
        );
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    pub fn status(&self) -> RegistryStatus {
        let cache = self.cache.read();
        let mut cache_keys: Vec<String> = cache.keys().cloned().collect();
        cache_keys.sort();
        RegistryStatus {
            registered_types: self.registered_types(),
            cached_count: cache.len(),
            cache_keys,
        }
    }
}
