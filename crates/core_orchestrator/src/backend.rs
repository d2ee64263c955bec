use std::sync::Arc;

use core_types::{
    AdapterStatus, ConfigField, ConfigRef, ConfigSource, KbResult, KnowledgeBase,
    KnowledgeBaseAdapter, ProfileSummary,
};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use crate::registry::{AdapterRegistry, RegistryStatus};

/// An adapter together with the profile it was configured from.
#[derive(Clone)]
pub struct ResolvedBackend {
    pub profile_id: String,
    pub adapter: Arc<dyn KnowledgeBaseAdapter>,
}

/// Turns a profile reference into a ready adapter.
#[derive(Clone)]
pub struct BackendResolver {
    registry: Arc<AdapterRegistry>,
    configs: Arc<dyn ConfigSource>,
}

impl BackendResolver {
    pub fn new(registry: Arc<AdapterRegistry>, configs: Arc<dyn ConfigSource>) -> Self {
        Self { registry, configs }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn resolve(&self, reference: ConfigRef<'_>) -> KbResult<ResolvedBackend> {
        let profile = self.configs.resolve_config(reference)?;
        profile.config.validate()?;
        let adapter = self
            .registry
            .get_adapter(&profile.adapter_type, Some(&profile.config))?;
        debug!(profile_id = %profile.id, adapter_type = %profile.adapter_type, "backend resolved");
        Ok(ResolvedBackend {
            profile_id: profile.id,
            adapter,
        })
    }

    pub fn for_record(&self, record: &KnowledgeBase) -> KbResult<ResolvedBackend> {
        self.resolve(ConfigRef::from_option(record.rag_config_ref.as_deref()))
    }

    pub fn profiles(&self) -> Vec<ProfileSummary> {
        self.configs.list_profiles()
    }

    pub fn default_config(&self, adapter_type: &str) -> KbResult<IndexMap<String, Value>> {
        Ok(self.registry.get_adapter(adapter_type, None)?.default_config())
    }

    pub fn supported_config(&self, adapter_type: &str) -> KbResult<IndexMap<String, ConfigField>> {
        Ok(self.registry.get_adapter(adapter_type, None)?.supported_config())
    }

    pub async fn adapter_status(&self, reference: ConfigRef<'_>) -> KbResult<AdapterStatus> {
        let backend = self.resolve(reference)?;
        Ok(backend.adapter.status().await)
    }

    pub fn registry_status(&self) -> RegistryStatus {
        self.registry.status()
    }
}
