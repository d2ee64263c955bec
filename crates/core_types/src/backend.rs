use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{KbError, KbResult};

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_FINGERPRINT: &str = "default";

const PLACEHOLDER_MARKERS: [&str; 5] = ["你", "your-api-key", "your_api_key", "<api_key>", "changeme"];

/// Connection settings for one backend instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Backend specific keys that are passed through untouched.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base_url.trim().is_empty() && self.api_key.trim().is_empty() && self.extra.is_empty()
    }

    pub fn validate(&self) -> KbResult<()> {
        let base_url = self.base_url.trim();
        let api_key = self.api_key.trim();
        if base_url.is_empty() {
            return Err(KbError::ConfigInvalid("base_url is empty".to_string()));
        }
        if api_key.is_empty() {
            return Err(KbError::ConfigInvalid("api_key is empty".to_string()));
        }
        if is_placeholder_key(api_key) {
            return Err(KbError::ConfigInvalid(
                "api_key still holds the placeholder value".to_string(),
            ));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(KbError::ConfigInvalid(format!(
                "base_url must start with http:// or https://, got `{base_url}`"
            )));
        }
        if self.timeout_ms == 0 {
            return Err(KbError::ConfigInvalid("timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Stable cache key for this configuration.
    ///
    /// Keys are visited in sorted order so two configs with the same pairs always agree,
    /// regardless of how they were deserialized.
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return DEFAULT_FINGERPRINT.to_string();
        }

        let mut canonical = BTreeMap::new();
        canonical.insert("api_key", self.api_key.clone());
        canonical.insert("base_url", self.base_url.clone());
        canonical.insert("timeout_ms", self.timeout_ms.to_string());
        for (key, value) in &self.extra {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            canonical.insert(key.as_str(), rendered);
        }

        let mut hasher = Sha256::new();
        for (key, value) in canonical {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        hasher
            .finalize()
            .iter()
            .take(8)
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Names of the keys that are set, without their values.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if !self.base_url.is_empty() {
            keys.push("base_url".to_string());
        }
        if !self.api_key.is_empty() {
            keys.push("api_key".to_string());
        }
        keys.push("timeout_ms".to_string());
        keys.extend(self.extra.keys().cloned());
        keys
    }
}

fn is_placeholder_key(api_key: &str) -> bool {
    let lowered = api_key.to_ascii_lowercase();
    PLACEHOLDER_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// A named, stored backend configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendProfile {
    pub id: String,
    pub name: String,
    pub adapter_type: String,
    pub config: BackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

/// How a caller points at a backend configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRef<'a> {
    Profile(&'a str),
    PlatformDefault,
}

impl<'a> ConfigRef<'a> {
    pub fn from_option(profile_id: Option<&'a str>) -> Self {
        match profile_id.map(str::trim) {
            Some(id) if !id.is_empty() => Self::Profile(id),
            _ => Self::PlatformDefault,
        }
    }
}

/// One configurable key advertised by an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub label: String,
    pub kind: ConfigFieldKind,
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFieldKind {
    Url,
    Secret,
    Integer,
    Text,
}
