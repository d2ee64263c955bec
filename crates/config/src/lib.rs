use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{
    BackendConfig, BackendProfile, ConfigRef, ConfigSource, KbError, KbResult, ProfileSummary,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagProfile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub adapter_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(flatten)]
    pub config: BackendConfig,
}

const fn default_enabled() -> bool {
    true
}

impl RagProfile {
    fn to_backend_profile(&self) -> BackendProfile {
        BackendProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            adapter_type: self.adapter_type.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub profiles: Vec<RagProfile>,
}

impl RagConfig {
    fn default_profiles() -> Vec<RagProfile> {
        vec![RagProfile {
            id: "ragflow-local".to_string(),
            name: "Local RAGFlow".to_string(),
            adapter_type: "ragflow".to_string(),
            enabled: true,
            is_default: true,
            config: BackendConfig::new("http://localhost:9380", "your-api-key"),
        }]
    }

    /// The explicit default, else the first enabled `is_default` profile, else the
    /// first enabled profile.
    pub fn default_profile(&self) -> Option<&RagProfile> {
        let explicit = self
            .default_profile
            .as_deref()
            .and_then(|id| self.profiles.iter().find(|p| p.id == id && p.enabled));
        explicit
            .or_else(|| self.profiles.iter().find(|p| p.enabled && p.is_default))
            .or_else(|| self.profiles.iter().find(|p| p.enabled))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; `knowledge.sqlite` next to the config file when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Used when `RUST_LOG` is not set.
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            rag: RagConfig {
                default_profile: Some("ragflow-local".to_string()),
                profiles: RagConfig::default_profiles(),
            },
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigSource for AppConfig {
    fn resolve_config(&self, reference: ConfigRef<'_>) -> KbResult<BackendProfile> {
        match reference {
            ConfigRef::Profile(id) => {
                let profile = self
                    .rag
                    .profiles
                    .iter()
                    .find(|profile| profile.id == id)
                    .ok_or_else(|| KbError::ConfigNotFound(format!("profile `{id}`")))?;
                if !profile.enabled {
                    return Err(KbError::ConfigInvalid(format!("profile `{id}` is disabled")));
                }
                Ok(profile.to_backend_profile())
            }
            ConfigRef::PlatformDefault => self
                .rag
                .default_profile()
                .map(RagProfile::to_backend_profile)
                .ok_or_else(|| {
                    KbError::ConfigNotFound("no enabled backend profile is configured".to_string())
                }),
        }
    }

    fn list_profiles(&self) -> Vec<ProfileSummary> {
        let default_id = self.rag.default_profile().map(|profile| profile.id.as_str());
        let mut profiles: Vec<ProfileSummary> = self
            .rag
            .profiles
            .iter()
            .filter(|profile| profile.enabled)
            .map(|profile| ProfileSummary {
                id: profile.id.clone(),
                name: profile.name.clone(),
                is_default: Some(profile.id.as_str()) == default_id,
            })
            .collect();
        profiles.sort_by_key(|profile| !profile.is_default);
        profiles
    }
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("ragbridge");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn database_path(&self, config: &AppConfig) -> PathBuf {
        config
            .storage
            .database_path
            .clone()
            .unwrap_or_else(|| self.dir().join("knowledge.sqlite"))
    }

    pub fn log_dir(&self, config: &AppConfig) -> PathBuf {
        config
            .logging
            .directory
            .clone()
            .unwrap_or_else(|| self.dir().join("logs"))
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        if self.migrate(&mut config) {
            self.save(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut AppConfig) -> bool {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return false;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );

        if config.rag.profiles.is_empty() {
            config.rag = AppConfig::default().rag;
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
        true
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn profile(id: &str, enabled: bool, is_default: bool) -> RagProfile {
        RagProfile {
            id: id.to_string(),
            name: id.to_uppercase(),
            adapter_type: "ragflow".to_string(),
            enabled,
            is_default,
            config: BackendConfig::new(format!("http://{id}.local"), "ragflow-key"),
        }
    }

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().expect("tempdir");
        let store = ConfigStore::from_dir(dir.path());
        let config = store.load_or_init().expect("load default");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.rag.profiles.len(), 1);
        assert!(store.path().exists());

        let err = config
            .resolve_config(ConfigRef::PlatformDefault)
            .and_then(|profile| profile.config.validate())
            .expect_err("placeholder api key");
        assert!(matches!(err, KbError::ConfigInvalid(_)));
    }

    #[test]
    fn reads_flattened_profile_fields() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("config.json"),
            r#"{
                "schema_version": 2,
                "rag": {
                    "profiles": [{
                        "id": "prod",
                        "name": "Production",
                        "type": "ragflow",
                        "base_url": "https://rag.example.com",
                        "api_key": "ragflow-live",
                        "timeout_ms": 5000,
                        "embedding_model": "bge-m3"
                    }]
                }
            }"#,
        )
        .expect("write");

        let config = ConfigStore::from_dir(dir.path()).load_or_init().expect("load");
        let profile = config
            .resolve_config(ConfigRef::Profile("prod"))
            .expect("profile");
        assert_eq!(profile.adapter_type, "ragflow");
        assert_eq!(profile.config.timeout_ms, 5000);
        assert!(profile.config.extra.contains_key("embedding_model"));
        assert!(profile.config.validate().is_ok());
    }

    #[test]
    fn migrates_old_schema_with_default_profiles() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("config.json"), r#"{"schema_version": 1}"#).expect("write");

        let store = ConfigStore::from_dir(dir.path());
        let config = store.load_or_init().expect("migrated");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.rag.profiles[0].id, "ragflow-local");

        let saved = fs::read_to_string(store.path()).expect("saved");
        assert!(saved.contains("\"schema_version\": 2"));
    }

    #[test]
    fn default_profile_precedence() {
        let mut config = AppConfig::default();
        config.rag.default_profile = Some("off".to_string());
        config.rag.profiles = vec![
            profile("a", true, false),
            profile("off", false, true),
            profile("b", true, true),
        ];

        let resolved = config
            .resolve_config(ConfigRef::PlatformDefault)
            .expect("default");
        assert_eq!(resolved.id, "b");

        let listed = config.list_profiles();
        assert_eq!(
            listed.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["b", "a"]
        );
        assert!(listed[0].is_default);

        let disabled = config.resolve_config(ConfigRef::Profile("off")).expect_err("disabled");
        assert!(matches!(disabled, KbError::ConfigInvalid(_)));
        let missing = config.resolve_config(ConfigRef::Profile("zzz")).expect_err("missing");
        assert!(matches!(missing, KbError::ConfigNotFound(_)));

        config.rag.profiles.clear();
        let none = config.resolve_config(ConfigRef::PlatformDefault).expect_err("none");
        assert!(matches!(none, KbError::ConfigNotFound(_)));
    }
}
