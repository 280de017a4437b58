use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strata_storage::{S3Mirror, StatePersistence};

use crate::context::ProviderContext;
use crate::error::ConfigError;
use crate::plan::DependentPolicy;

/// Current config version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Schema version. Missing or 0 = pre-versioned config.
    #[serde(default)]
    pub config_version: u32,
    pub provider: ProviderContext,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub state: StateSettings,
    pub created_at: jiff::Timestamp,
}

impl StrataConfig {
    pub fn new(provider: ProviderContext) -> Self {
        Self {
            config_version: CURRENT_VERSION,
            provider,
            engine: EngineSettings::default(),
            state: StateSettings::default(),
            created_at: jiff::Timestamp::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Upper bound on any single provider adapter call.
    pub call_timeout_secs: u64,
    pub drift_interval_secs: u64,
    pub scaling_interval_secs: u64,
    /// Added in v1.
    pub dependent_policy: DependentPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 30,
            drift_interval_secs: 300,
            scaling_interval_secs: 15,
            dependent_policy: DependentPolicy::Reject,
        }
    }
}

impl EngineSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn drift_interval(&self) -> Duration {
        Duration::from_secs(self.drift_interval_secs)
    }

    pub fn scaling_interval(&self) -> Duration {
        Duration::from_secs(self.scaling_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Local snapshot file. `None` keeps state in memory only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    /// Bucket for the S3 mirror of the snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    pub s3_key: String,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            local_path: None,
            s3_bucket: None,
            s3_key: "strata/state.json".to_string(),
        }
    }
}

impl StateSettings {
    /// Assemble the persistence backend these settings describe. The S3
    /// client is built against the provider's region and endpoint.
    pub async fn build_persistence(&self, provider: &ProviderContext) -> StatePersistence {
        let persistence = match &self.local_path {
            Some(path) => StatePersistence::local(path.clone()),
            None => StatePersistence::in_memory(),
        };
        let Some(bucket) = &self.s3_bucket else {
            return persistence;
        };
        let client =
            strata_storage::client::build_client(&provider.region, provider.endpoint.as_deref())
                .await;
        persistence.with_s3(S3Mirror {
            client,
            bucket: bucket.clone(),
            key: self.s3_key.clone(),
        })
    }
}

/// `<config dir>/strata/config.json`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.join("strata").join("config.json"))
}

pub fn load_config(path: &Path) -> Result<StrataConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = json
        .get("config_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let migrated = migrate(json, on_disk_version)?;
    let config: StrataConfig = serde_json::from_value(migrated)?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
/// Each migration is a pure transform on the raw JSON value.
pub fn migrate(
    mut json: serde_json::Value,
    from_version: u32,
) -> Result<serde_json::Value, ConfigError> {
    if from_version > CURRENT_VERSION {
        return Err(ConfigError::TooNew {
            found: from_version,
            supported: CURRENT_VERSION,
        });
    }

    // v0 → v1: engine gains `dependent_policy`.
    if from_version < 1 {
        let obj = json.as_object_mut().ok_or(ConfigError::NotAnObject)?;

        let engine = obj
            .entry("engine")
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
        if let Some(engine) = engine.as_object_mut() {
            engine
                .entry("dependent_policy")
                .or_insert(serde_json::Value::String("reject".to_string()));
        }

        obj.insert(
            "config_version".to_string(),
            serde_json::Value::Number(1.into()),
        );
        tracing::info!("migrated config v0 → v1 (added dependent_policy)");
    }

    Ok(json)
}

pub fn save_config(path: &Path, config: &StrataConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    // Always write the current version, regardless of what was loaded.
    let mut stamped = config.clone();
    stamped.config_version = CURRENT_VERSION;
    let json = serde_json::to_string_pretty(&stamped)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json.as_bytes())?;

    // Credentials may be inline; keep the file private.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
