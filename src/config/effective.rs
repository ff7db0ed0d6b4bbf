//! Effective configuration with provenance
//!
//! Layers are merged as JSON values:
//! - Objects: deep-merge by key
//! - Arrays: replace (last wins)
//! - Scalars: override (last wins)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::defaults::BuiltinDefaults;
use crate::locator::DATA_DIR_ENV;
use crate::naming::FileFormat;

/// Environment variable pointing at the host config file
pub const CONFIG_PATH_ENV: &str = "VDS_CONFIG";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    Env,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (host layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 of the raw file bytes (host layer only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Log settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: BuiltinDefaults::default().log_format,
        }
    }
}

/// Typed view of the merged configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root for new datasets
    pub data_dir: Option<PathBuf>,

    /// Additional roots scanned for already published datasets
    pub extra_data_dirs: Vec<PathBuf>,

    /// Shard format for new datasets
    pub file_format: FileFormat,

    pub log: LogConfig,
}

/// Merged configuration plus where each layer came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

/// Default host config location: `$VDS_CONFIG`, else `~/.config/vds/store.toml`.
pub fn host_config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/vds/store.toml"))
}

/// Deep merge two JSON values; `overlay` wins.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

impl EffectiveConfig {
    /// Build from the host file, the process environment and CLI overrides.
    pub fn build(
        host_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let env_data_dir = env::var(DATA_DIR_ENV).ok().filter(|v| !v.is_empty());
        Self::build_with_env(host_config_path, env_data_dir, cli_overrides)
    }

    /// Build with an explicit environment layer.
    pub fn build_with_env(
        host_config_path: Option<&Path>,
        env_data_dir: Option<String>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut merged = BuiltinDefaults::default().to_value();
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_config_path {
            if path.exists() {
                let (value, digest) = Self::load_toml_file(path)?;
                merged = deep_merge(merged, value);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Host,
                    path: Some(path.to_string_lossy().to_string()),
                    digest: Some(digest),
                });
            }
        }

        if let Some(data_dir) = env_data_dir {
            merged = deep_merge(merged, serde_json::json!({ "data_dir": data_dir }));
            sources.push(ConfigSource {
                origin: ConfigOrigin::Env,
                path: None,
                digest: None,
            });
        }

        if let Some(cli) = cli_overrides {
            merged = deep_merge(merged, cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let config = Self {
            created_at: Utc::now(),
            config: merged,
            sources,
        };
        config.store_config()?;
        Ok(config)
    }

    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;
        let json_value = serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok((json_value, digest))
    }

    /// Typed, validated view of the merged values.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let config: StoreConfig = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        if !matches!(config.log.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::ValidationError(format!(
                "log.format must be \"pretty\" or \"json\", got \"{}\"",
                config.log.format
            )));
        }
        if config.extra_data_dirs.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::ValidationError(
                "extra_data_dirs must not contain empty paths".to_string(),
            ));
        }
        Ok(config)
    }

    /// Get a config value by dot-separated path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.config;
        for part in path.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
