//! Store configuration
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (`$VDS_CONFIG` or `~/.config/vds/store.toml`)
//! 3. Environment (`VDS_DATA_DIR`)
//! 4. CLI flags

mod defaults;
mod effective;

pub use defaults::BuiltinDefaults;
pub use effective::{
    deep_merge, host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig,
    LogConfig, StoreConfig, CONFIG_PATH_ENV,
};
