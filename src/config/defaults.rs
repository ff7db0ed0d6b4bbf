//! Built-in defaults (layer 1)

use serde::{Deserialize, Serialize};

use crate::naming::FileFormat;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Shard file format for new datasets (default: tfrecord)
    pub file_format: FileFormat,

    /// Log output format, "pretty" or "json" (default: pretty)
    pub log_format: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            file_format: FileFormat::default(),
            log_format: "pretty".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    ///
    /// `data_dir` is left out: unset means "environment or `~/vds_data`".
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "file_format": self.file_format.suffix(),
            "extra_data_dirs": [],
            "log": {
                "format": self.log_format
            }
        })
    }
}
