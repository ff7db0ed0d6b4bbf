//! Path naming conventions
//!
//! - Canonical version directory: `<root>/<name>/<config?>/<version>/`
//! - Incomplete decoration: `<file-or-dir-name>.incomplete<32 hex>`
//! - Shard files: `<name>-<split>.<suffix>-<iiiii>-of-<nnnnn>`

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use vds_version::Version;

use crate::error::{StoreError, StoreResult};

/// Marker inserted into temporary file and directory names
pub const INCOMPLETE_MARKER: &str = ".incomplete";

fn incomplete_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\.incomplete[0-9a-f]{32}").expect("static incomplete regex"))
}

/// Sibling path of `path` carrying a fresh incomplete decoration.
pub fn incomplete_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let token = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{}{}{}", name, INCOMPLETE_MARKER, token))
}

/// Whether a file or directory name carries the incomplete decoration.
pub fn is_incomplete_name(name: &str) -> bool {
    incomplete_re().is_match(name)
}

/// Whether `path`'s final component carries the incomplete decoration.
pub fn is_incomplete_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(is_incomplete_name)
}

/// On-disk record format of shard files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    #[default]
    Tfrecord,
    Riegeli,
    ArrayRecord,
}

impl FileFormat {
    pub const ALL: &'static [FileFormat] =
        &[FileFormat::Tfrecord, FileFormat::Riegeli, FileFormat::ArrayRecord];

    /// Suffix used in shard file names
    pub fn suffix(&self) -> &'static str {
        match self {
            FileFormat::Tfrecord => "tfrecord",
            FileFormat::Riegeli => "riegeli",
            FileFormat::ArrayRecord => "array_record",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

impl FromStr for FileFormat {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileFormat::ALL
            .iter()
            .copied()
            .find(|f| f.suffix() == s)
            .ok_or_else(|| {
                StoreError::Configuration(format!(
                    "unknown file format '{}', expected one of: {}",
                    s,
                    FileFormat::ALL
                        .iter()
                        .map(|f| f.suffix())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Relative location of a dataset inside a data root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetPath {
    pub name: String,
    pub config: Option<String>,
}

impl DatasetPath {
    pub fn new(name: impl Into<String>, config: Option<String>) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// `<name>[/<config>]`
    pub fn builder_dir(&self) -> PathBuf {
        let mut path = PathBuf::from(&self.name);
        if let Some(config) = &self.config {
            path.push(config);
        }
        path
    }

    /// `<name>[/<config>]/<version>`
    pub fn version_dir(&self, version: &Version) -> PathBuf {
        self.builder_dir().join(version.to_string())
    }

    /// Directory shared by all variants and versions of this dataset.
    pub fn common_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.name)
    }
}

/// Template for the shard file names of one split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardedFileTemplate {
    pub artifact_name: String,
    pub data_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<String>,
    pub filetype_suffix: String,
}

impl ShardedFileTemplate {
    pub fn new(
        artifact_name: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        filetype_suffix: impl Into<String>,
    ) -> Self {
        Self {
            artifact_name: artifact_name.into(),
            data_dir: data_dir.into(),
            split: None,
            filetype_suffix: filetype_suffix.into(),
        }
    }

    pub fn with_split(&self, split: impl Into<String>) -> Self {
        Self {
            split: Some(split.into()),
            ..self.clone()
        }
    }

    pub fn with_data_dir(&self, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..self.clone()
        }
    }

    /// Path of shard `index` out of `num_shards`.
    pub fn filepath(&self, index: usize, num_shards: usize) -> StoreResult<PathBuf> {
        let split = self.split.as_deref().ok_or_else(|| {
            StoreError::Consistency(format!(
                "file template for '{}' has no split name",
                self.artifact_name
            ))
        })?;
        if index >= num_shards {
            return Err(StoreError::Consistency(format!(
                "shard index {} out of range for {} shards",
                index, num_shards
            )));
        }
        Ok(self.data_dir.join(format!(
            "{}-{}.{}-{:05}-of-{:05}",
            self.artifact_name, split, self.filetype_suffix, index, num_shards
        )))
    }

    /// Paths of all `num_shards` shards, in index order.
    pub fn filepaths(&self, num_shards: usize) -> StoreResult<Vec<PathBuf>> {
        (0..num_shards)
            .map(|i| self.filepath(i, num_shards))
            .collect()
    }
}
