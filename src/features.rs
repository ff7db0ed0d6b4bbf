//! Collaborators persisted next to the descriptor
//!
//! The feature codec and the free-form metadata container are opaque to
//! the store: it only tells them which directory to save to or load from.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::error::CollaboratorError;
use crate::publish::write_atomic;

/// File holding [`MetadataDict`] contents
pub const METADATA_FILENAME: &str = "metadata.json";

/// Feature schema persistence (vocabularies, label names, ...).
pub trait FeatureCodec: fmt::Debug + Send + Sync {
    fn save(&self, dir: &Path) -> Result<(), CollaboratorError>;

    fn load(&self, dir: &Path) -> Result<(), CollaboratorError>;
}

/// Dataset-level metadata that is not tied to a feature or record.
pub trait Metadata: fmt::Debug + Send + Sync {
    fn save_metadata(&self, dir: &Path) -> Result<(), CollaboratorError>;

    fn load_metadata(&mut self, dir: &Path) -> Result<(), CollaboratorError>;
}

pub fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(METADATA_FILENAME)
}

/// Metadata stored as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataDict {
    values: Map<String, Value>,
}

impl MetadataDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Metadata for MetadataDict {
    fn save_metadata(&self, dir: &Path) -> Result<(), CollaboratorError> {
        let json = serde_json::to_vec(&self.values)?;
        write_atomic(&metadata_path(dir), &json)?;
        Ok(())
    }

    fn load_metadata(&mut self, dir: &Path) -> Result<(), CollaboratorError> {
        let bytes = fs::read(metadata_path(dir))?;
        self.values = serde_json::from_slice(&bytes)?;
        Ok(())
    }
}
