//! Error taxonomy for the dataset store
//!
//! Nothing here is retried internally; every variant propagates to the
//! caller. Messages name the concrete alternatives (versions, variants,
//! roots) so the corrective action is obvious.

use std::io;
use std::path::PathBuf;

use vds_version::ResolveError;

use crate::config::ConfigError;

/// Boxed error returned by external collaborators (codecs, generators).
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from dataset store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Missing or contradictory declarations; needs a code change
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Requested version could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// Same version published under several roots
    #[error(
        "dataset was found in more than one directory: {}. Resolve the ambiguity by passing an explicit data dir",
        .roots.iter().map(|r| r.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    Ambiguity { roots: Vec<PathBuf> },

    /// Not enough disk space for download + generated data
    #[error("not enough disk space at {}: needed {needed} bytes (download: {download}, generated: {generated}), available {available}", .root.display())]
    Resource {
        root: PathBuf,
        needed: u64,
        download: u64,
        generated: u64,
        available: u64,
    },

    /// Version can be read but not generated by this code
    #[error("{message}. Available for generation: {}", .generatable.join(", "))]
    VersionTooOld {
        message: String,
        generatable: Vec<String>,
    },

    /// Descriptor missing where one was expected
    #[error("no readable descriptor in {}: {reason}. Delete this directory if you are trying to regenerate the dataset", .dir.display())]
    NotFound { dir: PathBuf, reason: String },

    /// Registered variant name reused with different settings
    #[error("cannot name a custom variant '{name}' like a registered one. Registered variants: {}", .available.join(", "))]
    Conflict { name: String, available: Vec<String> },

    /// Unknown variant name
    #[error("variant '{name}' not found. Available: {}", .available.join(", "))]
    Lookup { name: String, available: Vec<String> },

    /// Integrity assertion failure between code and persisted state
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Attempt to overwrite a published dataset
    #[error("refusing to overwrite existing dataset {name} at {} (version {version} already exists; bump the version if the data changed)", .dir.display())]
    AlreadyExists {
        name: String,
        version: String,
        dir: PathBuf,
    },

    /// Generation callback failed; the incomplete directory is kept
    #[error("generation failed (partial output kept in {}): {source}", .incomplete_dir.display())]
    Generation {
        incomplete_dir: PathBuf,
        #[source]
        source: CollaboratorError,
    },

    /// Feature codec or metadata collaborator failed
    #[error("{what} failed: {source}")]
    Collaborator {
        what: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for dataset store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguity_lists_roots() {
        let err = StoreError::Ambiguity {
            roots: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        let msg = err.to_string();
        assert!(msg.contains("/a, /b"));
        assert!(msg.contains("explicit data dir"));
    }

    #[test]
    fn test_lookup_lists_variants() {
        let err = StoreError::Lookup {
            name: "large".to_string(),
            available: vec!["small".to_string(), "medium".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "variant 'large' not found. Available: small, medium"
        );
    }

    #[test]
    fn test_resolution_is_transparent() {
        let err: StoreError = ResolveError::MissingCanonical {
            name: "mnist".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "no canonical version declared for 'mnist'");
    }
}
