//! Version resolution against declared versions
//!
//! Candidates are the canonical version followed by the additionally
//! supported versions, in declaration order:
//! - `latest` picks the highest candidate
//! - anything else picks the first candidate that matches
//! - no match fails, listing every candidate

use crate::{Version, VersionRequest};

/// Version resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// Neither the variant nor the declaring code names a version
    #[error("no canonical version declared for '{name}'")]
    MissingCanonical { name: String },

    /// Nothing declared matches the request
    #[error("'{name}' cannot be loaded at version {requested}, only: {}", available.join(", "))]
    NoMatch {
        name: String,
        requested: String,
        /// Candidate versions in declaration order
        available: Vec<String>,
    },
}

impl ResolveError {
    /// Available versions sorted ascending, for user-facing listings.
    pub fn available_sorted(&self) -> Vec<String> {
        match self {
            ResolveError::MissingCanonical { .. } => Vec::new(),
            ResolveError::NoMatch { available, .. } => {
                let mut versions: Vec<Version> =
                    available.iter().filter_map(|v| v.parse().ok()).collect();
                versions.sort();
                versions.iter().map(ToString::to_string).collect()
            }
        }
    }
}

/// Candidate list: canonical first, then supported versions.
pub fn candidates(canonical: &Version, supported: &[Version]) -> Vec<Version> {
    std::iter::once(canonical.clone())
        .chain(supported.iter().cloned())
        .collect()
}

/// Resolve a request to one concrete declared version.
pub fn resolve_version(
    name: &str,
    canonical: Option<&Version>,
    supported: &[Version],
    request: &VersionRequest,
) -> Result<Version, ResolveError> {
    let canonical = canonical.ok_or_else(|| ResolveError::MissingCanonical {
        name: name.to_string(),
    })?;
    let candidates = candidates(canonical, supported);

    if *request == VersionRequest::Latest {
        // candidates is never empty: it always holds the canonical version
        return Ok(candidates
            .iter()
            .max()
            .cloned()
            .unwrap_or_else(|| canonical.clone()));
    }

    if let Some(found) = candidates.iter().find(|v| v.matches(request)) {
        return Ok(found.clone());
    }

    Err(ResolveError::NoMatch {
        name: name.to_string(),
        requested: request.to_string(),
        available: candidates.iter().map(ToString::to_string).collect(),
    })
}
