//! Configuration variants of a dataset
//!
//! A dataset may declare several named variants (different recipes for
//! the same name). Callers pick the default, a declared name, or supply a
//! custom variant under a fresh name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vds_version::Version;

use crate::error::{StoreError, StoreResult};
use crate::publish::write_atomic;

/// Directory (under `<root>/<name>/`) holding variant-independent metadata
pub const COMMON_CONFIG_DIR: &str = ".config";

pub const COMMON_METADATA_FILENAME: &str = "metadata.json";

/// A named generation recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigVariant {
    pub name: String,
    /// Overrides the dataset's declared version
    pub version: Option<Version>,
    /// Overrides the dataset's supported versions when non-empty
    pub supported_versions: Vec<Version>,
    pub release_notes: BTreeMap<String, String>,
    pub description: String,
}

impl ConfigVariant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// What the caller asked for
#[derive(Debug, Clone, Default)]
pub enum VariantRequest {
    #[default]
    Default,
    Named(String),
    Custom(Arc<ConfigVariant>),
}

impl From<&str> for VariantRequest {
    fn from(name: &str) -> Self {
        VariantRequest::Named(name.to_string())
    }
}

impl From<ConfigVariant> for VariantRequest {
    fn from(variant: ConfigVariant) -> Self {
        VariantRequest::Custom(Arc::new(variant))
    }
}

/// Declared variants, in declaration order
#[derive(Debug, Clone, Default)]
pub struct VariantSet {
    variants: Vec<Arc<ConfigVariant>>,
    default_name: Option<String>,
}

impl VariantSet {
    /// Validate and build; names must be non-empty and unique.
    pub fn new(variants: Vec<ConfigVariant>, default_name: Option<String>) -> StoreResult<Self> {
        let mut seen = Vec::with_capacity(variants.len());
        for variant in &variants {
            if variant.name.is_empty() {
                return Err(StoreError::Configuration(
                    "variant names must not be empty".to_string(),
                ));
            }
            if seen.contains(&variant.name.as_str()) {
                return Err(StoreError::Configuration(format!(
                    "variant names must not be duplicated, got: {}",
                    variants
                        .iter()
                        .map(|v| v.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
            seen.push(variant.name.as_str());
        }
        Ok(Self {
            variants: variants.into_iter().map(Arc::new).collect(),
            default_name,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.name.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ConfigVariant>> {
        self.variants.iter().find(|v| v.name == name)
    }

    /// The explicit default, else the first declared variant.
    pub fn default_variant(&self) -> StoreResult<Option<Arc<ConfigVariant>>> {
        let Some(first) = self.variants.first() else {
            return Ok(None);
        };
        match &self.default_name {
            None => Ok(Some(Arc::clone(first))),
            Some(name) => self.get(name).cloned().map(Some).ok_or_else(|| {
                StoreError::Configuration(format!(
                    "default variant '{}' not found among declared variants: {}",
                    name,
                    self.names().join(", ")
                ))
            }),
        }
    }

    /// Pick the active variant for `request`.
    pub fn resolve(
        &self,
        dataset: &str,
        request: &VariantRequest,
    ) -> StoreResult<Option<Arc<ConfigVariant>>> {
        match request {
            VariantRequest::Default => {
                let variant = self.default_variant()?;
                if let Some(v) = &variant {
                    info!(dataset, variant = %v.name, "no variant specified, using default");
                }
                Ok(variant)
            }
            VariantRequest::Named(name) => {
                self.get(name)
                    .cloned()
                    .map(Some)
                    .ok_or_else(|| StoreError::Lookup {
                        name: name.clone(),
                        available: self.names(),
                    })
            }
            VariantRequest::Custom(variant) => {
                if variant.name.is_empty() {
                    return Err(StoreError::Configuration(
                        "variant names must not be empty".to_string(),
                    ));
                }
                match self.get(&variant.name) {
                    Some(registered) if Arc::ptr_eq(registered, variant) => {
                        Ok(Some(Arc::clone(registered)))
                    }
                    Some(registered) if **registered == **variant => {
                        Ok(Some(Arc::clone(registered)))
                    }
                    Some(_) => Err(StoreError::Conflict {
                        name: variant.name.clone(),
                        available: self.names(),
                    }),
                    None => {
                        warn!(dataset, variant = %variant.name, "using custom data configuration");
                        Ok(Some(Arc::clone(variant)))
                    }
                }
            }
        }
    }
}

/// Canonical version for a dataset with the given active variant.
///
/// A variant's own version wins over the dataset's declared one. When
/// variants are declared, one must be active.
pub fn canonical_version_for(
    dataset: &str,
    declared: Option<&Version>,
    variants: &VariantSet,
    active: Option<&ConfigVariant>,
) -> StoreResult<Version> {
    if !variants.is_empty() && active.is_none() {
        return Err(StoreError::Configuration(format!(
            "cannot infer version of '{}': it declares variants but none is active",
            dataset
        )));
    }
    active
        .and_then(|v| v.version.clone())
        .or_else(|| declared.cloned())
        .ok_or_else(|| {
            StoreError::Configuration(format!(
                "dataset '{}' does not declare a version",
                dataset
            ))
        })
}

#[derive(Debug, Serialize, Deserialize)]
struct CommonMetadata {
    default_config_name: String,
}

fn common_metadata_path(common_dir: &Path) -> PathBuf {
    common_dir.join(COMMON_CONFIG_DIR).join(COMMON_METADATA_FILENAME)
}

/// Record the default variant name in `<root>/<name>/.config/metadata.json`.
///
/// Overwritten on every publish; written atomically since several
/// variants may publish at once.
pub fn save_default_config_name(common_dir: &Path, default_config_name: &str) -> StoreResult<()> {
    let path = common_metadata_path(common_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(&CommonMetadata {
        default_config_name: default_config_name.to_string(),
    })?;
    write_atomic(&path, &json)
}

/// Read the default variant name written by [`save_default_config_name`].
pub fn load_default_config_name(common_dir: &Path) -> StoreResult<Option<String>> {
    let path = common_metadata_path(common_dir);
    if !path.exists() {
        return Ok(None);
    }
    let data: CommonMetadata = serde_json::from_slice(&fs::read(&path)?)?;
    Ok(Some(data.default_config_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn set(default_name: Option<&str>) -> VariantSet {
        VariantSet::new(
            vec![
                ConfigVariant::new("small").with_version(v("1.0.0")),
                ConfigVariant::new("large").with_version(v("2.0.0")),
            ],
            default_name.map(str::to_string),
        )
        .unwrap()
    }

    #[test]
    fn test_default_is_first_declared() {
        let got = set(None).resolve("ds", &VariantRequest::Default).unwrap();
        assert_eq!(got.unwrap().name, "small");
    }

    #[test]
    fn test_explicit_default() {
        let got = set(Some("large")).resolve("ds", &VariantRequest::Default).unwrap();
        assert_eq!(got.unwrap().name, "large");
    }

    #[test]
    fn test_missing_default_name() {
        let err = set(Some("huge"))
            .resolve("ds", &VariantRequest::Default)
            .unwrap_err();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[test]
    fn test_no_variants_resolves_to_none() {
        let empty = VariantSet::default();
        assert!(empty.resolve("ds", &VariantRequest::Default).unwrap().is_none());
    }

    #[test]
    fn test_unknown_name_lists_declared() {
        let err = set(None).resolve("ds", &"medium".into()).unwrap_err();
        match err {
            StoreError::Lookup { name, available } => {
                assert_eq!(name, "medium");
                assert_eq!(available, vec!["small", "large"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_custom_shadowing_registered_name() {
        let shadow = ConfigVariant::new("small").with_version(v("9.9.9"));
        let err = set(None).resolve("ds", &shadow.into()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_registered_variant_passed_back() {
        let variants = set(None);
        let registered = Arc::clone(variants.get("large").unwrap());
        let got = variants
            .resolve("ds", &VariantRequest::Custom(registered.clone()))
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&got, &registered));
    }

    #[test]
    fn test_custom_variant_accepted() {
        let custom = ConfigVariant::new("tiny").with_description("hand-made");
        let got = set(None).resolve("ds", &custom.into()).unwrap().unwrap();
        assert_eq!(got.name, "tiny");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = VariantSet::new(
            vec![ConfigVariant::new("a"), ConfigVariant::new("a")],
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicated"));
    }

    #[test]
    fn test_canonical_version_rules() {
        let variants = set(None);
        let large = variants.get("large").unwrap();
        assert_eq!(
            canonical_version_for("ds", Some(&v("0.5.0")), &variants, Some(large)).unwrap(),
            v("2.0.0")
        );
        assert!(canonical_version_for("ds", Some(&v("0.5.0")), &variants, None).is_err());

        let none = VariantSet::default();
        assert_eq!(
            canonical_version_for("ds", Some(&v("0.5.0")), &none, None).unwrap(),
            v("0.5.0")
        );
        assert!(canonical_version_for("ds", None, &none, None).is_err());

        let versionless = ConfigVariant::new("plain");
        assert_eq!(
            canonical_version_for("ds", Some(&v("0.5.0")), &variants, Some(&versionless)).unwrap(),
            v("0.5.0")
        );
    }

    #[test]
    fn test_default_config_name_round_trip() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_default_config_name(dir.path()).unwrap(), None);
        save_default_config_name(dir.path(), "small").unwrap();
        save_default_config_name(dir.path(), "large").unwrap();
        assert_eq!(
            load_default_config_name(dir.path()).unwrap().as_deref(),
            Some("large")
        );
        let entries: Vec<_> = fs::read_dir(dir.path().join(COMMON_CONFIG_DIR))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
