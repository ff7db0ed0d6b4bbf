//! Data directory discovery across several roots
//!
//! Resolution for a requested version:
//! - found under exactly one root: use it
//! - found under several roots: ambiguity error, the caller must pin a root
//! - found nowhere: use the default root, warning about other versions seen

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vds_version::{list_versions, Version};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::naming::DatasetPath;

/// Environment variable overriding the default data root
pub const DATA_DIR_ENV: &str = "VDS_DATA_DIR";

/// Directory name used under `$HOME` when nothing else is configured
pub const FALLBACK_DATA_DIR: &str = "vds_data";

/// Directory listing capability
pub trait DirLister: Send + Sync {
    /// Names of the subdirectories of `dir`; empty if `dir` does not exist.
    fn list_subdirs(&self, dir: &Path) -> io::Result<Vec<String>>;

    /// Whether `dir` exists and has at least one entry.
    fn is_non_empty_dir(&self, dir: &Path) -> bool;
}

/// Lister backed by the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLister;

impl DirLister for FsLister {
    fn list_subdirs(&self, dir: &Path) -> io::Result<Vec<String>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn is_non_empty_dir(&self, dir: &Path) -> bool {
        fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

/// Where a dataset version lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Data root actually used
    pub root: PathBuf,
    /// `<root>/<name>[/<config>]/<version>`
    pub dir: PathBuf,
    /// Whether the version directory already holds a published dataset
    pub exists: bool,
    /// Other published versions seen across the roots, ascending; empty on a hit
    pub other_versions: Vec<Version>,
}

/// Finds dataset version directories across configured roots.
pub struct DataDirLocator {
    default_root: Option<PathBuf>,
    extra_roots: Vec<PathBuf>,
    lister: Box<dyn DirLister>,
}

impl DataDirLocator {
    pub fn new(default_root: Option<PathBuf>, extra_roots: Vec<PathBuf>) -> Self {
        Self {
            default_root,
            extra_roots,
            lister: Box::new(FsLister),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.data_dir.clone(), config.extra_data_dirs.clone())
    }

    pub fn with_lister(mut self, lister: Box<dyn DirLister>) -> Self {
        self.lister = lister;
        self
    }

    /// Root used for new datasets: override, env, configured, then `~/vds_data`.
    pub fn default_root(&self, explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Some(path) = env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            return PathBuf::from(path);
        }
        if let Some(path) = &self.default_root {
            return path.clone();
        }
        let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(FALLBACK_DATA_DIR)
    }

    /// Every root to scan, deduplicated, default first.
    ///
    /// An explicit root disables scanning of the others.
    pub fn roots(&self, explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut roots = vec![self.default_root(explicit)];
        if explicit.is_none() {
            for root in &self.extra_roots {
                if !roots.contains(root) {
                    roots.push(root.clone());
                }
            }
        }
        roots
    }

    /// Versions published under `root` for `dataset`.
    pub fn versions_at(&self, root: &Path, dataset: &DatasetPath) -> StoreResult<Vec<Version>> {
        let builder_dir = root.join(dataset.builder_dir());
        let names = self.lister.list_subdirs(&builder_dir)?;
        Ok(list_versions(names)
            .into_iter()
            .filter(|v| self.lister.is_non_empty_dir(&builder_dir.join(v.to_string())))
            .collect())
    }

    /// Locate `version` of `dataset`.
    pub fn locate(
        &self,
        explicit: Option<&Path>,
        dataset: &DatasetPath,
        version: &Version,
    ) -> StoreResult<Located> {
        let version_dir = dataset.version_dir(version);
        let mut all_versions = BTreeSet::new();
        let mut hits = Vec::new();

        for root in self.roots(explicit) {
            let versions = self.versions_at(&root, dataset)?;
            debug!(root = %root.display(), found = versions.len(), "scanned data root");
            if versions.contains(version) {
                hits.push(root.clone());
            }
            all_versions.extend(versions);
        }

        match hits.len() {
            0 => {}
            1 => {
                let root = hits.remove(0);
                return Ok(Located {
                    dir: root.join(&version_dir),
                    root,
                    exists: true,
                    other_versions: Vec::new(),
                });
            }
            _ => {
                let roots = hits.iter().map(|r| r.join(&version_dir)).collect();
                return Err(StoreError::Ambiguity { roots });
            }
        }

        let root = self.default_root(explicit);
        let dir = root.join(&version_dir);
        if !all_versions.is_empty() {
            let found: Vec<String> = all_versions.iter().map(ToString::to_string).collect();
            warn!(
                dataset = %dataset.builder_dir().display(),
                found = %found.join(", "),
                using = %dir.display(),
                "found a different version of the requested dataset"
            );
        }
        Ok(Located {
            root,
            dir,
            exists: false,
            other_versions: all_versions.into_iter().collect(),
        })
    }
}
