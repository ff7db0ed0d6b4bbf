//! Descriptor persistence and reconciliation
//!
//! `descriptor.json` is the durable source of truth for one version
//! directory. On load, identity comes from disk; every other field follows
//! "code wins when set, otherwise adopt disk".

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vds_version::Version;

use crate::error::{StoreError, StoreResult};
use crate::features::{metadata_path, FeatureCodec, Metadata, MetadataDict};
use crate::naming::{FileFormat, ShardedFileTemplate};
use crate::publish::write_atomic;
use crate::splits::{to_records, SplitDict, SplitEntry, SplitInfo};

/// Schema version for descriptor.json
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "vds/descriptor@1";

pub const DESCRIPTOR_FILENAME: &str = "descriptor.json";

pub const LICENSE_FILENAME: &str = "LICENSE";

pub fn descriptor_path(dir: &Path) -> PathBuf {
    dir.join(DESCRIPTOR_FILENAME)
}

pub fn license_path(dir: &Path) -> PathBuf {
    dir.join(LICENSE_FILENAME)
}

/// Identity of one (name, config, version) dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactIdentity {
    pub name: String,
    pub version: Version,
    pub config_name: Option<String>,
    pub config_description: Option<String>,
    pub release_notes: BTreeMap<String, String>,
    pub module_name: String,
}

impl ArtifactIdentity {
    /// `name[/config]/version`
    pub fn full_name(&self) -> String {
        match &self.config_name {
            Some(config) => format!("{}/{}/{}", self.name, config, self.version),
            None => format!("{}/{}", self.name, self.version),
        }
    }
}

/// A nested structure of feature keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyNest {
    Key(String),
    Tuple(Vec<KeyNest>),
    Dict(BTreeMap<String, KeyNest>),
}

/// Keys used for supervised (input, target[, weight]) access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisedKeys {
    pub input: KeyNest,
    pub target: KeyNest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<KeyNest>,
}

/// Descriptor fields that code may declare and disk may restore.
///
/// `None`, `false` and `0` mean "not declared".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default)]
    pub disable_shuffling: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_format: Option<FileFormat>,
    #[serde(default)]
    pub download_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervised_keys: Option<SupervisedKeys>,
}

/// On-disk descriptor (descriptor.json)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub schema_version: u32,
    pub schema_id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_description: Option<String>,
    #[serde(default)]
    pub release_notes: BTreeMap<String, String>,
    #[serde(default)]
    pub module_name: String,
    #[serde(flatten)]
    pub fields: DescriptorFields,
    #[serde(default)]
    pub splits: Vec<crate::splits::SplitRecord>,
}

impl Descriptor {
    /// Read and parse `descriptor.json` from `dir`.
    ///
    /// Any failure is reported as `NotFound`: a half-written directory and
    /// a corrupted one look the same from here.
    pub fn read(dir: &Path) -> StoreResult<Self> {
        let path = descriptor_path(dir);
        let bytes = fs::read(&path).map_err(|e| StoreError::NotFound {
            dir: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        let descriptor: Descriptor =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::NotFound {
                dir: dir.to_path_buf(),
                reason: format!("unparseable {}: {}", DESCRIPTOR_FILENAME, e),
            })?;
        check_schema(&descriptor.schema_id)?;
        Ok(descriptor)
    }
}

/// Reject descriptors from a different schema family or major version.
fn check_schema(actual: &str) -> StoreResult<()> {
    let split = |id: &str| -> Option<(String, u32)> {
        let (prefix, major) = id.rsplit_once('@')?;
        Some((prefix.to_string(), major.parse().ok()?))
    };
    let (want_prefix, want_major) = split(SCHEMA_ID).unwrap_or_default();
    match split(actual) {
        Some((prefix, major)) if prefix == want_prefix && major == want_major => Ok(()),
        _ => Err(StoreError::Consistency(format!(
            "descriptor schema mismatch: expected {}, got {}",
            SCHEMA_ID, actual
        ))),
    }
}

/// In-memory descriptor state for one dataset
pub struct ArtifactInfo {
    identity: ArtifactIdentity,
    fields: DescriptorFields,
    data_dir: PathBuf,
    splits: SplitDict,
    features: Option<Arc<dyn FeatureCodec>>,
    metadata: Option<Box<dyn Metadata>>,
    fully_initialized: bool,
}

impl ArtifactInfo {
    pub fn new(identity: ArtifactIdentity, fields: DescriptorFields, data_dir: PathBuf) -> Self {
        Self {
            identity,
            fields,
            data_dir,
            splits: SplitDict::new(),
            features: None,
            metadata: None,
            fully_initialized: false,
        }
    }

    pub fn with_features(mut self, features: Arc<dyn FeatureCodec>) -> Self {
        self.features = Some(features);
        self
    }

    pub fn with_metadata(mut self, metadata: Box<dyn Metadata>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn set_metadata(&mut self, metadata: Box<dyn Metadata>) {
        self.metadata = Some(metadata);
    }

    pub fn identity(&self) -> &ArtifactIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    pub fn full_name(&self) -> String {
        self.identity.full_name()
    }

    pub fn fields(&self) -> &DescriptorFields {
        &self.fields
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn splits(&self) -> &SplitDict {
        &self.splits
    }

    pub fn metadata(&self) -> Option<&dyn Metadata> {
        self.metadata.as_deref()
    }

    pub fn file_format(&self) -> Option<FileFormat> {
        self.fields.file_format
    }

    pub fn download_size(&self) -> u64 {
        self.fields.download_size
    }

    pub fn set_download_size(&mut self, size: u64) {
        self.fields.download_size = size;
    }

    /// Size of the generated shard files.
    pub fn dataset_size(&self) -> u64 {
        self.splits.total_num_bytes()
    }

    pub fn is_fully_initialized(&self) -> bool {
        self.fully_initialized
    }

    /// Reopen loaded state for a regeneration.
    ///
    /// Declared fields may be overridden again. Splits stay so that
    /// unchanged ones keep their statistics.
    pub fn begin_regeneration(&mut self) {
        self.fully_initialized = false;
    }

    /// Template for shards written under the current data dir.
    pub fn file_template(&self) -> ShardedFileTemplate {
        ShardedFileTemplate::new(
            self.identity.name.clone(),
            self.data_dir.clone(),
            self.fields.file_format.unwrap_or_default().suffix(),
        )
    }

    /// Define the file format.
    ///
    /// Falls back to the current format, then the default. Changing a set
    /// format needs `override_`, which is refused once the info is fully
    /// initialized.
    pub fn set_file_format(
        &mut self,
        file_format: Option<FileFormat>,
        override_: bool,
    ) -> StoreResult<()> {
        let resolved = file_format
            .or(self.fields.file_format)
            .unwrap_or_default();
        if let Some(current) = self.fields.file_format {
            if !override_ && current != resolved {
                return Err(StoreError::Consistency(format!(
                    "file format is already set to {}, got {}",
                    current, resolved
                )));
            }
        }
        if override_ && self.fully_initialized {
            return Err(StoreError::Consistency(
                "cannot override the file format once the descriptor is fully initialized"
                    .to_string(),
            ));
        }
        self.fields.file_format = Some(resolved);
        Ok(())
    }

    /// Install a new split set over the current one.
    ///
    /// Statistics survive when the incoming split has none and the shard
    /// layout is unchanged. Missing templates are synthesized. Multi-splits
    /// pass through untouched.
    pub fn set_splits(&mut self, splits: SplitDict) -> StoreResult<()> {
        for entry in splits.iter() {
            if let SplitEntry::Single(split) = entry {
                if let Some(template) = &split.filename_template {
                    if template.artifact_name != self.identity.name {
                        return Err(StoreError::Consistency(format!(
                            "split '{}' belongs to dataset '{}', not '{}'",
                            split.name, template.artifact_name, self.identity.name
                        )));
                    }
                }
            }
        }

        let base_template = self.file_template();
        let mut installed = SplitDict::new();
        for entry in splits {
            let mut split = match entry {
                SplitEntry::Multi(multi) => {
                    installed.insert(multi)?;
                    continue;
                }
                SplitEntry::Single(split) => split,
            };
            if !split.has_statistics() {
                if let Some(old) = self.splits.single(&split.name) {
                    if old.has_statistics() && old.shard_lengths == split.shard_lengths {
                        debug!(split = %split.name, "carrying statistics over from previous split info");
                        split.statistics = old.statistics.clone();
                    }
                }
            }
            if split.filename_template.is_none() {
                split.filename_template = Some(base_template.with_split(&split.name));
            }
            installed.insert(split)?;
        }
        self.splits = installed;
        Ok(())
    }

    /// Point every split template, and the info itself, at `data_dir`.
    pub fn update_data_dir(&mut self, data_dir: &Path) -> StoreResult<()> {
        let mut rebased = Vec::with_capacity(self.splits.len());
        for entry in self.splits.iter() {
            let split: &SplitInfo = match entry {
                SplitEntry::Multi(multi) => {
                    return Err(StoreError::Consistency(format!(
                        "updating the data dir of multi-directory split '{}' is not supported",
                        multi.name
                    )))
                }
                SplitEntry::Single(split) => split,
            };
            let mut split = split.clone();
            split.filename_template = Some(match &split.filename_template {
                Some(template) => template.with_data_dir(data_dir),
                None => self.file_template().with_data_dir(data_dir).with_split(&split.name),
            });
            rebased.push(split);
        }
        self.data_dir = data_dir.to_path_buf();
        self.set_splits(SplitDict::from_entries(rebased)?)
    }

    pub fn to_descriptor(&self) -> Descriptor {
        Descriptor {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            name: self.identity.name.clone(),
            version: self.identity.version.to_string(),
            config_name: self.identity.config_name.clone(),
            config_description: self.identity.config_description.clone(),
            release_notes: self.identity.release_notes.clone(),
            module_name: self.identity.module_name.clone(),
            fields: self.fields.clone(),
            splits: to_records(&self.splits),
        }
    }

    /// Persist the descriptor and its collaborators into `dir`.
    pub fn write_to_directory(&self, dir: &Path) -> StoreResult<()> {
        if let Some(features) = &self.features {
            features
                .save(dir)
                .map_err(|source| StoreError::Collaborator {
                    what: "feature codec save",
                    source,
                })?;
        }
        if let Some(metadata) = &self.metadata {
            metadata
                .save_metadata(dir)
                .map_err(|source| StoreError::Collaborator {
                    what: "metadata save",
                    source,
                })?;
        }
        if let Some(license) = &self.fields.license {
            write_atomic(&license_path(dir), license.as_bytes())?;
        }
        let json = serde_json::to_string_pretty(&self.to_descriptor())?;
        write_atomic(&descriptor_path(dir), json.as_bytes())?;
        debug!(dir = %dir.display(), "descriptor written");
        Ok(())
    }

    /// Restore state from a published directory.
    pub fn read_from_directory(&mut self, dir: &Path) -> StoreResult<()> {
        info!(dir = %dir.display(), "loading descriptor");
        let descriptor = Descriptor::read(dir)?;
        self.apply_descriptor(dir, descriptor)
    }

    /// Restore state from an already parsed descriptor of `dir`.
    pub fn apply_descriptor(&mut self, dir: &Path, descriptor: Descriptor) -> StoreResult<()> {
        if self.identity.version.to_string() != descriptor.version {
            return Err(StoreError::Consistency(format!(
                "declared version {} does not match persisted version {} in {}",
                self.identity.version,
                descriptor.version,
                dir.display()
            )));
        }

        self.identity = ArtifactIdentity {
            name: descriptor.name.clone(),
            version: self.identity.version.clone(),
            config_name: descriptor.config_name.clone(),
            config_description: descriptor.config_description.clone(),
            release_notes: descriptor.release_notes.clone(),
            module_name: descriptor.module_name.clone(),
        };
        self.data_dir = dir.to_path_buf();

        let template = ShardedFileTemplate::new(
            descriptor.name.clone(),
            dir,
            descriptor
                .fields
                .file_format
                .unwrap_or_default()
                .suffix(),
        );
        let mut restored = SplitDict::new();
        for record in descriptor.splits {
            restored.insert(record.into_info(&template)?)?;
        }
        self.set_splits(restored)?;

        if let Some(features) = &self.features {
            features
                .load(dir)
                .map_err(|source| StoreError::Collaborator {
                    what: "feature codec load",
                    source,
                })?;
        }
        if self.metadata.is_none() && metadata_path(dir).exists() {
            self.metadata = Some(Box::new(MetadataDict::new()));
        }
        if let Some(metadata) = self.metadata.as_mut() {
            metadata
                .load_metadata(dir)
                .map_err(|source| StoreError::Collaborator {
                    what: "metadata load",
                    source,
                })?;
        }

        reconcile_fields(&mut self.fields, descriptor.fields);
        self.fully_initialized = true;
        Ok(())
    }
}

impl fmt::Debug for ArtifactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactInfo")
            .field("identity", &self.identity)
            .field("fields", &self.fields)
            .field("data_dir", &self.data_dir)
            .field("splits", &self.splits)
            .field("fully_initialized", &self.fully_initialized)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ArtifactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.full_name())?;
        writeln!(f, "  data_dir: {}", self.data_dir.display())?;
        writeln!(
            f,
            "  file_format: {}",
            self.fields.file_format.unwrap_or_default()
        )?;
        if let Some(homepage) = &self.fields.homepage {
            writeln!(f, "  homepage: {}", homepage)?;
        }
        writeln!(f, "  download_size: {}", self.fields.download_size)?;
        writeln!(f, "  dataset_size: {}", self.dataset_size())?;
        writeln!(f, "  disable_shuffling: {}", self.fields.disable_shuffling)?;
        writeln!(f, "  splits:")?;
        for entry in self.splits.iter() {
            writeln!(
                f,
                "    {}: {} examples, {} bytes",
                entry.name(),
                entry.num_examples(),
                entry.num_bytes()
            )?;
        }
        Ok(())
    }
}

fn reconcile_option<T: PartialEq + fmt::Debug>(field: &str, code: &mut Option<T>, disk: Option<T>) {
    match (code.as_ref(), disk) {
        (Some(ours), Some(theirs)) => {
            if *ours != theirs {
                info!(
                    field,
                    "descriptor field from disk and from code do not match, keeping the one from code"
                );
            }
        }
        (Some(_), None) => {}
        (None, restored) => *code = restored,
    }
}

fn reconcile_value<T: PartialEq + Default + fmt::Debug>(field: &str, code: &mut T, disk: T) {
    let mut declared = (*code != T::default()).then(|| std::mem::take(code));
    let restored = (disk != T::default()).then_some(disk);
    reconcile_option(field, &mut declared, restored);
    *code = declared.unwrap_or_default();
}

/// Field-by-field merge: a value declared in code wins, otherwise disk.
fn reconcile_fields(code: &mut DescriptorFields, disk: DescriptorFields) {
    reconcile_option("description", &mut code.description, disk.description);
    reconcile_option("homepage", &mut code.homepage, disk.homepage);
    reconcile_option("citation", &mut code.citation, disk.citation);
    reconcile_option("license", &mut code.license, disk.license);
    reconcile_value(
        "disable_shuffling",
        &mut code.disable_shuffling,
        disk.disable_shuffling,
    );
    reconcile_option("file_format", &mut code.file_format, disk.file_format);
    reconcile_value("download_size", &mut code.download_size, disk.download_size);
    reconcile_option(
        "supervised_keys",
        &mut code.supervised_keys,
        disk.supervised_keys,
    );
}
