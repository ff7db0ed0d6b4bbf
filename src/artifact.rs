//! Artifact orchestration
//!
//! Opening an artifact resolves variant, version and location, then loads
//! the descriptor if the version is already published. Only a
//! [`GeneratingArtifact`] can publish; a [`ReadOnlyArtifact`] is rebuilt
//! from a published directory alone.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use vds_version::{candidates, resolve_version, Version, VersionRequest};

use crate::config::StoreConfig;
use crate::descriptor::{
    ArtifactIdentity, ArtifactInfo, Descriptor, DescriptorFields, DESCRIPTOR_FILENAME,
};
use crate::error::{CollaboratorError, StoreError, StoreResult};
use crate::features::{FeatureCodec, Metadata};
use crate::locator::DataDirLocator;
use crate::naming::{DatasetPath, FileFormat, ShardedFileTemplate};
use crate::publish::{Published, Publisher};
use crate::splits::SplitDict;
use crate::variant::{
    canonical_version_for, save_default_config_name, ConfigVariant, VariantRequest, VariantSet,
};

/// What to do when the canonical directory already holds a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DownloadMode {
    /// Keep the published dataset as is
    #[default]
    ReuseDatasetIfExists,
    /// Regenerate and replace the dataset once generation succeeds; downloads may be reused
    ReuseCacheIfExists,
    /// Refetch downloads; refuses to overwrite a published dataset
    ForceRedownload,
}

/// Source data acquisition, as seen by the store
pub trait DownloadManager: Send + Sync {
    /// Bytes expected to be downloaded, for the disk space check.
    fn download_size_estimate(&self) -> u64;

    /// Bytes actually downloaded so far.
    fn downloaded_size(&self) -> u64;
}

/// For datasets generated without downloads
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDownloads;

impl DownloadManager for NoDownloads {
    fn download_size_estimate(&self) -> u64 {
        0
    }

    fn downloaded_size(&self) -> u64 {
        0
    }
}

/// Everything a generator needs to write shards
pub struct GenerationContext<'a> {
    /// Temporary directory to write into; renamed on success
    pub write_dir: &'a Path,
    /// Shard template rooted at `write_dir`, without a split
    pub template: ShardedFileTemplate,
    pub download_manager: &'a dyn DownloadManager,
    pub mode: DownloadMode,
}

/// Writes the shards of every split
pub trait SplitGenerator: Send + Sync {
    fn generate(&self, ctx: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError>;

    /// Expected size of the generated shards.
    fn dataset_size_estimate(&self) -> u64 {
        0
    }

    /// Metadata to persist next to the descriptor, if any.
    fn metadata(&self) -> Option<Box<dyn Metadata>> {
        None
    }
}

/// Code-declared facts about a dataset
#[derive(Debug, Clone, Default)]
pub struct ArtifactDefinition {
    pub name: String,
    pub version: Option<Version>,
    pub supported_versions: Vec<Version>,
    pub release_notes: BTreeMap<String, String>,
    pub variants: VariantSet,
    pub module_name: String,
    pub fields: DescriptorFields,
    pub features: Option<Arc<dyn FeatureCodec>>,
}

impl ArtifactDefinition {
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

    pub fn with_supported_versions(mut self, versions: Vec<Version>) -> Self {
        self.supported_versions = versions;
        self
    }

    pub fn with_variants(mut self, variants: VariantSet) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_fields(mut self, fields: DescriptorFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = module_name.into();
        self
    }

    pub fn with_features(mut self, features: Arc<dyn FeatureCodec>) -> Self {
        self.features = Some(features);
        self
    }
}

/// Caller's choice of variant, version and root
#[derive(Debug, Clone, Default)]
pub struct ArtifactRequest {
    pub variant: VariantRequest,
    pub version: VersionRequest,
    /// Pins the data root; disables scanning of other roots
    pub data_dir: Option<PathBuf>,
    pub file_format: Option<FileFormat>,
}

impl ArtifactRequest {
    pub fn with_variant(mut self, variant: impl Into<VariantRequest>) -> Self {
        self.variant = variant.into();
        self
    }

    pub fn with_version(mut self, version: VersionRequest) -> Self {
        self.version = version;
        self
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    pub mode: DownloadMode,
    /// Shard format for the generated files; overrides the declared one
    pub file_format: Option<FileFormat>,
}

/// How `prepare` ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    Reused,
    Generated { swept: Vec<PathBuf> },
}

/// Registry key: one published dataset version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub name: String,
    pub config: Option<String>,
    pub version: Version,
}

impl ArtifactKey {
    pub fn new(name: impl Into<String>, config: Option<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            config,
            version,
        }
    }
}

struct RegistryEntry {
    dir: PathBuf,
    descriptor: Arc<Descriptor>,
}

/// Per-process memo of loaded descriptors.
#[derive(Default)]
pub struct ArtifactRegistry {
    entries: RwLock<HashMap<ArtifactKey, RegistryEntry>>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<Arc<Descriptor>> {
        self.entries
            .read()
            .get(key)
            .map(|entry| Arc::clone(&entry.descriptor))
    }

    /// Cached descriptor for `key` read from `dir`, loading it on a miss.
    pub fn descriptor(&self, key: &ArtifactKey, dir: &Path) -> StoreResult<Arc<Descriptor>> {
        if let Some(entry) = self.entries.read().get(key) {
            if entry.dir == dir {
                debug!(dataset = %key.name, dir = %dir.display(), "descriptor cache hit");
                return Ok(Arc::clone(&entry.descriptor));
            }
        }
        self.refresh(key, dir)
    }

    /// Re-read the descriptor in `dir` and replace any cached copy.
    pub fn refresh(&self, key: &ArtifactKey, dir: &Path) -> StoreResult<Arc<Descriptor>> {
        let descriptor = Arc::new(Descriptor::read(dir)?);
        self.entries.write().insert(
            key.clone(),
            RegistryEntry {
                dir: dir.to_path_buf(),
                descriptor: Arc::clone(&descriptor),
            },
        );
        Ok(descriptor)
    }

    pub fn invalidate(&self, key: &ArtifactKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Locator, registry and publisher shared by every artifact of a process
pub struct Store {
    locator: DataDirLocator,
    registry: ArtifactRegistry,
    publisher: Publisher,
    /// Format for datasets that neither code nor disk pin
    default_file_format: Option<FileFormat>,
}

impl Store {
    pub fn new(locator: DataDirLocator) -> Self {
        Self {
            locator,
            registry: ArtifactRegistry::new(),
            publisher: Publisher::default(),
            default_file_format: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(DataDirLocator::from_config(config))
            .with_default_file_format(config.file_format)
    }

    pub fn with_default_file_format(mut self, file_format: FileFormat) -> Self {
        self.default_file_format = Some(file_format);
        self
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn locator(&self) -> &DataDirLocator {
        &self.locator
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    /// Open a dataset that this code can generate.
    pub fn open<'s>(
        &'s self,
        definition: &ArtifactDefinition,
        request: &ArtifactRequest,
        generator: Box<dyn SplitGenerator>,
    ) -> StoreResult<GeneratingArtifact<'s>> {
        let core = ArtifactCore::open(self, definition, request)?;
        let default_variant = definition
            .variants
            .default_variant()?
            .map(|variant| variant.name.clone());
        Ok(GeneratingArtifact {
            store: self,
            core,
            generator,
            download_manager: Box::new(NoDownloads),
            default_variant,
        })
    }

    /// Open a published directory without any code declaration.
    pub fn open_dir(&self, dir: &Path) -> StoreResult<ReadOnlyArtifact> {
        ReadOnlyArtifact::from_dir(dir)
    }
}

/// Resolved state common to both artifact kinds
pub struct ArtifactCore {
    variant: Option<Arc<ConfigVariant>>,
    canonical_version: Version,
    supported_versions: Vec<Version>,
    dataset_path: DatasetPath,
    data_root: PathBuf,
    data_dir: PathBuf,
    identity: ArtifactIdentity,
    info: ArtifactInfo,
    fields: DescriptorFields,
    features: Option<Arc<dyn FeatureCodec>>,
    requested_format: Option<FileFormat>,
    default_format: Option<FileFormat>,
}

impl ArtifactCore {
    fn open(
        store: &Store,
        definition: &ArtifactDefinition,
        request: &ArtifactRequest,
    ) -> StoreResult<Self> {
        let name = definition.name.as_str();
        let variant = definition.variants.resolve(name, &request.variant)?;
        let canonical_version = canonical_version_for(
            name,
            definition.version.as_ref(),
            &definition.variants,
            variant.as_deref(),
        )?;
        let supported_versions = match variant.as_deref() {
            Some(v) if !v.supported_versions.is_empty() => v.supported_versions.clone(),
            _ => definition.supported_versions.clone(),
        };
        let version = resolve_version(
            name,
            Some(&canonical_version),
            &supported_versions,
            &request.version,
        )?;

        let dataset_path = DatasetPath::new(name, variant.as_ref().map(|v| v.name.clone()));
        let located = store
            .locator
            .locate(request.data_dir.as_deref(), &dataset_path, &version)?;

        let release_notes = match variant.as_deref() {
            Some(v) if !v.release_notes.is_empty() => v.release_notes.clone(),
            _ => definition.release_notes.clone(),
        };
        let identity = ArtifactIdentity {
            name: name.to_string(),
            version,
            config_name: variant.as_ref().map(|v| v.name.clone()),
            config_description: variant
                .as_ref()
                .map(|v| v.description.clone())
                .filter(|d| !d.is_empty()),
            release_notes,
            module_name: definition.module_name.clone(),
        };

        let mut core = Self {
            variant,
            canonical_version,
            supported_versions,
            dataset_path,
            data_root: located.root,
            info: ArtifactInfo::new(
                identity.clone(),
                definition.fields.clone(),
                located.dir.clone(),
            ),
            data_dir: located.dir,
            identity,
            fields: definition.fields.clone(),
            features: definition.features.clone(),
            requested_format: request.file_format,
            default_format: store.default_file_format,
        };
        core.reload(&store.registry)?;
        Ok(core)
    }

    /// Rebuild the in-memory info from the declaration and whatever is on disk.
    fn reload(&mut self, registry: &ArtifactRegistry) -> StoreResult<()> {
        let mut info = ArtifactInfo::new(
            self.identity.clone(),
            self.fields.clone(),
            self.data_dir.clone(),
        );
        if let Some(features) = &self.features {
            info = info.with_features(Arc::clone(features));
        }
        self.info = info;
        if self.data_exists() {
            self.load_existing(registry)?;
        } else {
            registry.invalidate(&self.key());
        }
        let file_format = match (self.requested_format, self.info.file_format()) {
            (Some(requested), _) => Some(requested),
            (None, None) => self.default_format,
            (None, Some(_)) => None,
        };
        self.info.set_file_format(file_format, false)
    }

    fn key(&self) -> ArtifactKey {
        ArtifactKey::new(
            self.identity.name.clone(),
            self.dataset_path.config.clone(),
            self.identity.version.clone(),
        )
    }

    fn load_existing(&mut self, registry: &ArtifactRegistry) -> StoreResult<()> {
        info!(dir = %self.data_dir.display(), "loading descriptor");
        let descriptor = registry.descriptor(&self.key(), &self.data_dir)?;
        self.info
            .apply_descriptor(&self.data_dir, Descriptor::clone(&descriptor))
    }

    /// Whether the canonical directory holds anything.
    fn data_exists(&self) -> bool {
        fs::read_dir(&self.data_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    pub fn variant(&self) -> Option<&ConfigVariant> {
        self.variant.as_deref()
    }

    pub fn version(&self) -> &Version {
        &self.identity.version
    }

    pub fn canonical_version(&self) -> &Version {
        &self.canonical_version
    }

    /// Canonical version first, then supported versions.
    pub fn versions(&self) -> Vec<Version> {
        candidates(&self.canonical_version, &self.supported_versions)
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn info(&self) -> &ArtifactInfo {
        &self.info
    }
}

/// A dataset this code can generate and publish
pub struct GeneratingArtifact<'s> {
    store: &'s Store,
    core: ArtifactCore,
    generator: Box<dyn SplitGenerator>,
    download_manager: Box<dyn DownloadManager>,
    default_variant: Option<String>,
}

impl<'s> GeneratingArtifact<'s> {
    pub fn with_download_manager(mut self, download_manager: Box<dyn DownloadManager>) -> Self {
        self.download_manager = download_manager;
        self
    }

    pub fn core(&self) -> &ArtifactCore {
        &self.core
    }

    pub fn info(&self) -> &ArtifactInfo {
        &self.core.info
    }

    pub fn data_dir(&self) -> &Path {
        &self.core.data_dir
    }

    /// Generate and publish the dataset unless it is already there.
    ///
    /// Every precondition is checked before the canonical directory is
    /// touched. A regeneration keeps the published copy until the new one
    /// is renamed over it.
    pub fn prepare(&mut self, options: &PrepareOptions) -> StoreResult<PrepareOutcome> {
        let dir = self.core.data_dir.clone();
        let key = self.core.key();
        let exists = self.core.data_exists();

        if exists && options.mode == DownloadMode::ReuseDatasetIfExists {
            info!(dataset = %self.core.identity.name, dir = %dir.display(), "reusing dataset");
            if !self.core.info.is_fully_initialized() {
                self.core.load_existing(&self.store.registry)?;
            }
            return Ok(PrepareOutcome::Reused);
        }

        self.check_generatable()?;

        if exists && options.mode == DownloadMode::ForceRedownload {
            return Err(StoreError::AlreadyExists {
                name: self.core.identity.name.clone(),
                version: self.core.identity.version.to_string(),
                dir,
            });
        }

        self.store.publisher.check_disk_space(
            &self.core.data_root,
            self.download_manager.download_size_estimate(),
            self.generator.dataset_size_estimate(),
        )?;

        // only ReuseCacheIfExists gets here with a published dataset
        let regenerate = exists;
        if regenerate {
            info!(dataset = %self.core.identity.name, dir = %dir.display(), "regenerating dataset");
            self.core.info.begin_regeneration();
        } else {
            info!(dataset = %self.core.identity.name, dir = %dir.display(), "generating dataset");
        }

        let result = self.generate_and_publish(&dir, regenerate, options);
        let published = match result {
            Ok(published) => published,
            Err(err) => {
                if let Err(restore) = self.core.reload(&self.store.registry) {
                    warn!(error = %restore, "could not restore dataset state after a failed generation");
                }
                return Err(err);
            }
        };

        self.core.info.update_data_dir(&dir)?;
        let descriptor = self.store.registry.refresh(&key, &dir)?;
        self.core
            .info
            .apply_descriptor(&dir, Descriptor::clone(&descriptor))?;
        Ok(PrepareOutcome::Generated {
            swept: published.swept,
        })
    }

    fn generate_and_publish(
        &mut self,
        dir: &Path,
        regenerate: bool,
        options: &PrepareOptions,
    ) -> StoreResult<Published<()>> {
        if options.file_format.is_some() {
            self.core.info.set_file_format(options.file_format, true)?;
        }
        if !regenerate && dir.exists() {
            // an empty leftover directory is not a dataset
            fs::remove_dir(dir)?;
        }
        if let Some(default_variant) = &self.default_variant {
            save_default_config_name(
                &self.core.dataset_path.common_dir(&self.core.data_root),
                default_variant,
            )?;
        }

        let generator = &self.generator;
        let download_manager = &*self.download_manager;
        let info = &mut self.core.info;
        let mode = options.mode;
        let generate = |tmp: &Path| -> Result<(), CollaboratorError> {
            info.update_data_dir(tmp)?;
            let ctx = GenerationContext {
                write_dir: tmp,
                template: info.file_template(),
                download_manager,
                mode,
            };
            let splits = generator.generate(&ctx)?;
            info.set_splits(splits)?;
            if let Some(metadata) = generator.metadata() {
                info.set_metadata(metadata);
            }
            info.set_download_size(download_manager.downloaded_size());
            info.write_to_directory(tmp)?;
            Ok(())
        };
        if regenerate {
            self.store.publisher.republish(dir, generate)
        } else {
            self.store.publisher.publish(dir, generate)
        }
    }

    /// Only versions this code can still produce may be generated.
    fn check_generatable(&self) -> StoreResult<()> {
        let version = &self.core.identity.version;
        let name = &self.core.identity.name;
        let versions = self.core.versions();

        if let Some(ceiling) = &version.implementation_ceiling {
            return Err(StoreError::VersionTooOld {
                message: format!(
                    "version {} of '{}' can only be generated by implementation {} or earlier",
                    version, name, ceiling
                ),
                generatable: versions
                    .iter()
                    .filter(|v| v.is_generatable())
                    .map(ToString::to_string)
                    .collect(),
            });
        }

        let mut installable = BTreeSet::new();
        installable.insert(self.core.canonical_version.clone());
        if let Some(max) = versions.iter().max() {
            installable.insert(max.clone());
        }
        if !installable.contains(version) {
            return Err(StoreError::VersionTooOld {
                message: format!(
                    "version {} of '{}' is too old to be generated by this code",
                    version, name
                ),
                generatable: installable.iter().map(ToString::to_string).collect(),
            });
        }
        Ok(())
    }
}

/// A published dataset opened from its directory alone
pub struct ReadOnlyArtifact {
    info: ArtifactInfo,
}

impl ReadOnlyArtifact {
    /// Rebuild identity and splits from the descriptor in `dir`.
    pub fn from_dir(dir: &Path) -> StoreResult<Self> {
        info!(dir = %dir.display(), "loading descriptor");
        let descriptor = Descriptor::read(dir)?;
        let version: Version = descriptor.version.parse().map_err(|e| {
            StoreError::Consistency(format!(
                "descriptor in {} holds an invalid version: {}",
                dir.display(),
                e
            ))
        })?;
        let identity = ArtifactIdentity {
            name: descriptor.name.clone(),
            version,
            config_name: descriptor.config_name.clone(),
            config_description: descriptor.config_description.clone(),
            release_notes: descriptor.release_notes.clone(),
            module_name: descriptor.module_name.clone(),
        };
        let mut info = ArtifactInfo::new(identity, DescriptorFields::default(), dir.to_path_buf());
        info.apply_descriptor(dir, descriptor)?;
        Ok(Self { info })
    }

    pub fn info(&self) -> &ArtifactInfo {
        &self.info
    }

    pub fn data_dir(&self) -> &Path {
        self.info.data_dir()
    }
}

/// Either kind of artifact, for callers that only read
pub enum Artifact<'s> {
    Generating(GeneratingArtifact<'s>),
    ReadOnly(ReadOnlyArtifact),
}

impl<'s> Artifact<'s> {
    pub fn info(&self) -> &ArtifactInfo {
        match self {
            Artifact::Generating(artifact) => artifact.info(),
            Artifact::ReadOnly(artifact) => artifact.info(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        match self {
            Artifact::Generating(artifact) => artifact.data_dir(),
            Artifact::ReadOnly(artifact) => artifact.data_dir(),
        }
    }

    /// The loaded descriptor; fails if the dataset was never published.
    pub fn load(&self) -> StoreResult<&ArtifactInfo> {
        let info = self.info();
        if !info.is_fully_initialized() {
            return Err(StoreError::NotFound {
                dir: self.data_dir().to_path_buf(),
                reason: "dataset has not been prepared".to_string(),
            });
        }
        if !info.data_dir().join(DESCRIPTOR_FILENAME).is_file() {
            return Err(StoreError::NotFound {
                dir: info.data_dir().to_path_buf(),
                reason: "descriptor is missing from the dataset directory".to_string(),
            });
        }
        Ok(info)
    }
}

impl<'s> From<GeneratingArtifact<'s>> for Artifact<'s> {
    fn from(artifact: GeneratingArtifact<'s>) -> Self {
        Artifact::Generating(artifact)
    }
}

impl From<ReadOnlyArtifact> for Artifact<'_> {
    fn from(artifact: ReadOnlyArtifact) -> Self {
        Artifact::ReadOnly(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{find_incomplete_dirs, DiskSpaceProbe, FixedSpace};
    use crate::splits::SplitInfo;
    use crate::variant::load_default_config_name;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    /// Writes one small file per shard.
    struct ShardWriter {
        splits: Vec<(&'static str, Vec<u64>)>,
        calls: Arc<AtomicUsize>,
    }

    impl ShardWriter {
        fn new(splits: Vec<(&'static str, Vec<u64>)>) -> Self {
            Self {
                splits,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SplitGenerator for ShardWriter {
        fn generate(&self, ctx: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut splits = SplitDict::new();
            for (name, lengths) in &self.splits {
                let template = ctx.template.with_split(*name);
                let mut num_bytes = 0;
                for path in template.filepaths(lengths.len())? {
                    assert!(path.starts_with(ctx.write_dir));
                    fs::write(&path, b"records")?;
                    num_bytes += 7;
                }
                splits.insert(SplitInfo::new(*name, lengths.clone(), num_bytes))?;
            }
            Ok(splits)
        }
    }

    struct Failing;

    impl SplitGenerator for Failing {
        fn generate(&self, ctx: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError> {
            fs::write(ctx.write_dir.join("partial"), b"x")?;
            Err("source unavailable".into())
        }
    }

    /// Succeeds on the first run only.
    struct FailsOnRerun {
        inner: ShardWriter,
    }

    impl SplitGenerator for FailsOnRerun {
        fn generate(&self, ctx: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError> {
            if self.inner.calls.load(Ordering::SeqCst) > 0 {
                fs::write(ctx.write_dir.join("partial"), b"x")?;
                return Err("source unavailable".into());
            }
            self.inner.generate(ctx)
        }
    }

    /// Free space that tests can shrink between calls.
    struct SharedSpace(Arc<AtomicU64>);

    impl DiskSpaceProbe for SharedSpace {
        fn available_bytes(&self, _path: &Path) -> Option<u64> {
            Some(self.0.load(Ordering::SeqCst))
        }
    }

    fn store(root: &Path) -> Store {
        Store::new(DataDirLocator::new(Some(root.to_path_buf()), vec![]))
            .with_publisher(Publisher::new(Box::new(FixedSpace(None))))
    }

    fn definition() -> ArtifactDefinition {
        ArtifactDefinition::new("mnist")
            .with_version(v("1.0.0"))
            .with_supported_versions(vec![v("0.9.0")])
    }

    fn writer() -> Box<dyn SplitGenerator> {
        Box::new(ShardWriter::new(vec![
            ("train", vec![100, 100]),
            ("test", vec![50]),
        ]))
    }

    #[test]
    fn test_prepare_then_reuse() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        assert!(!artifact.info().is_fully_initialized());

        let outcome = artifact.prepare(&PrepareOptions::default()).unwrap();
        assert_eq!(outcome, PrepareOutcome::Generated { swept: vec![] });
        let dir = root.path().join("mnist/1.0.0");
        assert_eq!(artifact.data_dir(), dir);
        assert!(dir.join("descriptor.json").exists());
        assert!(dir.join("mnist-train.tfrecord-00001-of-00002").exists());
        assert_eq!(artifact.info().splits().total_num_examples(), 250);
        assert!(artifact.info().is_fully_initialized());

        let again = artifact.prepare(&PrepareOptions::default()).unwrap();
        assert_eq!(again, PrepareOutcome::Reused);
        assert_eq!(store.registry().len(), 1);
    }

    #[test]
    fn test_templates_point_at_canonical_dir_after_publish() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();
        let train = artifact.info().splits().single("train").unwrap();
        for path in train.filepaths().unwrap() {
            assert!(path.exists(), "{}", path.display());
            assert!(path.starts_with(artifact.data_dir()));
        }
    }

    #[test]
    fn test_failed_generation_is_not_present() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), Box::new(Failing))
            .unwrap();
        let err = artifact.prepare(&PrepareOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::Generation { .. }));
        assert!(!root.path().join("mnist/1.0.0").exists());
        assert_eq!(artifact.data_dir(), root.path().join("mnist/1.0.0"));

        let mut retry = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        assert!(!retry.info().is_fully_initialized());
        let outcome = retry.prepare(&PrepareOptions::default()).unwrap();
        assert!(matches!(outcome, PrepareOutcome::Generated { .. }));
    }

    #[test]
    fn test_force_redownload_refuses_overwrite() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();

        let err = artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::ForceRedownload,
                file_format: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_reuse_cache_regenerates() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let generator = ShardWriter::new(vec![("train", vec![10])]);
        let calls = Arc::clone(&generator.calls);
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), Box::new(generator))
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();
        let outcome = artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::ReuseCacheIfExists,
                file_format: None,
            })
            .unwrap();
        assert!(matches!(outcome, PrepareOutcome::Generated { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reuse_cache_with_new_file_format() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();
        let dir = root.path().join("mnist/1.0.0");
        assert!(dir.join("mnist-test.tfrecord-00000-of-00001").exists());

        let outcome = artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::ReuseCacheIfExists,
                file_format: Some(FileFormat::Riegeli),
            })
            .unwrap();
        assert!(matches!(outcome, PrepareOutcome::Generated { .. }));
        assert_eq!(artifact.info().file_format(), Some(FileFormat::Riegeli));
        assert!(dir.join("descriptor.json").exists());
        assert!(dir.join("mnist-test.riegeli-00000-of-00001").exists());
        assert!(!dir.join("mnist-test.tfrecord-00000-of-00001").exists());
        assert!(find_incomplete_dirs(root.path()).unwrap().is_empty());

        let reloaded = store.open_dir(&dir).unwrap();
        assert_eq!(reloaded.info().file_format(), Some(FileFormat::Riegeli));
    }

    #[test]
    fn test_reuse_cache_keeps_dataset_when_disk_is_short() {
        let root = TempDir::new().unwrap();
        let space = Arc::new(AtomicU64::new(u64::MAX));
        let store = Store::new(DataDirLocator::new(Some(root.path().to_path_buf()), vec![]))
            .with_publisher(Publisher::new(Box::new(SharedSpace(Arc::clone(&space)))));

        struct Large(ShardWriter);
        impl SplitGenerator for Large {
            fn generate(&self, ctx: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError> {
                self.0.generate(ctx)
            }
            fn dataset_size_estimate(&self) -> u64 {
                1 << 20
            }
        }

        let mut artifact = store
            .open(
                &definition(),
                &ArtifactRequest::default(),
                Box::new(Large(ShardWriter::new(vec![("train", vec![10])]))),
            )
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();

        space.store(0, Ordering::SeqCst);
        let err = artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::ReuseCacheIfExists,
                file_format: Some(FileFormat::ArrayRecord),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Resource { .. }));

        let dir = root.path().join("mnist/1.0.0");
        assert!(dir.join("descriptor.json").exists());
        assert!(dir.join("mnist-train.tfrecord-00000-of-00001").exists());
        assert!(artifact.info().is_fully_initialized());
        assert_eq!(artifact.info().file_format(), Some(FileFormat::Tfrecord));
    }

    #[test]
    fn test_failed_regeneration_keeps_published_dataset() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let generator = FailsOnRerun {
            inner: ShardWriter::new(vec![("train", vec![10, 10])]),
        };
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), Box::new(generator))
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();

        let err = artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::ReuseCacheIfExists,
                file_format: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::Generation { .. }));

        let dir = root.path().join("mnist/1.0.0");
        assert_eq!(artifact.info().data_dir(), dir);
        let artifact: Artifact<'_> = artifact.into();
        let info = artifact.load().unwrap();
        assert_eq!(info.splits().total_num_examples(), 20);
        for path in info.splits().single("train").unwrap().filepaths().unwrap() {
            assert!(path.exists(), "{}", path.display());
        }
    }

    #[test]
    fn test_failed_first_generation_is_not_loadable() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), Box::new(Failing))
            .unwrap();
        assert!(artifact.prepare(&PrepareOptions::default()).is_err());
        assert!(!artifact.info().is_fully_initialized());
        let artifact: Artifact<'_> = artifact.into();
        assert!(matches!(
            artifact.load().unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn test_old_version_not_generatable() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let definition = ArtifactDefinition::new("mnist")
            .with_version(v("1.0.0"))
            .with_supported_versions(vec![v("0.9.0"), v("2.0.0")]);
        let request = ArtifactRequest::default()
            .with_version(VersionRequest::parse(Some("0.9.0")).unwrap());
        let mut artifact = store.open(&definition, &request, writer()).unwrap();
        match artifact.prepare(&PrepareOptions::default()).unwrap_err() {
            StoreError::VersionTooOld { generatable, .. } => {
                assert_eq!(generatable, vec!["1.0.0", "2.0.0"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_implementation_ceiling() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let definition = ArtifactDefinition::new("mnist")
            .with_version(v("1.0.0"))
            .with_supported_versions(vec![v("2.0.0").with_implementation_ceiling("3.1.0")]);
        let request = ArtifactRequest::default().with_version(VersionRequest::Latest);
        let mut artifact = store.open(&definition, &request, writer()).unwrap();
        match artifact.prepare(&PrepareOptions::default()).unwrap_err() {
            StoreError::VersionTooOld { message, generatable } => {
                assert!(message.contains("3.1.0"));
                assert_eq!(generatable, vec!["1.0.0"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_insufficient_disk_space() {
        let root = TempDir::new().unwrap();
        let store = Store::new(DataDirLocator::new(Some(root.path().to_path_buf()), vec![]))
            .with_publisher(Publisher::new(Box::new(FixedSpace(Some(0)))));

        struct Big;
        impl SplitGenerator for Big {
            fn generate(&self, _: &GenerationContext<'_>) -> Result<SplitDict, CollaboratorError> {
                Ok(SplitDict::new())
            }
            fn dataset_size_estimate(&self) -> u64 {
                1 << 30
            }
        }

        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), Box::new(Big))
            .unwrap();
        let err = artifact.prepare(&PrepareOptions::default()).unwrap_err();
        assert!(matches!(err, StoreError::Resource { .. }));
        assert!(!root.path().join("mnist").join("1.0.0").exists());
    }

    #[test]
    fn test_variants_record_default_and_nest_dir() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let variants = VariantSet::new(
            vec![
                ConfigVariant::new("en").with_version(v("2.0.0")),
                ConfigVariant::new("fr").with_version(v("1.0.0")),
            ],
            None,
        )
        .unwrap();
        let definition = ArtifactDefinition::new("wiki").with_variants(variants);
        let request = ArtifactRequest::default().with_variant("fr");
        let mut artifact = store.open(&definition, &request, writer()).unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();

        assert_eq!(artifact.data_dir(), root.path().join("wiki/fr/1.0.0"));
        assert_eq!(
            artifact.info().identity().config_name.as_deref(),
            Some("fr")
        );
        assert_eq!(
            load_default_config_name(&root.path().join("wiki"))
                .unwrap()
                .as_deref(),
            Some("en")
        );
    }

    #[test]
    fn test_requested_file_format_used_for_shards() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact
            .prepare(&PrepareOptions {
                mode: DownloadMode::default(),
                file_format: Some(FileFormat::ArrayRecord),
            })
            .unwrap();
        assert_eq!(artifact.info().file_format(), Some(FileFormat::ArrayRecord));
        assert!(artifact
            .data_dir()
            .join("mnist-test.array_record-00000-of-00001")
            .exists());
    }

    #[test]
    fn test_store_default_file_format() {
        let root = TempDir::new().unwrap();
        let store = store(root.path()).with_default_file_format(FileFormat::Riegeli);
        let artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        assert_eq!(artifact.info().file_format(), Some(FileFormat::Riegeli));

        let declared = definition().with_fields(DescriptorFields {
            file_format: Some(FileFormat::ArrayRecord),
            ..Default::default()
        });
        let artifact = store
            .open(&declared, &ArtifactRequest::default(), writer())
            .unwrap();
        assert_eq!(artifact.info().file_format(), Some(FileFormat::ArrayRecord));
    }

    #[test]
    fn test_read_only_from_dir() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();

        let read_only = store.open_dir(&root.path().join("mnist/1.0.0")).unwrap();
        assert_eq!(read_only.info().name(), "mnist");
        assert_eq!(read_only.info().version(), &v("1.0.0"));
        assert_eq!(read_only.info().splits().names(), vec!["train", "test"]);

        let artifact: Artifact<'_> = read_only.into();
        assert!(artifact.load().is_ok());
    }

    #[test]
    fn test_load_before_prepare() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let artifact: Artifact<'_> = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap()
            .into();
        assert!(matches!(
            artifact.load().unwrap_err(),
            StoreError::NotFound { .. }
        ));
    }

    #[test]
    fn test_registry_invalidate() {
        let root = TempDir::new().unwrap();
        let store = store(root.path());
        let mut artifact = store
            .open(&definition(), &ArtifactRequest::default(), writer())
            .unwrap();
        artifact.prepare(&PrepareOptions::default()).unwrap();
        let key = ArtifactKey::new("mnist", None, v("1.0.0"));
        assert!(store.registry().get(&key).is_some());
        assert!(store.registry().invalidate(&key));
        assert!(store.registry().is_empty());
    }
}
