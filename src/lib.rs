//! vds-store - Versioned dataset store
//!
//! Resolves which version of a dataset to use, finds or creates its
//! directory across several data roots, publishes generated datasets
//! atomically, and keeps their descriptors (splits, shard layout,
//! statistics) consistent across regenerations.

pub mod artifact;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod features;
pub mod locator;
pub mod logging;
pub mod naming;
pub mod publish;
pub mod splits;
pub mod variant;

pub use artifact::{
    Artifact, ArtifactDefinition, ArtifactKey, ArtifactRegistry, ArtifactRequest, DownloadManager,
    DownloadMode, GeneratingArtifact, GenerationContext, NoDownloads, PrepareOptions,
    PrepareOutcome, ReadOnlyArtifact, SplitGenerator, Store,
};
pub use descriptor::{ArtifactIdentity, ArtifactInfo, Descriptor, DescriptorFields};
pub use error::{CollaboratorError, StoreError, StoreResult};
pub use locator::{DataDirLocator, Located};
pub use naming::{DatasetPath, FileFormat, ShardedFileTemplate};
pub use publish::{Published, Publisher};
pub use splits::{MultiSplitInfo, SplitDict, SplitEntry, SplitInfo};
pub use variant::{ConfigVariant, VariantRequest, VariantSet};
pub use vds_version::{Version, VersionRequest};
