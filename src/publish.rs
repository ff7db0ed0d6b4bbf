//! Atomic build-then-publish protocol
//!
//! 1. Create `<target>.incomplete<hex>` next to the target
//! 2. Generate everything (shards + descriptor) inside it
//! 3. Rename it onto the target: the only write to the canonical path
//! 4. Remove incomplete shard files left by preempted workers
//!
//! A failed generation leaves the incomplete directory in place for
//! inspection. Incomplete paths are never read as datasets. When replacing
//! a published dataset, the old copy is only moved aside at step 3.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CollaboratorError, StoreError, StoreResult};
use crate::naming::{incomplete_path, is_incomplete_path};

/// Write `content` to an incomplete sibling of `path`, then rename it into place.
pub fn write_atomic(path: &Path, content: &[u8]) -> StoreResult<()> {
    let temp_path = incomplete_path(path);
    if let Err(e) = fs::write(&temp_path, content) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

/// Free space lookup used for the pre-generation check
pub trait DiskSpaceProbe: Send + Sync {
    /// Available bytes at `path`, or `None` if unknown.
    fn available_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe shelling out to POSIX `df -Pk`
#[derive(Debug, Clone, Copy, Default)]
pub struct DfProbe;

impl DiskSpaceProbe for DfProbe {
    fn available_bytes(&self, path: &Path) -> Option<u64> {
        // df needs an existing path: walk up to the closest ancestor
        let existing = path.ancestors().find(|p| p.exists())?;
        let output = Command::new("df").arg("-Pk").arg(existing).output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_df_available(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Available bytes from `df -Pk` output, saturating on overflow.
fn parse_df_available(stdout: &str) -> Option<u64> {
    // Filesystem 1024-blocks Used Available Capacity Mounted-on
    let last_line = stdout.lines().last()?;
    let parts: Vec<&str> = last_line.split_whitespace().collect();
    let available_kb: u64 = parts.get(3)?.parse().ok()?;
    Some(available_kb.saturating_mul(1024))
}

/// Probe reporting a fixed amount, for tests and dry runs
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub Option<u64>);

impl DiskSpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}

/// Outcome of a successful publish
#[derive(Debug)]
pub struct Published<T> {
    /// Canonical directory now holding the dataset
    pub dir: PathBuf,
    /// Value returned by the generation callback
    pub output: T,
    /// Stale incomplete files removed after the rename
    pub swept: Vec<PathBuf>,
}

/// Drives generation into a temporary directory and publishes it.
pub struct Publisher {
    disk: Box<dyn DiskSpaceProbe>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new(Box::new(DfProbe))
    }
}

impl Publisher {
    pub fn new(disk: Box<dyn DiskSpaceProbe>) -> Self {
        Self { disk }
    }

    /// Fail if `root` cannot hold `download + generated` more bytes.
    ///
    /// Unknown free space counts as enough.
    pub fn check_disk_space(&self, root: &Path, download: u64, generated: u64) -> StoreResult<()> {
        let needed = download.saturating_add(generated);
        match self.disk.available_bytes(root) {
            Some(available) if available < needed => Err(StoreError::Resource {
                root: root.to_path_buf(),
                needed,
                download,
                generated,
                available,
            }),
            Some(available) => {
                debug!(root = %root.display(), available, needed, "disk space check passed");
                Ok(())
            }
            None => {
                debug!(root = %root.display(), "free space unknown, skipping check");
                Ok(())
            }
        }
    }

    /// Run `generate` inside a fresh incomplete directory and rename it onto `target`.
    ///
    /// `target` must not exist. On generation failure the incomplete
    /// directory is kept and `target` is untouched.
    pub fn publish<T, F>(&self, target: &Path, generate: F) -> StoreResult<Published<T>>
    where
        F: FnOnce(&Path) -> Result<T, CollaboratorError>,
    {
        self.commit(target, false, generate)
    }

    /// Like [`Publisher::publish`], but an existing `target` is swapped out
    /// once generation has succeeded.
    ///
    /// The old directory stays in place until then, so any failure up to
    /// the final rename leaves it readable.
    pub fn republish<T, F>(&self, target: &Path, generate: F) -> StoreResult<Published<T>>
    where
        F: FnOnce(&Path) -> Result<T, CollaboratorError>,
    {
        self.commit(target, true, generate)
    }

    fn commit<T, F>(&self, target: &Path, replace: bool, generate: F) -> StoreResult<Published<T>>
    where
        F: FnOnce(&Path) -> Result<T, CollaboratorError>,
    {
        if target.exists() && !replace {
            return Err(StoreError::Consistency(format!(
                "publish target {} already exists",
                target.display()
            )));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_dir = incomplete_path(target);
        fs::create_dir(&tmp_dir)?;
        debug!(tmp = %tmp_dir.display(), "generating into incomplete directory");

        let output = match generate(&tmp_dir) {
            Ok(output) => output,
            Err(source) => {
                warn!(tmp = %tmp_dir.display(), error = %source, "generation failed, leaving incomplete directory");
                return Err(StoreError::Generation {
                    incomplete_dir: tmp_dir,
                    source,
                });
            }
        };

        if replace && target.exists() {
            swap_into_place(&tmp_dir, target)?;
        } else {
            fs::rename(&tmp_dir, target)?;
        }
        info!(dir = %target.display(), "published");

        let swept = sweep_incomplete_files(target)?;
        Ok(Published {
            dir: target.to_path_buf(),
            output,
            swept,
        })
    }
}

/// Move `target` aside, rename `tmp_dir` onto it, then drop the old copy.
///
/// The old copy is put back if the second rename fails.
fn swap_into_place(tmp_dir: &Path, target: &Path) -> StoreResult<()> {
    let retired = incomplete_path(target);
    fs::rename(target, &retired)?;
    if let Err(e) = fs::rename(tmp_dir, target) {
        if let Err(restore) = fs::rename(&retired, target) {
            warn!(retired = %retired.display(), error = %restore, "could not restore previous dataset");
        }
        return Err(e.into());
    }
    debug!(retired = %retired.display(), "removing replaced dataset");
    if let Err(e) = fs::remove_dir_all(&retired) {
        warn!(retired = %retired.display(), error = %e, "could not remove replaced dataset");
    }
    Ok(())
}

/// Delete incomplete-decorated files directly inside `dir`.
pub fn sweep_incomplete_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut deleted = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_incomplete_path(&path) {
            fs::remove_file(&path)?;
            deleted.push(path);
        }
    }
    deleted.sort();
    if !deleted.is_empty() {
        let sample: Vec<String> = deleted
            .iter()
            .take(3)
            .map(|p| p.display().to_string())
            .collect();
        info!(
            count = deleted.len(),
            sample = %sample.join(", "),
            "deleted incomplete files"
        );
    }
    Ok(deleted)
}

/// A leftover incomplete directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteDir {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Find incomplete directories anywhere below `root`.
pub fn find_incomplete_dirs(root: &Path) -> io::Result<Vec<IncompleteDir>> {
    let mut found = Vec::new();
    if !root.exists() {
        return Ok(found);
    }
    let mut walker = WalkDir::new(root).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() && is_incomplete_path(entry.path()) {
            found.push(IncompleteDir {
                path: entry.path().to_path_buf(),
                size_bytes: dir_size(entry.path())?,
            });
            walker.skip_current_dir();
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

/// Remove incomplete directories, returning the bytes reclaimed.
pub fn cleanup_incomplete_dirs(dirs: &[IncompleteDir]) -> io::Result<u64> {
    let mut total = 0u64;
    for dir in dirs {
        if !is_incomplete_path(&dir.path) {
            continue;
        }
        warn!(dir = %dir.path.display(), bytes = dir.size_bytes, "removing incomplete directory");
        fs::remove_dir_all(&dir.path)?;
        total += dir.size_bytes;
    }
    Ok(total)
}

fn dir_size(path: &Path) -> io::Result<u64> {
    let mut size = 0u64;
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            size += entry.metadata().map_err(io::Error::from)?.len();
        }
    }
    Ok(size)
}
