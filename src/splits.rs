//! Split and statistics model
//!
//! A split is a named slice of a dataset, stored as one or more shards.
//! Statistics are an opaque JSON blob describing generated content.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::naming::ShardedFileTemplate;

/// Split name that may never be declared
pub const RESERVED_SPLIT_NAME: &str = "all";

/// One split produced in a single directory
#[derive(Debug, Clone, PartialEq)]
pub struct SplitInfo {
    pub name: String,
    /// Record count of every shard, in shard order
    pub shard_lengths: Vec<u64>,
    /// Total size of the shard files
    pub num_bytes: u64,
    pub statistics: Option<serde_json::Value>,
    pub filename_template: Option<ShardedFileTemplate>,
}

impl SplitInfo {
    pub fn new(name: impl Into<String>, shard_lengths: Vec<u64>, num_bytes: u64) -> Self {
        Self {
            name: name.into(),
            shard_lengths,
            num_bytes,
            statistics: None,
            filename_template: None,
        }
    }

    pub fn with_statistics(mut self, statistics: serde_json::Value) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn with_filename_template(mut self, template: ShardedFileTemplate) -> Self {
        self.filename_template = Some(template);
        self
    }

    pub fn num_shards(&self) -> usize {
        self.shard_lengths.len()
    }

    pub fn num_examples(&self) -> u64 {
        self.shard_lengths.iter().sum()
    }

    /// True if statistics are present and not an empty object/null.
    pub fn has_statistics(&self) -> bool {
        match &self.statistics {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Shard file paths; requires a filename template.
    pub fn filepaths(&self) -> StoreResult<Vec<PathBuf>> {
        let template = self.filename_template.as_ref().ok_or_else(|| {
            StoreError::Consistency(format!("split '{}' has no filename template", self.name))
        })?;
        template.with_split(&self.name).filepaths(self.num_shards())
    }
}

/// A split whose shards live in several directories
///
/// Reconciliation never looks inside these.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiSplitInfo {
    pub name: String,
    pub split_infos: Vec<SplitInfo>,
}

impl MultiSplitInfo {
    pub fn num_examples(&self) -> u64 {
        self.split_infos.iter().map(SplitInfo::num_examples).sum()
    }

    pub fn num_bytes(&self) -> u64 {
        self.split_infos.iter().map(|s| s.num_bytes).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SplitEntry {
    Single(SplitInfo),
    Multi(MultiSplitInfo),
}

impl SplitEntry {
    pub fn name(&self) -> &str {
        match self {
            SplitEntry::Single(s) => &s.name,
            SplitEntry::Multi(m) => &m.name,
        }
    }

    pub fn num_examples(&self) -> u64 {
        match self {
            SplitEntry::Single(s) => s.num_examples(),
            SplitEntry::Multi(m) => m.num_examples(),
        }
    }

    pub fn num_bytes(&self) -> u64 {
        match self {
            SplitEntry::Single(s) => s.num_bytes,
            SplitEntry::Multi(m) => m.num_bytes(),
        }
    }

    pub fn as_single(&self) -> Option<&SplitInfo> {
        match self {
            SplitEntry::Single(s) => Some(s),
            SplitEntry::Multi(_) => None,
        }
    }
}

impl From<SplitInfo> for SplitEntry {
    fn from(info: SplitInfo) -> Self {
        SplitEntry::Single(info)
    }
}

impl From<MultiSplitInfo> for SplitEntry {
    fn from(info: MultiSplitInfo) -> Self {
        SplitEntry::Multi(info)
    }
}

/// Splits keyed by name, kept in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitDict {
    entries: Vec<SplitEntry>,
}

impl SplitDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entries, rejecting duplicates and the reserved name.
    pub fn from_entries<I, E>(entries: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = E>,
        E: Into<SplitEntry>,
    {
        let mut dict = Self::new();
        for entry in entries {
            dict.insert(entry)?;
        }
        Ok(dict)
    }

    pub fn insert(&mut self, entry: impl Into<SplitEntry>) -> StoreResult<()> {
        let entry = entry.into();
        check_split_name(entry.name())?;
        if self.get(entry.name()).is_some() {
            return Err(StoreError::Consistency(format!(
                "split '{}' declared twice",
                entry.name()
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SplitEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn single(&self, name: &str) -> Option<&SplitInfo> {
        self.get(name).and_then(SplitEntry::as_single)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SplitEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(SplitEntry::name).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_num_examples(&self) -> u64 {
        self.entries.iter().map(SplitEntry::num_examples).sum()
    }

    /// Generated dataset size in bytes
    pub fn total_num_bytes(&self) -> u64 {
        self.entries.iter().map(SplitEntry::num_bytes).sum()
    }

    pub fn has_multi(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e, SplitEntry::Multi(_)))
    }
}

impl IntoIterator for SplitDict {
    type Item = SplitEntry;
    type IntoIter = std::vec::IntoIter<SplitEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

fn check_split_name(name: &str) -> StoreResult<()> {
    if name.eq_ignore_ascii_case(RESERVED_SPLIT_NAME) {
        return Err(StoreError::Consistency(format!(
            "`{}` is a reserved keyword. Split cannot be named like this",
            RESERVED_SPLIT_NAME
        )));
    }
    if name.is_empty() {
        return Err(StoreError::Consistency("split name must not be empty".to_string()));
    }
    Ok(())
}

/// Persisted form of a split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub name: String,
    pub num_shards: usize,
    pub shard_lengths: Vec<u64>,
    pub num_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistics: Option<serde_json::Value>,
}

impl SplitRecord {
    pub fn from_info(info: &SplitInfo) -> Self {
        Self {
            name: info.name.clone(),
            num_shards: info.num_shards(),
            shard_lengths: info.shard_lengths.clone(),
            num_bytes: info.num_bytes,
            statistics: info.statistics.clone(),
        }
    }

    /// Rebuild a split, checking the shard count against the shard lengths.
    pub fn into_info(self, template: &ShardedFileTemplate) -> StoreResult<SplitInfo> {
        if self.num_shards != self.shard_lengths.len() {
            return Err(StoreError::Consistency(format!(
                "split '{}' declares {} shards but lists {} shard lengths",
                self.name,
                self.num_shards,
                self.shard_lengths.len()
            )));
        }
        Ok(SplitInfo {
            filename_template: Some(template.with_split(&self.name)),
            name: self.name,
            shard_lengths: self.shard_lengths,
            num_bytes: self.num_bytes,
            statistics: self.statistics,
        })
    }
}

/// Flatten a split dict into records; multi-splits expand to their parts.
pub fn to_records(splits: &SplitDict) -> Vec<SplitRecord> {
    splits
        .iter()
        .flat_map(|entry| match entry {
            SplitEntry::Single(s) => vec![SplitRecord::from_info(s)],
            SplitEntry::Multi(m) => m.split_infos.iter().map(SplitRecord::from_info).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counts() {
        let train = SplitInfo::new("train", vec![100, 100], 2048);
        assert_eq!(train.num_shards(), 2);
        assert_eq!(train.num_examples(), 200);
    }

    #[test]
    fn test_reserved_name_rejected() {
        let err = SplitDict::from_entries([SplitInfo::new("ALL", vec![1], 1)]).unwrap_err();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let err = SplitDict::from_entries([
            SplitInfo::new("train", vec![1], 1),
            SplitInfo::new("train", vec![2], 1),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_declaration_order_kept() {
        let dict = SplitDict::from_entries([
            SplitInfo::new("validation", vec![1], 1),
            SplitInfo::new("train", vec![2], 1),
            SplitInfo::new("test", vec![3], 1),
        ])
        .unwrap();
        assert_eq!(dict.names(), vec!["validation", "train", "test"]);
        assert_eq!(dict.total_num_examples(), 6);
        assert_eq!(dict.total_num_bytes(), 3);
    }

    #[test]
    fn test_has_statistics() {
        let mut split = SplitInfo::new("train", vec![1], 1);
        assert!(!split.has_statistics());
        split.statistics = Some(json!({}));
        assert!(!split.has_statistics());
        split.statistics = Some(json!({"num_examples": 1}));
        assert!(split.has_statistics());
    }

    #[test]
    fn test_record_shard_count_mismatch() {
        let record = SplitRecord {
            name: "train".to_string(),
            num_shards: 3,
            shard_lengths: vec![1, 2],
            num_bytes: 10,
            statistics: None,
        };
        let template = ShardedFileTemplate::new("mnist", "/data", "tfrecord");
        let err = record.into_info(&template).unwrap_err();
        assert!(matches!(err, StoreError::Consistency(_)));
    }

    #[test]
    fn test_multi_split_flattens_to_records() {
        let multi = MultiSplitInfo {
            name: "train".to_string(),
            split_infos: vec![
                SplitInfo::new("train", vec![5], 10),
                SplitInfo::new("train", vec![7], 12),
            ],
        };
        let dict = SplitDict::from_entries([SplitEntry::from(multi)]).unwrap();
        assert!(dict.has_multi());
        assert_eq!(dict.total_num_examples(), 12);
        assert_eq!(to_records(&dict).len(), 2);
    }

    #[test]
    fn test_filepaths_use_template() {
        let split = SplitInfo::new("test", vec![50], 1)
            .with_filename_template(ShardedFileTemplate::new("mnist", "/d", "riegeli"));
        assert_eq!(
            split.filepaths().unwrap(),
            vec![PathBuf::from("/d/mnist-test.riegeli-00000-of-00001")]
        );
    }
}
