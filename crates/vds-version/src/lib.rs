//! Dataset version parsing, matching and resolution.
//!
//! A dataset version is a `major.minor.patch` triple. Callers request a
//! version either exactly (`"1.0.0"`), through a wildcard pattern
//! (`"1.2.*"`), through the `latest` sentinel, or not at all. Resolution
//! picks one concrete version out of the versions a dataset declares.

mod resolve;

pub use resolve::{candidates, resolve_version, ResolveError};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::OnceLock;

/// Strings accepted as the "highest available" sentinel.
pub const LATEST_SENTINELS: &[&str] = &["latest", "experimental_latest"];

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)$").expect("static version regex"))
}

fn pattern_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+|\*)\.(\d+|\*)\.(\d+|\*)$").expect("static pattern regex")
    })
}

/// Errors from parsing version strings and patterns.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionParseError {
    #[error("invalid version '{0}', expected 'x.y.z'")]
    InvalidVersion(String),

    #[error("invalid version pattern '{0}', expected 'x.y.z' where each part may be '*'")]
    InvalidPattern(String),
}

/// A dataset version.
///
/// Equality, hashing and ordering only look at the numeric triple. The
/// optional implementation ceiling names the last implementation release
/// able to generate this version; newer code can still read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub implementation_ceiling: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            implementation_ceiling: None,
        }
    }

    /// Mark this version as only generatable by implementations up to `ceiling`.
    pub fn with_implementation_ceiling(mut self, ceiling: impl Into<String>) -> Self {
        self.implementation_ceiling = Some(ceiling.into());
        self
    }

    /// Whether current code may generate (not just read) this version.
    pub fn is_generatable(&self) -> bool {
        self.implementation_ceiling.is_none()
    }

    fn triple(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }

    /// Check this version against a request.
    pub fn matches(&self, request: &VersionRequest) -> bool {
        match request {
            VersionRequest::Any | VersionRequest::Latest => true,
            VersionRequest::Pattern(pattern) => pattern.matches(self),
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.triple() == other.triple()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.triple().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.triple().cmp(&other.triple())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = version_re()
            .captures(s)
            .ok_or_else(|| VersionParseError::InvalidVersion(s.to_string()))?;
        let part = |i: usize| -> Result<u64, VersionParseError> {
            caps[i]
                .parse()
                .map_err(|_| VersionParseError::InvalidVersion(s.to_string()))
        };
        Ok(Self::new(part(1)?, part(2)?, part(3)?))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

/// A `x.y.z` pattern where any component may be a `*` wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionPattern {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
}

impl VersionPattern {
    pub fn matches(&self, version: &Version) -> bool {
        let part = |want: Option<u64>, got: u64| want.map_or(true, |w| w == got);
        part(self.major, version.major)
            && part(self.minor, version.minor)
            && part(self.patch, version.patch)
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = |p: Option<u64>| p.map_or_else(|| "*".to_string(), |n| n.to_string());
        write!(
            f,
            "{}.{}.{}",
            part(self.major),
            part(self.minor),
            part(self.patch)
        )
    }
}

impl FromStr for VersionPattern {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = pattern_re()
            .captures(s)
            .ok_or_else(|| VersionParseError::InvalidPattern(s.to_string()))?;
        let part = |i: usize| -> Result<Option<u64>, VersionParseError> {
            match &caps[i] {
                "*" => Ok(None),
                n => n
                    .parse()
                    .map(Some)
                    .map_err(|_| VersionParseError::InvalidPattern(s.to_string())),
            }
        };
        Ok(Self {
            major: part(1)?,
            minor: part(2)?,
            patch: part(3)?,
        })
    }
}

impl From<&Version> for VersionPattern {
    fn from(version: &Version) -> Self {
        Self {
            major: Some(version.major),
            minor: Some(version.minor),
            patch: Some(version.patch),
        }
    }
}

/// What a caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionRequest {
    /// No preference: the first declared version wins.
    #[default]
    Any,
    /// The highest declared version.
    Latest,
    /// An exact version or wildcard pattern.
    Pattern(VersionPattern),
}

impl VersionRequest {
    /// Parse an optional request string (`None` means [`VersionRequest::Any`]).
    pub fn parse(request: Option<&str>) -> Result<Self, VersionParseError> {
        match request {
            None => Ok(Self::Any),
            Some(s) => s.parse(),
        }
    }
}

impl FromStr for VersionRequest {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if LATEST_SENTINELS.contains(&s) {
            return Ok(Self::Latest);
        }
        Ok(Self::Pattern(s.parse()?))
    }
}

impl From<&Version> for VersionRequest {
    fn from(version: &Version) -> Self {
        Self::Pattern(version.into())
    }
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRequest::Any => write!(f, "<any>"),
            VersionRequest::Latest => write!(f, "{}", LATEST_SENTINELS[0]),
            VersionRequest::Pattern(p) => write!(f, "{}", p),
        }
    }
}

/// Parse directory names into versions, skipping anything that is not `x.y.z`.
///
/// Incomplete build directories carry a suffix after the version and are
/// therefore never reported.
pub fn list_versions<I, S>(names: I) -> Vec<Version>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut versions: Vec<Version> = names
        .into_iter()
        .filter_map(|name| name.as_ref().parse().ok())
        .collect();
    versions.sort();
    versions.dedup();
    versions
}
