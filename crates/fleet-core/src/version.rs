//! Node software version grammar and ordering.
//!
//! Node versions are reported as `v{major}.{minor}.{patch}`. Ordering is
//! the numeric `(major, minor, patch)` tuple, never string order, so
//! `v1.9.0 < v1.15.0`. Pre-release and build suffixes are accepted by the
//! parser but do not participate in ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or comparing versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    #[error("version is empty")]
    Empty,

    #[error("version {0:?} must start with 'v'")]
    MissingPrefix(String),

    #[error("malformed version {version:?}: {reason}")]
    Malformed { version: String, reason: String },

    #[error("target version {target} must be greater than current version {current}")]
    NotAnUpgrade { target: String, current: String },
}

/// A parsed node software version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl NodeVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for NodeVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s)
    }
}

/// Parse a `v{major}.{minor}.{patch}` version string.
pub fn parse_version(raw: &str) -> Result<NodeVersion, VersionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(VersionError::Empty);
    }
    let Some(rest) = trimmed.strip_prefix('v') else {
        return Err(VersionError::MissingPrefix(raw.to_string()));
    };
    let parsed = semver::Version::parse(rest).map_err(|e| VersionError::Malformed {
        version: raw.to_string(),
        reason: e.to_string(),
    })?;
    Ok(NodeVersion::new(parsed.major, parsed.minor, parsed.patch))
}

/// Check that a version string follows the grammar.
pub fn validate_version(raw: &str) -> Result<(), VersionError> {
    parse_version(raw).map(|_| ())
}

/// Compare two version strings.
///
/// Unparseable versions order before every valid version; two unparseable
/// versions compare equal.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a).ok(), parse_version(b).ok()) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Compare two version strings, failing on the first malformed input.
pub fn compare_versions_strict(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(parse_version(a)?.cmp(&parse_version(b)?))
}

/// Validate that `target` strictly increases over every version in `currents`.
pub fn validate_upgrade_target<'a, I>(target: &str, currents: I) -> Result<NodeVersion, VersionError>
where
    I: IntoIterator<Item = &'a str>,
{
    let target_version = parse_version(target)?;
    for current in currents {
        let current_version = parse_version(current)?;
        if target_version <= current_version {
            return Err(VersionError::NotAnUpgrade {
                target: target.to_string(),
                current: current.to_string(),
            });
        }
    }
    Ok(target_version)
}
