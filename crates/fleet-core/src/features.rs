//! Capability catalog — which node features a software version unlocks.
//!
//! The catalog is a read-only table of `(feature, minimum version)` pairs.
//! It is built once (from [`FeatureCatalog::standard`] plus optional
//! configuration overrides) and shared behind an `Arc`; nothing here
//! holds global state.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::version::{NodeVersion, VersionError, parse_version};

/// A named capability gated on node software version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    UrlUpgrade,
    HighMemAlert,
    RealTimeLogs,
    MultiNodeAware,
    DownloadAndUpgrade,
    RemoteSsh,
    ProjectUserKubeConfig,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::UrlUpgrade,
        Feature::HighMemAlert,
        Feature::RealTimeLogs,
        Feature::MultiNodeAware,
        Feature::DownloadAndUpgrade,
        Feature::RemoteSsh,
        Feature::ProjectUserKubeConfig,
    ];

    /// Wire name of the feature.
    pub fn name(self) -> &'static str {
        match self {
            Feature::UrlUpgrade => "urlUpgrade",
            Feature::HighMemAlert => "highMemAlert",
            Feature::RealTimeLogs => "realTimeLogs",
            Feature::MultiNodeAware => "multiNodeAware",
            Feature::DownloadAndUpgrade => "downloadAndUpgrade",
            Feature::RemoteSsh => "remoteSSH",
            Feature::ProjectUserKubeConfig => "projectUserKubeConfig",
        }
    }

    /// Minimum version shipped with the standard catalog.
    pub fn default_min_version(self) -> NodeVersion {
        match self {
            Feature::UrlUpgrade => NodeVersion::new(1, 5, 0),
            Feature::HighMemAlert => NodeVersion::new(1, 7, 0),
            Feature::RealTimeLogs => NodeVersion::new(1, 11, 0),
            Feature::MultiNodeAware => NodeVersion::new(1, 15, 0),
            Feature::DownloadAndUpgrade => NodeVersion::new(1, 15, 0),
            Feature::RemoteSsh => NodeVersion::new(1, 15, 0),
            // Not shipped yet.
            Feature::ProjectUserKubeConfig => NodeVersion::new(99, 99, 99),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown feature: {s}"))
    }
}

/// Capability flags resolved for one node version. Always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub url_upgrade: bool,
    pub high_mem_alert: bool,
    pub real_time_logs: bool,
    pub multi_node_aware: bool,
    pub download_and_upgrade: bool,
    #[serde(rename = "remoteSSH")]
    pub remote_ssh: bool,
    pub project_user_kube_config: bool,
}

impl Features {
    /// Whether a single feature flag is set.
    pub fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::UrlUpgrade => self.url_upgrade,
            Feature::HighMemAlert => self.high_mem_alert,
            Feature::RealTimeLogs => self.real_time_logs,
            Feature::MultiNodeAware => self.multi_node_aware,
            Feature::DownloadAndUpgrade => self.download_and_upgrade,
            Feature::RemoteSsh => self.remote_ssh,
            Feature::ProjectUserKubeConfig => self.project_user_kube_config,
        }
    }

    fn set(&mut self, feature: Feature) {
        let flag = match feature {
            Feature::UrlUpgrade => &mut self.url_upgrade,
            Feature::HighMemAlert => &mut self.high_mem_alert,
            Feature::RealTimeLogs => &mut self.real_time_logs,
            Feature::MultiNodeAware => &mut self.multi_node_aware,
            Feature::DownloadAndUpgrade => &mut self.download_and_upgrade,
            Feature::RemoteSsh => &mut self.remote_ssh,
            Feature::ProjectUserKubeConfig => &mut self.project_user_kube_config,
        };
        *flag = true;
    }
}

/// Whether a node (or cluster) can take part in multi-node clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiNodeState {
    Aware,
    Unaware,
    /// No usable version on file.
    Unknown,
}

/// Read-only table of feature minimum versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureCatalog {
    min_versions: BTreeMap<Feature, NodeVersion>,
}

impl Default for FeatureCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl FeatureCatalog {
    /// The catalog as shipped.
    pub fn standard() -> Self {
        let min_versions = Feature::ALL
            .into_iter()
            .map(|f| (f, f.default_min_version()))
            .collect();
        Self { min_versions }
    }

    /// Standard catalog with some minimum versions replaced.
    ///
    /// Override keys are feature wire names; values must satisfy the
    /// version grammar.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> anyhow::Result<Self> {
        let mut catalog = Self::standard();
        for (name, version) in overrides {
            let feature: Feature = name.parse().map_err(anyhow::Error::msg)?;
            let min = parse_version(version)
                .map_err(|e| anyhow::anyhow!("feature {name}: {e}"))?;
            catalog.min_versions.insert(feature, min);
        }
        Ok(catalog)
    }

    /// Minimum version that unlocks `feature`.
    pub fn min_version(&self, feature: Feature) -> NodeVersion {
        self.min_versions
            .get(&feature)
            .copied()
            .unwrap_or_else(|| feature.default_min_version())
    }

    /// Resolve the features of a parsed version.
    pub fn features_for(&self, version: NodeVersion) -> Features {
        let mut features = Features::default();
        for (feature, min) in &self.min_versions {
            if version >= *min {
                features.set(*feature);
            }
        }
        features
    }

    /// Resolve a version string, failing on malformed input.
    pub fn try_resolve(&self, version: &str) -> Result<Features, VersionError> {
        Ok(self.features_for(parse_version(version)?))
    }

    /// Resolve an optional version string.
    ///
    /// A node that never reported a version, or reported garbage, gets the
    /// empty feature set.
    pub fn resolve(&self, version: Option<&str>) -> Features {
        let Some(raw) = version else {
            return Features::default();
        };
        match self.try_resolve(raw) {
            Ok(features) => features,
            Err(e) => {
                warn!(version = raw, error = %e, "unresolvable node version, no features");
                Features::default()
            }
        }
    }

    /// Tri-state multi-node awareness for an optional version string.
    pub fn multi_node_state(&self, version: Option<&str>) -> MultiNodeState {
        let Some(raw) = version else {
            return MultiNodeState::Unknown;
        };
        match self.try_resolve(raw) {
            Ok(features) if features.multi_node_aware => MultiNodeState::Aware,
            Ok(_) => MultiNodeState::Unaware,
            Err(e) => {
                warn!(version = raw, error = %e, "unresolvable node version");
                MultiNodeState::Unknown
            }
        }
    }
}
