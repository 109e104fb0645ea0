pub mod config;
pub mod features;
pub mod version;

pub use config::FleetConfig;
pub use features::{Feature, FeatureCatalog, Features, MultiNodeState};
pub use version::{
    NodeVersion, VersionError, compare_versions, compare_versions_strict, parse_version,
    validate_upgrade_target, validate_version,
};
