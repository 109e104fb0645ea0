//! fleet-cluster — node admission and capability coordination for fleetgrid.
//!
//! Every mutation runs as one `StateStore::write` transaction. The store's
//! exclusive writer serializes all membership and virtual-IP decisions, so
//! the coordinator itself keeps no shared mutable state.
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── create_node / update_cluster_virtual_ip
//!   │   └── check_virtual_ip (cluster row locked, node count read)
//!   ├── identify_by_serial_number
//!   │   └── claim_bootstrap_master (conditional update)
//!   ├── mark_onboarded
//!   │   └── version cross-check + conditional update + NodeInfo version
//!   ├── node_status / cluster_status
//!   │   └── StatusProjector (fleet-health)
//!   └── Collaborators
//!       ├── CredentialLockService
//!       ├── ConnectionRegistry
//!       └── ReleaseService
//! ```

pub mod coordinator;
pub mod election;
pub mod error;
pub mod services;
pub mod virtual_ip;

pub use coordinator::{
    ClusterSpec, ClusterStatus, Coordinator, DeleteOutcome, NodeReport, NodeSpec, NodeStatusEntry,
    NodeUpdate, ReportedNodeInfo,
};
pub use election::{NodeWithBootstrapInfo, OnboardRequest};
pub use error::{CoordinatorError, CoordinatorResult, ErrorKind};
pub use services::{
    ConnectionRegistry, CredentialLockService, LiveConnections, ReleaseService, StaticReleases,
    StoreCredentialLocks,
};
pub use virtual_ip::check_virtual_ip;
