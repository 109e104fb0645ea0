//! Node status projection.
//!
//! Combines a node's telemetry record with live signals into the status
//! shown to operators. Which signals count depends on whether the node's
//! software is multi-node-aware.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::config::DEFAULT_CONNECTION_TIMEOUT_SECS;
use fleet_core::{FeatureCatalog, MultiNodeState};
use fleet_state::{ClusterType, HealthStatus, NodeInfo};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::evaluator::HealthPolicy;

/// Signals that live outside the node's telemetry record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveSignals {
    /// The node holds a live websocket connection.
    pub connected: bool,
    /// The cluster's bootstrap credential is locked.
    pub credential_locked: bool,
    /// The node row's onboarded flag.
    pub node_onboarded: bool,
}

/// Externally visible status of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    pub connected: bool,
    pub healthy: bool,
    pub health_status: HealthStatus,
    pub onboarded: bool,
}

impl NodeStatus {
    /// Status of a node that has never reported and is not simulated.
    pub const UNPROVISIONED: NodeStatus = NodeStatus {
        connected: false,
        healthy: false,
        health_status: HealthStatus::Unknown,
        onboarded: false,
    };
}

/// Derives [`NodeStatus`] from telemetry.
#[derive(Debug, Clone)]
pub struct StatusProjector {
    catalog: Arc<FeatureCatalog>,
    policy: HealthPolicy,
    connection_timeout: Duration,
}

impl StatusProjector {
    pub fn new(catalog: Arc<FeatureCatalog>) -> Self {
        Self {
            catalog,
            policy: HealthPolicy::default(),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
        }
    }

    pub fn with_policy(mut self, policy: HealthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn project(
        &self,
        info: &NodeInfo,
        cluster_type: ClusterType,
        live: LiveSignals,
        now: u64,
    ) -> NodeStatus {
        let state = self.catalog.multi_node_state(info.node_version());
        let status = match state {
            MultiNodeState::Aware => self.from_telemetry(info, live, now),
            MultiNodeState::Unaware => legacy(live),
            MultiNodeState::Unknown if cluster_type == ClusterType::Cloud => legacy(live),
            MultiNodeState::Unknown => NodeStatus::UNPROVISIONED,
        };
        trace!(node_id = %info.id, ?state, ?status, "node status projected");
        status
    }

    fn from_telemetry(&self, info: &NodeInfo, live: LiveSignals, now: u64) -> NodeStatus {
        let age = now.saturating_sub(info.updated_at);
        let health_status = self.policy.evaluate(&info.health_bits);
        NodeStatus {
            connected: age <= self.connection_timeout.as_secs(),
            healthy: health_status == HealthStatus::Healthy,
            health_status,
            onboarded: live.node_onboarded,
        }
    }
}

/// Derivation for nodes that predate telemetry-based status.
fn legacy(live: LiveSignals) -> NodeStatus {
    NodeStatus {
        connected: live.connected,
        healthy: live.connected,
        health_status: if live.connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        },
        onboarded: live.credential_locked,
    }
}
