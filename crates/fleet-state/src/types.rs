//! Domain types for the fleet state store.
//!
//! These types represent the persisted state of clusters, nodes, node
//! telemetry, and credential locks. All types are serializable to/from
//! JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a cluster (service domain).
pub type ClusterId = String;

/// Unique identifier for a node.
pub type NodeId = String;

/// Tenant identifier.
pub type TenantId = String;

// ── Cluster ───────────────────────────────────────────────────────

/// Deployment target behind a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    /// Physical edge hardware.
    #[default]
    Real,
    /// Cloud-simulated target.
    Cloud,
    Kubernetes,
}

/// A cluster of nodes sharing one tenant-visible identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub id: ClusterId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Floating address for the whole cluster; required with two or more nodes.
    pub virtual_ip: Option<String>,
    pub cluster_type: ClusterType,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Cluster {
    /// Virtual IP if set and non-empty.
    pub fn virtual_ip(&self) -> Option<&str> {
        self.virtual_ip.as_deref().filter(|ip| !ip.trim().is_empty())
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// Kubernetes roles a node may play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRole {
    pub master: bool,
    pub worker: bool,
}

impl Default for NodeRole {
    fn default() -> Self {
        Self {
            master: true,
            worker: true,
        }
    }
}

/// A machine participating in a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub tenant_id: TenantId,
    pub cluster_id: ClusterId,
    pub name: String,
    pub serial_number: String,
    pub ip_address: String,
    #[serde(default)]
    pub role: NodeRole,
    /// Set once by bootstrap election; never cleared while the cluster exists.
    #[serde(default)]
    pub is_bootstrap_master: bool,
    #[serde(default)]
    pub is_onboarded: bool,
    pub ssh_public_key: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Node {
    /// Case-insensitive serial number match.
    pub fn serial_matches(&self, serial_number: &str) -> bool {
        !self.serial_number.is_empty() && same_serial_number(&self.serial_number, serial_number)
    }
}

/// Whether two serial numbers are equal once trimmed and lowercased.
///
/// Lowercasing is Unicode-aware, so `ÄBC-1` and `äbc-1` are the same serial.
pub fn same_serial_number(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

// ── NodeInfo ──────────────────────────────────────────────────────

/// Health status as derived from reported health bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Telemetry reported by a node. Shares the node's id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: NodeId,
    pub cluster_id: ClusterId,
    pub tenant_id: TenantId,
    /// Node software version; absent until the node reports one.
    pub node_version: Option<String>,
    #[serde(default)]
    pub health_bits: BTreeMap<String, bool>,
    pub created_at: u64,
    /// Unix timestamp of the last telemetry write.
    pub updated_at: u64,
}

impl NodeInfo {
    /// Fresh record created alongside a node.
    pub fn new_for(node: &Node, now: u64) -> Self {
        Self {
            id: node.id.clone(),
            cluster_id: node.cluster_id.clone(),
            tenant_id: node.tenant_id.clone(),
            node_version: None,
            health_bits: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node_version(&self) -> Option<&str> {
        self.node_version.as_deref().filter(|v| !v.is_empty())
    }
}

// ── Credential lock ───────────────────────────────────────────────

/// Whether the cluster's bootstrap credential has been claimed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialLock {
    pub cluster_id: ClusterId,
    pub locked: bool,
    pub updated_at: u64,
}

/// Result of the conditional onboarding write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardOutcome {
    Updated,
    AlreadyOnboarded,
    Missing,
}
