//! Coordinator — the entry point for node admission and capability queries.
//!
//! Each mutating operation is one store write transaction. Collaborator
//! services are consulted before that transaction opens, never inside it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_core::{
    FeatureCatalog, Features, MultiNodeState, NodeVersion, compare_versions,
    compare_versions_strict, validate_upgrade_target, validate_version,
};
use fleet_health::{LiveSignals, NodeStatus, StatusProjector};
use fleet_state::{
    Cluster, ClusterType, Node, NodeInfo, NodeRole, StateStore, StoreView, same_serial_number,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::election::{self, NodeWithBootstrapInfo, OnboardRequest};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::services::{
    ConnectionRegistry, CredentialLockService, LiveConnections, ReleaseService, StaticReleases,
    StoreCredentialLocks,
};
use crate::virtual_ip::check_virtual_ip;

/// Attributes of a cluster to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub cluster_type: ClusterType,
    #[serde(default)]
    pub virtual_ip: Option<String>,
}

/// Attributes of a node to create.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Ignored for the first node of a cluster, which takes the cluster's id.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub serial_number: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub role: Option<NodeRole>,
}

/// Mutable node attributes; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    /// Must equal the current cluster when present.
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub role: Option<NodeRole>,
}

/// Telemetry pushed by a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    #[serde(default)]
    pub node_version: Option<String>,
    #[serde(default)]
    pub health_bits: BTreeMap<String, bool>,
}

/// A stored telemetry record and the status projected from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedNodeInfo {
    #[serde(flatten)]
    pub info: NodeInfo,
    pub status: NodeStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub id: String,
    pub was_onboarded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatusEntry {
    pub node_id: String,
    pub status: NodeStatus,
}

/// Status of a cluster and each of its nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub cluster_id: String,
    /// Any node connected.
    pub connected: bool,
    /// At least one node, and every node healthy.
    pub healthy: bool,
    pub nodes: Vec<NodeStatusEntry>,
}

/// Coordinates node admission, onboarding, and capability resolution.
pub struct Coordinator {
    store: StateStore,
    catalog: Arc<FeatureCatalog>,
    projector: StatusProjector,
    locks: Arc<dyn CredentialLockService>,
    connections: Arc<dyn ConnectionRegistry>,
    releases: Arc<dyn ReleaseService>,
}

impl Coordinator {
    /// Create a coordinator with store-backed credential locks, an empty
    /// connection registry, and a release service that accepts any version.
    pub fn new(store: StateStore, catalog: Arc<FeatureCatalog>) -> Self {
        Self {
            locks: Arc::new(StoreCredentialLocks::new(store.clone())),
            connections: Arc::new(LiveConnections::new()),
            releases: Arc::new(StaticReleases::any()),
            projector: StatusProjector::new(catalog.clone()),
            store,
            catalog,
        }
    }

    pub fn with_projector(mut self, projector: StatusProjector) -> Self {
        self.projector = projector;
        self
    }

    pub fn with_credential_locks(mut self, locks: Arc<dyn CredentialLockService>) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_connections(mut self, connections: Arc<dyn ConnectionRegistry>) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_releases(mut self, releases: Arc<dyn ReleaseService>) -> Self {
        self.releases = releases;
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn credential_locks(&self) -> &dyn CredentialLockService {
        self.locks.as_ref()
    }

    // ── Clusters ───────────────────────────────────────────────────

    pub fn create_cluster(&self, spec: ClusterSpec) -> CoordinatorResult<Cluster> {
        if spec.tenant_id.trim().is_empty() {
            return Err(CoordinatorError::invalid("tenantId", "must not be empty"));
        }
        if spec.name.trim().is_empty() {
            return Err(CoordinatorError::invalid("name", "must not be empty"));
        }
        let id = match spec.id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };
        let now = epoch_secs();
        let cluster = Cluster {
            id,
            tenant_id: spec.tenant_id,
            name: spec.name,
            virtual_ip: normalize_ip(spec.virtual_ip),
            cluster_type: spec.cluster_type,
            created_at: now,
            updated_at: now,
        };
        self.store.write(|txn| txn.insert_cluster(&cluster))?;
        info!(cluster_id = %cluster.id, tenant_id = %cluster.tenant_id, "cluster created");
        Ok(cluster)
    }

    pub fn get_cluster(&self, cluster_id: &str) -> CoordinatorResult<Cluster> {
        self.store
            .get_cluster(cluster_id)?
            .ok_or_else(|| CoordinatorError::not_found("cluster", cluster_id))
    }

    /// Delete a cluster with its nodes, node infos, and credential lock.
    pub fn delete_cluster(&self, cluster_id: &str) -> CoordinatorResult<()> {
        let existed = self.store.write(|txn| txn.delete_cluster(cluster_id))?;
        if !existed {
            return Err(CoordinatorError::not_found("cluster", cluster_id));
        }
        info!(%cluster_id, "cluster deleted");
        Ok(())
    }

    /// Set or clear a cluster's virtual IP.
    pub fn update_cluster_virtual_ip(
        &self,
        cluster_id: &str,
        virtual_ip: Option<String>,
    ) -> CoordinatorResult<Cluster> {
        let virtual_ip = normalize_ip(virtual_ip);
        let now = epoch_secs();
        let cluster = self.store.write(|txn| -> CoordinatorResult<Cluster> {
            check_virtual_ip(txn, cluster_id, virtual_ip.as_deref(), false)?;
            let mut cluster = txn.lock_cluster(cluster_id)?;
            cluster.virtual_ip = virtual_ip.clone();
            cluster.updated_at = now;
            txn.put_cluster(&cluster)?;
            Ok(cluster)
        })?;
        info!(%cluster_id, virtual_ip = ?cluster.virtual_ip, "cluster virtual IP updated");
        Ok(cluster)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Add a node to a cluster. The first node takes the cluster's id.
    pub fn create_node(&self, cluster_id: &str, spec: NodeSpec) -> CoordinatorResult<String> {
        let serial = spec.serial_number.trim().to_string();
        if serial.is_empty() {
            return Err(CoordinatorError::invalid("serialNumber", "must not be empty"));
        }
        let now = epoch_secs();

        let node = self.store.write(|txn| -> CoordinatorResult<Node> {
            let cluster = txn.lock_cluster(cluster_id)?;
            let version = cluster_version(txn, cluster_id)?;
            if self.catalog.multi_node_state(version.as_deref()) == MultiNodeState::Unaware {
                error!(%cluster_id, ?version, "refusing node for non-multi-node-aware cluster");
                return Err(CoordinatorError::NotMultiNodeAware {
                    cluster_id: cluster_id.to_string(),
                });
            }

            let existing = check_virtual_ip(txn, cluster_id, None, true)?;
            if let Some(other) = txn.node_by_serial_number(&serial)? {
                warn!(%serial, existing = %other.id, "duplicate serial number");
                return Err(CoordinatorError::AlreadyExists {
                    entity: "node",
                    id: format!("serialNumber={serial}"),
                });
            }

            let id = if existing == 0 {
                cluster_id.to_string()
            } else {
                spec.id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
            };
            let node = Node {
                id,
                tenant_id: cluster.tenant_id.clone(),
                cluster_id: cluster_id.to_string(),
                name: spec.name.clone().unwrap_or_else(|| serial.clone()),
                serial_number: serial.clone(),
                ip_address: spec.ip_address.clone(),
                role: spec.role.unwrap_or_default(),
                is_bootstrap_master: false,
                is_onboarded: false,
                ssh_public_key: None,
                created_at: now,
                updated_at: now,
            };
            txn.insert_node(&node)?;
            txn.put_node_info(&NodeInfo::new_for(&node, now))?;
            Ok(node)
        })?;

        info!(node_id = %node.id, %cluster_id, serial = %node.serial_number, "node created");
        Ok(node.id)
    }

    pub fn get_node(&self, node_id: &str) -> CoordinatorResult<Node> {
        self.store
            .get_node(node_id)?
            .ok_or_else(|| CoordinatorError::not_found("node", node_id))
    }

    pub fn nodes_in_cluster(&self, cluster_id: &str) -> CoordinatorResult<Vec<Node>> {
        Ok(self.store.nodes_in_cluster(cluster_id)?)
    }

    /// Update mutable node attributes.
    ///
    /// Once the cluster's credential is locked the serial number may only
    /// change in letter case.
    pub fn update_node(&self, node_id: &str, update: NodeUpdate) -> CoordinatorResult<Node> {
        let current = self.get_node(node_id)?;
        if let Some(cluster_id) = &update.cluster_id {
            if *cluster_id != current.cluster_id {
                warn!(%node_id, from = %current.cluster_id, to = %cluster_id, "cluster change refused");
                return Err(CoordinatorError::invalid(
                    "clusterId",
                    format!("cannot be modified from {} to {cluster_id}", current.cluster_id),
                ));
            }
        }

        let serial = update.serial_number.as_deref().map(str::trim);
        if let Some(serial) = serial {
            if serial.is_empty() {
                return Err(CoordinatorError::invalid("serialNumber", "must not be empty"));
            }
            if !same_serial_number(serial, &current.serial_number)
                && self.locks.is_locked(&current.cluster_id)?
            {
                return Err(CoordinatorError::invalid(
                    "serialNumber",
                    "cannot change once the node is onboarded",
                ));
            }
        }

        let now = epoch_secs();
        let node = self.store.write(|txn| -> CoordinatorResult<Node> {
            let mut node = txn
                .get_node(node_id)?
                .ok_or_else(|| CoordinatorError::not_found("node", node_id))?;
            if let Some(serial) = serial {
                if let Some(other) = txn.node_by_serial_number(serial)? {
                    if other.id != node.id {
                        return Err(CoordinatorError::AlreadyExists {
                            entity: "node",
                            id: format!("serialNumber={serial}"),
                        });
                    }
                }
                node.serial_number = serial.to_string();
            }
            if let Some(name) = &update.name {
                node.name = name.clone();
            }
            if let Some(ip) = &update.ip_address {
                node.ip_address = ip.clone();
            }
            if let Some(role) = update.role {
                node.role = role;
            }
            node.updated_at = now;
            txn.put_node(&node)?;
            Ok(node)
        })?;
        info!(%node_id, "node updated");
        Ok(node)
    }

    /// Delete a node and its telemetry. Deleting a missing node succeeds.
    ///
    /// The reported onboarded flag comes from the node row only when the
    /// cluster is known to be multi-node-aware; otherwise from the
    /// credential lock.
    pub fn delete_node(&self, node_id: &str) -> CoordinatorResult<DeleteOutcome> {
        let Some(node) = self.store.get_node(node_id)? else {
            debug!(%node_id, "delete of missing node");
            return Ok(DeleteOutcome {
                id: node_id.to_string(),
                was_onboarded: false,
            });
        };

        let version = self
            .store
            .read(|txn| cluster_version(txn, &node.cluster_id))?;
        let was_onboarded = match self.catalog.multi_node_state(version.as_deref()) {
            MultiNodeState::Aware => node.is_onboarded,
            MultiNodeState::Unaware | MultiNodeState::Unknown => {
                self.locks.is_locked(&node.cluster_id)?
            }
        };

        self.store.write(|txn| -> CoordinatorResult<()> {
            txn.lock_cluster(&node.cluster_id)?;
            txn.delete_node(node_id)?;
            Ok(())
        })?;
        info!(%node_id, cluster_id = %node.cluster_id, was_onboarded, "node deleted");
        Ok(DeleteOutcome {
            id: node_id.to_string(),
            was_onboarded,
        })
    }

    // ── Election & onboarding ──────────────────────────────────────

    pub fn identify_by_serial_number(
        &self,
        serial_number: &str,
    ) -> CoordinatorResult<NodeWithBootstrapInfo> {
        election::identify_by_serial_number(&self.store, serial_number)
    }

    pub fn mark_onboarded(&self, request: &OnboardRequest) -> CoordinatorResult<()> {
        election::mark_onboarded(&self.store, request, epoch_secs())
    }

    // ── Telemetry ──────────────────────────────────────────────────

    /// Record a node's version and health bits, and project the status the
    /// stored record now yields.
    pub fn report_node_info(
        &self,
        node_id: &str,
        report: NodeReport,
    ) -> CoordinatorResult<ReportedNodeInfo> {
        let version = report.node_version.as_deref().map(str::trim);
        if let Some(v) = version {
            validate_version(v)?;
        }
        let now = epoch_secs();
        let (node, info) = self.store.write(|txn| -> CoordinatorResult<(Node, NodeInfo)> {
            let node = txn
                .get_node(node_id)?
                .ok_or_else(|| CoordinatorError::not_found("node", node_id))?;
            let mut info = match txn.get_node_info(node_id)? {
                Some(info) => info,
                None => {
                    warn!(%node_id, "node info missing, recreating");
                    NodeInfo::new_for(&node, now)
                }
            };
            if let Some(v) = version {
                info.node_version = Some(v.to_string());
            }
            info.health_bits = report.health_bits.clone();
            info.updated_at = now;
            txn.put_node_info(&info)?;
            Ok((node, info))
        })?;
        debug!(%node_id, version = ?info.node_version, bits = info.health_bits.len(), "node info reported");

        let cluster = self.get_cluster(&node.cluster_id)?;
        let status = self.project(&node, &cluster, &info)?;
        Ok(ReportedNodeInfo { info, status })
    }

    // ── Capabilities ───────────────────────────────────────────────

    pub fn resolve_capabilities(&self, version: Option<&str>) -> Features {
        self.catalog.resolve(version)
    }

    /// Features of the cluster a node belongs to, or `None` while no node
    /// of that cluster has reported a version.
    pub fn features_for_node(&self, node_id: &str) -> CoordinatorResult<Option<Features>> {
        let node = self.get_node(node_id)?;
        let version = self
            .store
            .read(|txn| cluster_version(txn, &node.cluster_id))?;
        Ok(version.map(|v| self.catalog.resolve(Some(&v))))
    }

    /// Version of each cluster that has one: its highest reported node version.
    pub fn cluster_versions(&self, cluster_ids: &[String]) -> CoordinatorResult<HashMap<String, String>> {
        self.store.read(|txn| -> CoordinatorResult<HashMap<String, String>> {
            let mut versions = HashMap::new();
            for id in cluster_ids {
                if let Some(version) = cluster_version(txn, id)? {
                    versions.insert(id.clone(), version);
                }
            }
            Ok(versions)
        })
    }

    /// Features of each cluster with a well-formed version.
    pub fn features_for_clusters(
        &self,
        cluster_ids: &[String],
    ) -> CoordinatorResult<HashMap<String, Features>> {
        let versions = self.cluster_versions(cluster_ids)?;
        let mut features = HashMap::new();
        for (id, version) in versions {
            match self.catalog.try_resolve(&version) {
                Ok(f) => {
                    features.insert(id, f);
                }
                Err(e) => warn!(cluster_id = %id, %version, error = %e, "skipping cluster version"),
            }
        }
        Ok(features)
    }

    /// Keep the clusters for which `predicate(id, version, min.cmp(version))`
    /// holds. A cluster without a version compares as `Greater`.
    pub fn filter_clusters_by_version<P>(
        &self,
        min_version: &str,
        cluster_ids: &[String],
        predicate: P,
    ) -> CoordinatorResult<Vec<String>>
    where
        P: Fn(&str, Option<&str>, Ordering) -> bool,
    {
        if cluster_ids.is_empty() || min_version.trim().is_empty() {
            return Ok(Vec::new());
        }
        let versions = self.cluster_versions(cluster_ids)?;
        let mut kept = Vec::with_capacity(cluster_ids.len());
        for id in cluster_ids {
            let version = versions.get(id).map(String::as_str);
            let ord = match version {
                Some(v) => compare_versions_strict(min_version, v)?,
                None => Ordering::Greater,
            };
            if predicate(id.as_str(), version, ord) {
                kept.push(id.clone());
            }
        }
        Ok(kept)
    }

    /// Check that `target` is a published release above every cluster's
    /// current version.
    pub fn check_upgrade_eligibility(
        &self,
        cluster_ids: &[String],
        target: &str,
    ) -> CoordinatorResult<NodeVersion> {
        validate_version(target)?;
        if !self.releases.release_exists(target) {
            return Err(CoordinatorError::not_found("release", target.trim()));
        }
        let versions = self.cluster_versions(cluster_ids)?;
        let parsed = validate_upgrade_target(target, versions.values().map(String::as_str))?;
        debug!(%parsed, clusters = cluster_ids.len(), "upgrade target eligible");
        Ok(parsed)
    }

    // ── Status ─────────────────────────────────────────────────────

    pub fn node_status(&self, node_id: &str) -> CoordinatorResult<NodeStatus> {
        let node = self.get_node(node_id)?;
        let cluster = self.get_cluster(&node.cluster_id)?;
        let info = self.store.get_node_info(node_id)?.ok_or_else(|| {
            let msg = format!("node {node_id} has no node info record");
            error!(%node_id, "{msg}");
            CoordinatorError::InvariantBreach(msg)
        })?;
        self.project(&node, &cluster, &info)
    }

    fn project(&self, node: &Node, cluster: &Cluster, info: &NodeInfo) -> CoordinatorResult<NodeStatus> {
        let live = LiveSignals {
            connected: self.connections.is_connected(&node.tenant_id, &node.id),
            credential_locked: self.locks.is_locked(&cluster.id)?,
            node_onboarded: node.is_onboarded,
        };
        Ok(self
            .projector
            .project(info, cluster.cluster_type, live, epoch_secs()))
    }

    pub fn cluster_status(&self, cluster_id: &str) -> CoordinatorResult<ClusterStatus> {
        let cluster = self.get_cluster(cluster_id)?;
        let (nodes, infos) = self.store.read(|txn| -> CoordinatorResult<_> {
            Ok((
                txn.nodes_in_cluster(cluster_id)?,
                txn.node_infos_in_cluster(cluster_id)?,
            ))
        })?;
        let infos: HashMap<String, NodeInfo> =
            infos.into_iter().map(|i| (i.id.clone(), i)).collect();
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let connected = self.connections.are_connected(&cluster.tenant_id, &ids);
        let locked = self.locks.is_locked(cluster_id)?;
        let now = epoch_secs();

        let mut entries = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let Some(info) = infos.get(&node.id) else {
                error!(node_id = %node.id, %cluster_id, "node has no node info record");
                entries.push(NodeStatusEntry {
                    node_id: node.id.clone(),
                    status: NodeStatus::UNPROVISIONED,
                });
                continue;
            };
            let live = LiveSignals {
                connected: connected.get(&node.id).copied().unwrap_or(false),
                credential_locked: locked,
                node_onboarded: node.is_onboarded,
            };
            entries.push(NodeStatusEntry {
                node_id: node.id.clone(),
                status: self.projector.project(info, cluster.cluster_type, live, now),
            });
        }

        Ok(ClusterStatus {
            cluster_id: cluster_id.to_string(),
            connected: entries.iter().any(|e| e.status.connected),
            healthy: !entries.is_empty() && entries.iter().all(|e| e.status.healthy),
            nodes: entries,
        })
    }
}

/// Highest version reported by any node of the cluster.
fn cluster_version<V: StoreView>(view: &V, cluster_id: &str) -> CoordinatorResult<Option<String>> {
    Ok(view
        .node_infos_in_cluster(cluster_id)?
        .into_iter()
        .filter_map(|i| i.node_version().map(str::to_string))
        .max_by(|a, b| compare_versions(a, b)))
}

fn normalize_ip(ip: Option<String>) -> Option<String> {
    ip.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
