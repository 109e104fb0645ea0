//! Bootstrap-master election and onboarding.
//!
//! The first master-role node of a cluster to identify itself becomes the
//! bootstrap master. Workers may only fetch bootstrap key material once that
//! master and every other master have onboarded.

use fleet_core::validate_version;
use fleet_state::{Node, OnboardOutcome, StateStore, StoreView};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{CoordinatorError, CoordinatorResult};

/// A node plus the key it needs to join its cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeWithBootstrapInfo {
    pub node: Node,
    /// SSH public key of the onboarded bootstrap master, once there is one.
    pub bootstrap_master_ssh_public_key: Option<String>,
}

/// Payload a node sends after it finished onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub node_id: String,
    pub ssh_public_key: String,
    pub node_version: String,
}

/// Whether `node` acts as a Kubernetes master in a cluster of `node_count`.
///
/// The sole node of a cluster always does.
pub fn plays_master(node: &Node, node_count: usize) -> bool {
    node.role.master || node_count <= 1
}

/// Resolve a node by serial number and run the election for it.
///
/// The decision is made on a read snapshot. The single store writer is only
/// taken when the node is about to claim the bootstrap role, so polling
/// workers and repeat identifications never queue behind other clusters.
pub fn identify_by_serial_number(
    store: &StateStore,
    serial_number: &str,
) -> CoordinatorResult<NodeWithBootstrapInfo> {
    let serial = serial_number.trim();
    if serial.is_empty() {
        warn!("identify called with an empty serial number");
        return Err(CoordinatorError::not_found("node", "serialNumber="));
    }

    let settled = store.read(|txn| -> CoordinatorResult<Option<NodeWithBootstrapInfo>> {
        let (node, nodes) = resolve(txn, serial)?;
        if claim_pending(&node, &nodes) {
            return Ok(None);
        }
        admit(txn, node, &nodes).map(Some)
    })?;
    if let Some(info) = settled {
        return Ok(info);
    }

    store.write(|txn| -> CoordinatorResult<NodeWithBootstrapInfo> {
        let (mut node, nodes) = resolve(txn, serial)?;
        if claim_pending(&node, &nodes) && txn.claim_bootstrap_master(&node.id, &node.cluster_id)? {
            node.is_bootstrap_master = true;
            info!(node_id = %node.id, cluster_id = %node.cluster_id, "bootstrap master elected");
        }
        admit(txn, node, &nodes)
    })
}

fn resolve<V: StoreView>(view: &V, serial: &str) -> CoordinatorResult<(Node, Vec<Node>)> {
    let node = view
        .node_by_serial_number(serial)?
        .ok_or_else(|| CoordinatorError::not_found("node", format!("serialNumber={serial}")))?;
    let nodes = view.nodes_in_cluster(&node.cluster_id)?;
    Ok((node, nodes))
}

/// A master of a cluster that has no bootstrap master yet.
fn claim_pending(node: &Node, nodes: &[Node]) -> bool {
    plays_master(node, nodes.len()) && !nodes.iter().any(|n| n.is_bootstrap_master)
}

/// Gate `node` on the masters of its cluster and hand out the bootstrap key.
fn admit<V: StoreView>(
    view: &V,
    node: Node,
    nodes: &[Node],
) -> CoordinatorResult<NodeWithBootstrapInfo> {
    let cluster_id = node.cluster_id.clone();
    let is_master = plays_master(&node, nodes.len());

    if !is_master {
        let waiting_for = if !nodes.iter().any(|n| n.is_bootstrap_master) {
            Some("first master to onboard")
        } else if nodes
            .iter()
            .any(|n| plays_master(n, nodes.len()) && !n.is_onboarded)
        {
            Some("all k8s masters to onboard")
        } else {
            None
        };
        if let Some(waiting_for) = waiting_for {
            warn!(node_id = %node.id, %cluster_id, waiting_for, "worker node not admitted yet");
            return Err(CoordinatorError::WaitingForMasters {
                node_id: node.id,
                cluster_id,
                waiting_for,
            });
        }
    }

    let key = view
        .onboarded_bootstrap_master(&cluster_id)?
        .and_then(|master| master.ssh_public_key);
    if key.is_none() {
        if node.is_bootstrap_master {
            warn!(node_id = %node.id, %cluster_id, "no onboarded master yet");
        } else if is_master {
            warn!(node_id = %node.id, %cluster_id, "master waiting for bootstrap master");
            return Err(CoordinatorError::WaitingForMasters {
                node_id: node.id,
                cluster_id,
                waiting_for: "bootstrap master to onboard",
            });
        } else {
            let msg = format!(
                "no onboarded master found for worker node {} in cluster {cluster_id}",
                node.id
            );
            error!(node_id = %node.id, %cluster_id, "{msg}");
            return Err(CoordinatorError::InvariantBreach(msg));
        }
    }

    Ok(NodeWithBootstrapInfo {
        node,
        bootstrap_master_ssh_public_key: key,
    })
}

/// Record a node's SSH key and version once; the second call conflicts.
pub fn mark_onboarded(
    store: &StateStore,
    request: &OnboardRequest,
    now: u64,
) -> CoordinatorResult<()> {
    let node_id = request.node_id.trim();
    if node_id.is_empty() {
        return Err(CoordinatorError::invalid("nodeId", "must not be empty"));
    }
    if request.ssh_public_key.trim().is_empty() {
        return Err(CoordinatorError::invalid("sshPublicKey", "must not be empty"));
    }
    let version = request.node_version.trim();
    if let Err(e) = validate_version(version) {
        warn!(%node_id, version, error = %e, "invalid onboarding version");
        return Err(e.into());
    }

    store.write(|txn| -> CoordinatorResult<()> {
        if let Some(expected) = txn.cluster_version_for_node(node_id, true)? {
            if expected != version {
                warn!(%node_id, %expected, found = version, "node version mismatch");
                return Err(CoordinatorError::VersionMismatch {
                    expected,
                    found: version.to_string(),
                });
            }
        }

        match txn.mark_onboarded(node_id, &request.ssh_public_key, now)? {
            OnboardOutcome::Updated => {}
            OnboardOutcome::AlreadyOnboarded => {
                warn!(%node_id, "node already onboarded");
                return Err(CoordinatorError::AlreadyOnboarded {
                    node_id: node_id.to_string(),
                });
            }
            OnboardOutcome::Missing => return Err(CoordinatorError::not_found("node", node_id)),
        }

        if !txn.set_node_version(node_id, version, now)? {
            let msg = format!("node {node_id} has no node info record");
            error!(%node_id, "{msg}");
            return Err(CoordinatorError::InvariantBreach(msg));
        }
        info!(%node_id, version, "node onboarded");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use fleet_state::{Cluster, ClusterType, NodeInfo, NodeRole, StateResult};

    fn node(id: &str, serial: &str, role: NodeRole, created_at: u64) -> Node {
        Node {
            id: id.into(),
            tenant_id: "t1".into(),
            cluster_id: "c1".into(),
            name: id.into(),
            serial_number: serial.into(),
            ip_address: "10.0.0.1".into(),
            role,
            is_bootstrap_master: false,
            is_onboarded: false,
            ssh_public_key: None,
            created_at,
            updated_at: created_at,
        }
    }

    const MASTER: NodeRole = NodeRole {
        master: true,
        worker: false,
    };
    const WORKER: NodeRole = NodeRole {
        master: false,
        worker: true,
    };

    fn store_with(nodes: &[Node]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(|txn| -> StateResult<()> {
                txn.insert_cluster(&Cluster {
                    id: "c1".into(),
                    tenant_id: "t1".into(),
                    name: "edge".into(),
                    virtual_ip: Some("10.0.0.100".into()),
                    cluster_type: ClusterType::Real,
                    created_at: 0,
                    updated_at: 0,
                })?;
                for n in nodes {
                    txn.insert_node(n)?;
                    txn.put_node_info(&NodeInfo::new_for(n, 0))?;
                }
                Ok(())
            })
            .unwrap();
        store
    }

    fn onboard(store: &StateStore, node_id: &str, key: &str) -> CoordinatorResult<()> {
        let req = OnboardRequest {
            node_id: node_id.into(),
            ssh_public_key: key.into(),
            node_version: "v1.15.0".into(),
        };
        mark_onboarded(store, &req, 100)
    }

    #[test]
    fn sole_node_becomes_bootstrap_master_without_key() {
        let store = store_with(&[node("c1", "SN-1", WORKER, 1)]);
        let info = identify_by_serial_number(&store, "sn-1").unwrap();
        assert!(info.node.is_bootstrap_master);
        assert!(info.bootstrap_master_ssh_public_key.is_none());

        let again = identify_by_serial_number(&store, "SN-1").unwrap();
        assert!(again.node.is_bootstrap_master);
    }

    #[test]
    fn empty_or_unknown_serial_is_not_found() {
        let store = store_with(&[node("c1", "SN-1", MASTER, 1)]);
        for serial in ["", "   ", "SN-404"] {
            let err = identify_by_serial_number(&store, serial).unwrap_err();
            assert!(matches!(err, CoordinatorError::NotFound { .. }), "{serial:?}");
        }
    }

    #[test]
    fn only_first_master_claims() {
        let store = store_with(&[
            node("c1", "SN-1", MASTER, 1),
            node("n2", "SN-2", MASTER, 2),
        ]);
        assert!(identify_by_serial_number(&store, "SN-2").unwrap().node.is_bootstrap_master);

        let err = identify_by_serial_number(&store, "SN-1").unwrap_err();
        assert!(err.is_retryable());

        onboard(&store, "n2", "ssh-rsa MASTER").unwrap();
        let loser = identify_by_serial_number(&store, "SN-1").unwrap();
        assert!(!loser.node.is_bootstrap_master);
        assert_eq!(loser.bootstrap_master_ssh_public_key.as_deref(), Some("ssh-rsa MASTER"));
    }

    #[test]
    fn worker_waits_for_masters() {
        let store = store_with(&[
            node("c1", "SN-1", MASTER, 1),
            node("n2", "SN-2", MASTER, 2),
            node("n3", "SN-3", WORKER, 3),
        ]);

        let err = identify_by_serial_number(&store, "SN-3").unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::WaitingForMasters { waiting_for: "first master to onboard", .. }
        ));

        identify_by_serial_number(&store, "SN-1").unwrap();
        onboard(&store, "c1", "ssh-rsa FIRST").unwrap();
        let err = identify_by_serial_number(&store, "SN-3").unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::WaitingForMasters { waiting_for: "all k8s masters to onboard", .. }
        ));

        onboard(&store, "n2", "ssh-rsa SECOND").unwrap();
        let worker = identify_by_serial_number(&store, "SN-3").unwrap();
        assert!(!worker.node.is_bootstrap_master);
        assert_eq!(worker.bootstrap_master_ssh_public_key.as_deref(), Some("ssh-rsa FIRST"));
    }

    #[test]
    fn worker_without_onboarded_bootstrap_master_is_a_breach() {
        let mut master = node("c1", "SN-1", WORKER, 1);
        master.is_bootstrap_master = true;
        let store = store_with(&[master, node("n2", "SN-2", WORKER, 2)]);
        let err = identify_by_serial_number(&store, "SN-2").unwrap_err();
        assert!(matches!(err, CoordinatorError::InvariantBreach(_)));
    }

    #[test]
    fn onboarding_conflicts_on_second_call() {
        let store = store_with(&[node("c1", "SN-1", MASTER, 1)]);
        onboard(&store, "c1", "ssh-rsa A").unwrap();
        let err = onboard(&store, "c1", "ssh-rsa A").unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyOnboarded { .. }));

        let info = store.get_node_info("c1").unwrap().unwrap();
        assert_eq!(info.node_version(), Some("v1.15.0"));
    }

    #[test]
    fn onboarding_validates_input() {
        let store = store_with(&[node("c1", "SN-1", MASTER, 1)]);
        let bad = OnboardRequest {
            node_id: "c1".into(),
            ssh_public_key: "k".into(),
            node_version: "1.15".into(),
        };
        let err = mark_onboarded(&store, &bad, 1).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidVersion(_)));

        let no_key = OnboardRequest {
            ssh_public_key: " ".into(),
            node_version: "v1.15.0".into(),
            ..bad.clone()
        };
        assert!(matches!(
            mark_onboarded(&store, &no_key, 1).unwrap_err(),
            CoordinatorError::InvalidArgument { field: "sshPublicKey", .. }
        ));

        let err = onboard(&store, "ghost", "k").unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound { .. }));
        assert!(!store.get_node("c1").unwrap().unwrap().is_onboarded);
    }

    #[test]
    fn onboarding_rejects_version_mismatch() {
        let store = store_with(&[
            node("c1", "SN-1", MASTER, 1),
            node("n2", "SN-2", MASTER, 2),
        ]);
        onboard(&store, "c1", "ssh-rsa A").unwrap();

        let req = OnboardRequest {
            node_id: "n2".into(),
            ssh_public_key: "ssh-rsa B".into(),
            node_version: "v1.16.0".into(),
        };
        let err = mark_onboarded(&store, &req, 5).unwrap_err();
        assert_eq!(err.to_string(), "Node version must be v1.15.0, found v1.16.0");
        assert!(!store.get_node("n2").unwrap().unwrap().is_onboarded);
    }

    #[test]
    fn polling_worker_reads_past_an_open_writer() {
        let store = store_with(&[
            node("c1", "SN-1", MASTER, 1),
            node("n2", "SN-2", WORKER, 2),
        ]);

        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let store = store.clone();
            thread::spawn(move || {
                store
                    .write(|_txn| -> StateResult<()> {
                        held_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            })
        };
        held_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let poller = {
            let store = store.clone();
            thread::spawn(move || {
                done_tx.send(identify_by_serial_number(&store, "SN-2")).unwrap();
            })
        };
        let outcome = done_rx.recv_timeout(Duration::from_secs(5));
        release_tx.send(()).unwrap();
        holder.join().unwrap();
        poller.join().unwrap();

        let err = outcome
            .expect("identify waited for the store writer")
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn repeat_identification_keeps_the_bootstrap_role() {
        let store = store_with(&[
            node("c1", "SN-1", MASTER, 1),
            node("n2", "SN-2", MASTER, 2),
        ]);
        assert!(identify_by_serial_number(&store, "SN-1").unwrap().node.is_bootstrap_master);
        for _ in 0..3 {
            assert!(identify_by_serial_number(&store, "SN-1").unwrap().node.is_bootstrap_master);
        }
        let masters = store
            .nodes_in_cluster("c1")
            .unwrap()
            .into_iter()
            .filter(|n| n.is_bootstrap_master)
            .count();
        assert_eq!(masters, 1);
    }
}
