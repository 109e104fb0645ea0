//! Virtual-IP invariant: a cluster with two or more nodes has a virtual IP.

use fleet_state::{StoreView, WriteTxn};
use tracing::{debug, error};

use crate::error::{CoordinatorError, CoordinatorResult};

/// Decide whether a node create or a cluster virtual-IP update is legal.
///
/// Locks the cluster row for the rest of `txn`, so concurrent creates in the
/// same cluster see each other's nodes. `proposed` is the new virtual IP of a
/// cluster update and is ignored for node creates. Returns the number of
/// nodes already in the cluster.
pub fn check_virtual_ip(
    txn: &WriteTxn,
    cluster_id: &str,
    proposed: Option<&str>,
    is_node_create: bool,
) -> CoordinatorResult<usize> {
    let cluster = txn.lock_cluster(cluster_id)?;
    let node_count = txn.nodes_in_cluster(cluster_id)?.len();

    let setting = proposed.is_some_and(|ip| !ip.trim().is_empty());
    if setting && !is_node_create {
        return Ok(node_count);
    }
    if node_count == 0 {
        return Ok(node_count);
    }
    let legal = if is_node_create {
        cluster.virtual_ip().is_some()
    } else {
        node_count == 1
    };
    if legal {
        debug!(%cluster_id, node_count, is_node_create, "virtual IP check passed");
        return Ok(node_count);
    }
    error!(%cluster_id, node_count, is_node_create, "virtual IP is not set for cluster");
    Err(CoordinatorError::VirtualIpRequired {
        cluster_id: cluster_id.to_string(),
        node_count,
    })
}
