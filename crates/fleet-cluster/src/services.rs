//! Collaborator interfaces consumed by the coordinator.
//!
//! None of these are called while a store write transaction is open.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use fleet_state::StateStore;
use tracing::{debug, info};

use crate::coordinator::epoch_secs;
use crate::error::CoordinatorResult;

/// Whether a cluster's bootstrap credential has been claimed.
pub trait CredentialLockService: Send + Sync {
    fn is_locked(&self, cluster_id: &str) -> CoordinatorResult<bool>;

    fn set_locked(&self, cluster_id: &str, locked: bool) -> CoordinatorResult<()>;
}

/// Live websocket connections of nodes.
pub trait ConnectionRegistry: Send + Sync {
    fn is_connected(&self, tenant_id: &str, node_id: &str) -> bool;

    fn are_connected(&self, tenant_id: &str, node_ids: &[String]) -> HashMap<String, bool> {
        node_ids
            .iter()
            .map(|id| (id.clone(), self.is_connected(tenant_id, id)))
            .collect()
    }
}

/// Catalog of published node software releases.
pub trait ReleaseService: Send + Sync {
    fn release_exists(&self, version: &str) -> bool;
}

// ── Store-backed credential locks ──────────────────────────────────

/// Credential locks kept in the `credential_locks` table.
#[derive(Clone)]
pub struct StoreCredentialLocks {
    store: StateStore,
}

impl StoreCredentialLocks {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

impl CredentialLockService for StoreCredentialLocks {
    fn is_locked(&self, cluster_id: &str) -> CoordinatorResult<bool> {
        Ok(self.store.credential_locked(cluster_id)?)
    }

    fn set_locked(&self, cluster_id: &str, locked: bool) -> CoordinatorResult<()> {
        let now = epoch_secs();
        self.store
            .write(|txn| txn.set_credential_lock(cluster_id, locked, now))?;
        info!(%cluster_id, locked, "credential lock updated");
        Ok(())
    }
}

// ── In-memory connection registry ──────────────────────────────────

/// Connection registry fed by the websocket layer.
#[derive(Debug, Default)]
pub struct LiveConnections {
    connected: RwLock<HashSet<(String, String)>>,
}

impl LiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, tenant_id: &str, node_id: &str) {
        let mut connected = self.connected.write().unwrap_or_else(PoisonError::into_inner);
        connected.insert((tenant_id.to_string(), node_id.to_string()));
        debug!(%tenant_id, %node_id, "node connected");
    }

    pub fn disconnect(&self, tenant_id: &str, node_id: &str) {
        let mut connected = self.connected.write().unwrap_or_else(PoisonError::into_inner);
        connected.remove(&(tenant_id.to_string(), node_id.to_string()));
        debug!(%tenant_id, %node_id, "node disconnected");
    }
}

impl ConnectionRegistry for LiveConnections {
    fn is_connected(&self, tenant_id: &str, node_id: &str) -> bool {
        let connected = self.connected.read().unwrap_or_else(PoisonError::into_inner);
        connected.contains(&(tenant_id.to_string(), node_id.to_string()))
    }
}

// ── Static release list ────────────────────────────────────────────

/// Fixed set of known releases, or every well-formed version.
#[derive(Debug, Clone, Default)]
pub struct StaticReleases {
    versions: Option<BTreeSet<String>>,
}

impl StaticReleases {
    pub fn new<I, S>(versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            versions: Some(versions.into_iter().map(Into::into).collect()),
        }
    }

    /// Accept any version that parses.
    pub fn any() -> Self {
        Self { versions: None }
    }
}

impl ReleaseService for StaticReleases {
    fn release_exists(&self, version: &str) -> bool {
        match &self.versions {
            Some(known) => known.contains(version.trim()),
            None => fleet_core::validate_version(version).is_ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_locks_round_trip() {
        let locks = StoreCredentialLocks::new(StateStore::open_in_memory().unwrap());
        assert!(!locks.is_locked("c1").unwrap());
        locks.set_locked("c1", true).unwrap();
        assert!(locks.is_locked("c1").unwrap());
        locks.set_locked("c1", false).unwrap();
        assert!(!locks.is_locked("c1").unwrap());
        locks.set_locked("c1", true).unwrap();
        assert!(locks.is_locked("c1").unwrap());
    }

    #[test]
    fn connections_are_tenant_scoped() {
        let live = LiveConnections::new();
        live.connect("t1", "n1");
        assert!(live.is_connected("t1", "n1"));
        assert!(!live.is_connected("t2", "n1"));

        let ids = vec!["n1".to_string(), "n2".to_string()];
        let bulk = live.are_connected("t1", &ids);
        assert_eq!(bulk.get("n1"), Some(&true));
        assert_eq!(bulk.get("n2"), Some(&false));

        live.disconnect("t1", "n1");
        assert!(!live.is_connected("t1", "n1"));
    }

    #[test]
    fn static_releases() {
        let fixed = StaticReleases::new(["v1.15.0", "v2.0.0"]);
        assert!(fixed.release_exists("v2.0.0"));
        assert!(!fixed.release_exists("v2.1.0"));

        let any = StaticReleases::any();
        assert!(any.release_exists("v9.9.9"));
        assert!(!any.release_exists("9.9.9"));
    }
}
