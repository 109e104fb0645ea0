//! StateStore — redb-backed state persistence for fleetgrid.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).
//!
//! Work is done inside closures passed to [`StateStore::read`] and
//! [`StateStore::write`]. A write closure runs in a single redb write
//! transaction: it commits only when the closure returns `Ok`, and every
//! other exit (error, panic, dropped future) rolls the whole unit back.
//! redb admits one writer at a time, so a write transaction doubles as the
//! exclusive cluster-row lock and makes read-then-write sequences inside it
//! behave as atomic conditional updates.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Def = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(NODE_INFOS).map_err(map_err!(Table))?;
        txn.open_table(CREDENTIAL_LOCKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` against a consistent read snapshot.
    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&ReadTxn) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&ReadTxn { txn })
    }

    /// Run `f` inside one exclusive write transaction.
    ///
    /// Commits iff `f` returns `Ok`.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&WriteTxn) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let unit = WriteTxn { txn };
        match f(&unit) {
            Ok(value) => {
                unit.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = unit.txn.abort() {
                    warn!(error = %abort, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    // ── Convenience single-shot reads ──────────────────────────────

    /// Get a cluster by ID.
    pub fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.read(|txn| txn.get_cluster(cluster_id))
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.read(|txn| txn.get_node(node_id))
    }

    /// Get a node's telemetry record by node ID.
    pub fn get_node_info(&self, node_id: &str) -> StateResult<Option<NodeInfo>> {
        self.read(|txn| txn.get_node_info(node_id))
    }

    /// List all nodes of a cluster.
    pub fn nodes_in_cluster(&self, cluster_id: &str) -> StateResult<Vec<Node>> {
        self.read(|txn| txn.nodes_in_cluster(cluster_id))
    }

    /// Whether the cluster's credential lock is engaged.
    pub fn credential_locked(&self, cluster_id: &str) -> StateResult<bool> {
        self.read(|txn| txn.credential_locked(cluster_id))
    }
}

fn decode_one<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let found = table.get(key).map_err(map_err!(Read))?;
    match found {
        Some(guard) => {
            let value: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn decode_all<T, R>(table: &R) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push(item);
    }
    Ok(results)
}

/// Queries shared by read and write transactions.
pub trait StoreView {
    /// Decode one row.
    fn fetch<T: DeserializeOwned>(&self, def: Def, key: &str) -> StateResult<Option<T>>;

    /// Decode every row of a table.
    fn fetch_all<T: DeserializeOwned>(&self, def: Def) -> StateResult<Vec<T>>;

    fn get_cluster(&self, cluster_id: &str) -> StateResult<Option<Cluster>> {
        self.fetch(CLUSTERS, cluster_id)
    }

    fn list_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.fetch_all(CLUSTERS)
    }

    fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.fetch(NODES, node_id)
    }

    fn get_node_info(&self, node_id: &str) -> StateResult<Option<NodeInfo>> {
        self.fetch(NODE_INFOS, node_id)
    }

    /// Nodes of a cluster, oldest first.
    fn nodes_in_cluster(&self, cluster_id: &str) -> StateResult<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .fetch_all::<Node>(NODES)?
            .into_iter()
            .filter(|n| n.cluster_id == cluster_id)
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(nodes)
    }

    fn node_infos_in_cluster(&self, cluster_id: &str) -> StateResult<Vec<NodeInfo>> {
        Ok(self
            .fetch_all::<NodeInfo>(NODE_INFOS)?
            .into_iter()
            .filter(|i| i.cluster_id == cluster_id)
            .collect())
    }

    /// Look up a node by serial number (trimmed, case-insensitive).
    fn node_by_serial_number(&self, serial_number: &str) -> StateResult<Option<Node>> {
        let serial = serial_number.trim();
        if serial.is_empty() {
            return Ok(None);
        }
        Ok(self
            .fetch_all::<Node>(NODES)?
            .into_iter()
            .find(|n| n.serial_matches(serial)))
    }

    /// A version reported by some node of the same cluster as `node_id`,
    /// optionally ignoring `node_id` itself.
    fn cluster_version_for_node(
        &self,
        node_id: &str,
        exclude_self: bool,
    ) -> StateResult<Option<String>> {
        let Some(node) = self.get_node(node_id)? else {
            return Ok(None);
        };
        let mut infos = self.node_infos_in_cluster(&node.cluster_id)?;
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(infos
            .into_iter()
            .filter(|i| !(exclude_self && i.id == node_id))
            .find_map(|i| i.node_version().map(str::to_string)))
    }

    /// The bootstrap master of a cluster, once it has onboarded.
    fn onboarded_bootstrap_master(&self, cluster_id: &str) -> StateResult<Option<Node>> {
        Ok(self
            .nodes_in_cluster(cluster_id)?
            .into_iter()
            .find(|n| n.is_bootstrap_master && n.is_onboarded))
    }

    fn credential_locked(&self, cluster_id: &str) -> StateResult<bool> {
        Ok(self
            .fetch::<CredentialLock>(CREDENTIAL_LOCKS, cluster_id)?
            .is_some_and(|l| l.locked))
    }
}

/// A read snapshot.
pub struct ReadTxn {
    txn: redb::ReadTransaction,
}

impl StoreView for ReadTxn {
    fn fetch<T: DeserializeOwned>(&self, def: Def, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        decode_one(&table, key)
    }

    fn fetch_all<T: DeserializeOwned>(&self, def: Def) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        decode_all(&table)
    }
}

/// An exclusive write transaction.
pub struct WriteTxn {
    txn: redb::WriteTransaction,
}

impl StoreView for WriteTxn {
    fn fetch<T: DeserializeOwned>(&self, def: Def, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        decode_one(&table, key)
    }

    fn fetch_all<T: DeserializeOwned>(&self, def: Def) -> StateResult<Vec<T>> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        decode_all(&table)
    }
}

impl WriteTxn {
    fn store<T: Serialize>(&self, def: Def, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table
            .insert(key, bytes.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove(&self, def: Def, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    fn exists(&self, def: Def, key: &str) -> StateResult<bool> {
        let table = self.txn.open_table(def).map_err(map_err!(Table))?;
        let found = table.get(key).map_err(map_err!(Read))?.is_some();
        Ok(found)
    }

    /// Read the cluster row under this transaction's exclusive lock.
    ///
    /// Every node-membership or virtual-IP decision for the cluster must be
    /// made after this call and before commit.
    pub fn lock_cluster(&self, cluster_id: &str) -> StateResult<Cluster> {
        let cluster = self.get_cluster(cluster_id)?.ok_or_else(|| StateError::MissingRow {
            table: "clusters",
            key: cluster_id.to_string(),
        })?;
        debug!(%cluster_id, "cluster row locked");
        Ok(cluster)
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert a new cluster; fails if the id is taken.
    pub fn insert_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        if self.exists(CLUSTERS, &cluster.id)? {
            return Err(StateError::DuplicateKey {
                table: "clusters",
                key: cluster.id.clone(),
            });
        }
        self.store(CLUSTERS, &cluster.id, cluster)
    }

    /// Overwrite an existing cluster row.
    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        self.store(CLUSTERS, &cluster.id, cluster)
    }

    /// Delete a cluster together with its nodes, node infos, and lock.
    /// Returns true if the cluster existed.
    pub fn delete_cluster(&self, cluster_id: &str) -> StateResult<bool> {
        for node in self.nodes_in_cluster(cluster_id)? {
            self.remove(NODES, &node.id)?;
            self.remove(NODE_INFOS, &node.id)?;
        }
        self.remove(CREDENTIAL_LOCKS, cluster_id)?;
        let existed = self.remove(CLUSTERS, cluster_id)?;
        debug!(%cluster_id, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert a new node; fails if the id is taken.
    pub fn insert_node(&self, node: &Node) -> StateResult<()> {
        if self.exists(NODES, &node.id)? {
            return Err(StateError::DuplicateKey {
                table: "nodes",
                key: node.id.clone(),
            });
        }
        self.store(NODES, &node.id, node)
    }

    /// Overwrite an existing node row.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        self.store(NODES, &node.id, node)
    }

    /// Delete a node and its telemetry record. Returns true if the node existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.remove(NODE_INFOS, node_id)?;
        let existed = self.remove(NODES, node_id)?;
        debug!(%node_id, existed, "node deleted");
        Ok(existed)
    }

    /// Set `is_bootstrap_master` on `node_id` unless some node of
    /// `cluster_id` already holds it. Returns whether this call won.
    pub fn claim_bootstrap_master(&self, node_id: &str, cluster_id: &str) -> StateResult<bool> {
        let nodes = self.nodes_in_cluster(cluster_id)?;
        if nodes.iter().any(|n| n.is_bootstrap_master) {
            return Ok(false);
        }
        let Some(mut node) = nodes.into_iter().find(|n| n.id == node_id) else {
            return Ok(false);
        };
        node.is_bootstrap_master = true;
        self.put_node(&node)?;
        Ok(true)
    }

    /// Mark a node onboarded unless it already is.
    pub fn mark_onboarded(
        &self,
        node_id: &str,
        ssh_public_key: &str,
        now: u64,
    ) -> StateResult<OnboardOutcome> {
        let Some(mut node) = self.get_node(node_id)? else {
            return Ok(OnboardOutcome::Missing);
        };
        if node.is_onboarded {
            return Ok(OnboardOutcome::AlreadyOnboarded);
        }
        node.is_onboarded = true;
        node.ssh_public_key = Some(ssh_public_key.to_string());
        node.updated_at = now;
        self.put_node(&node)?;
        Ok(OnboardOutcome::Updated)
    }

    // ── Node infos ─────────────────────────────────────────────────

    /// Insert or update a node telemetry record.
    pub fn put_node_info(&self, info: &NodeInfo) -> StateResult<()> {
        self.store(NODE_INFOS, &info.id, info)
    }

    /// Record the node's software version. Returns false if no record exists.
    pub fn set_node_version(&self, node_id: &str, version: &str, now: u64) -> StateResult<bool> {
        let Some(mut info) = self.get_node_info(node_id)? else {
            return Ok(false);
        };
        info.node_version = Some(version.to_string());
        info.updated_at = now;
        self.put_node_info(&info)?;
        Ok(true)
    }

    // ── Credential locks ───────────────────────────────────────────

    pub fn set_credential_lock(&self, cluster_id: &str, locked: bool, now: u64) -> StateResult<()> {
        let lock = CredentialLock {
            cluster_id: cluster_id.to_string(),
            locked,
            updated_at: now,
        };
        self.store(CREDENTIAL_LOCKS, cluster_id, &lock)
    }
}
