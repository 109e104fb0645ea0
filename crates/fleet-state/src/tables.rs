//! redb table definitions for the fleet state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Clusters keyed by `{cluster_id}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Nodes keyed by `{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Node telemetry keyed by `{node_id}`.
pub const NODE_INFOS: TableDefinition<&str, &[u8]> = TableDefinition::new("node_infos");

/// Credential locks keyed by `{cluster_id}`.
pub const CREDENTIAL_LOCKS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("credential_locks");
