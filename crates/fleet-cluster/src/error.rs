//! Error taxonomy for coordinator operations.

use fleet_core::VersionError;
use fleet_state::StateError;
use serde::Serialize;
use thiserror::Error;

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// How a caller should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request itself is wrong; retrying it unchanged fails again.
    Precondition,
    /// The cluster is not ready yet; poll with backoff.
    Retryable,
    /// Another caller got there first.
    Conflict,
    /// The operation is not supported for this cluster.
    Forbidden,
    NotFound,
    Internal,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Virtual IP is required for cluster {cluster_id} with {node_count} node(s)")]
    VirtualIpRequired { cluster_id: String, node_count: usize },

    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    #[error("Node version must be {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Node {node_id} in cluster {cluster_id} waiting for {waiting_for}")]
    WaitingForMasters {
        node_id: String,
        cluster_id: String,
        waiting_for: &'static str,
    },

    #[error("Node {node_id} already onboarded")]
    AlreadyOnboarded { node_id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    #[error("Unsupported operation for non-multi-node-aware cluster {cluster_id}")]
    NotMultiNodeAware { cluster_id: String },

    #[error("invariant breach: {0}")]
    InvariantBreach(String),

    #[error("state store: {0}")]
    State(StateError),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. }
            | Self::VirtualIpRequired { .. }
            | Self::InvalidVersion(_)
            | Self::VersionMismatch { .. } => ErrorKind::Precondition,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::WaitingForMasters { .. } => ErrorKind::Retryable,
            Self::AlreadyOnboarded { .. } | Self::AlreadyExists { .. } => ErrorKind::Conflict,
            Self::NotMultiNodeAware { .. } => ErrorKind::Forbidden,
            Self::InvariantBreach(_) | Self::State(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

fn entity_of(table: &'static str) -> &'static str {
    match table {
        "clusters" => "cluster",
        "nodes" => "node",
        "node_infos" => "node info",
        "credential_locks" => "credential lock",
        other => other,
    }
}

impl From<StateError> for CoordinatorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::MissingRow { table, key } => Self::NotFound {
                entity: entity_of(table),
                id: key,
            },
            StateError::DuplicateKey { table, key } => Self::AlreadyExists {
                entity: entity_of(table),
                id: key,
            },
            other => Self::State(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            CoordinatorError::invalid("serialNumber", "empty").kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            CoordinatorError::VirtualIpRequired {
                cluster_id: "c".into(),
                node_count: 1
            }
            .kind(),
            ErrorKind::Precondition
        );
        assert_eq!(
            CoordinatorError::AlreadyOnboarded { node_id: "n".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            CoordinatorError::NotMultiNodeAware { cluster_id: "c".into() }.kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            CoordinatorError::InvariantBreach("x".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn only_waiting_is_retryable() {
        let waiting = CoordinatorError::WaitingForMasters {
            node_id: "w".into(),
            cluster_id: "c".into(),
            waiting_for: "first master to onboard",
        };
        assert!(waiting.is_retryable());
        assert!(!CoordinatorError::not_found("node", "n").is_retryable());
        assert_eq!(
            waiting.to_string(),
            "Node w in cluster c waiting for first master to onboard"
        );
    }

    #[test]
    fn state_errors_are_classified() {
        let missing: CoordinatorError = StateError::MissingRow {
            table: "clusters",
            key: "c1".into(),
        }
        .into();
        assert!(matches!(missing, CoordinatorError::NotFound { entity: "cluster", .. }));

        let dup: CoordinatorError = StateError::DuplicateKey {
            table: "nodes",
            key: "n1".into(),
        }
        .into();
        assert_eq!(dup.kind(), ErrorKind::Conflict);

        let io: CoordinatorError = StateError::Write("disk full".into()).into();
        assert_eq!(io.kind(), ErrorKind::Internal);
    }

    #[test]
    fn virtual_ip_message_names_the_requirement() {
        let err = CoordinatorError::VirtualIpRequired {
            cluster_id: "c1".into(),
            node_count: 1,
        };
        assert!(err.to_string().contains("Virtual IP"));
    }
}
