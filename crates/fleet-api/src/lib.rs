//! fleet-api — REST API for fleetgrid.
//!
//! Thin axum adapter over [`fleet_cluster::Coordinator`]. Handlers decode
//! JSON, call one coordinator operation, and map its error kind to an HTTP
//! status.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/clusters` | Create a cluster |
//! | GET | `/api/v1/clusters/{id}` | Get a cluster |
//! | DELETE | `/api/v1/clusters/{id}` | Delete a cluster and its nodes |
//! | PUT | `/api/v1/clusters/{id}/virtual-ip` | Set or clear the virtual IP |
//! | GET | `/api/v1/clusters/{id}/status` | Cluster and per-node status |
//! | POST | `/api/v1/nodes` | Create a node |
//! | GET | `/api/v1/nodes/{id}` | Get a node |
//! | PUT | `/api/v1/nodes/{id}` | Update a node |
//! | DELETE | `/api/v1/nodes/{id}` | Delete a node |
//! | POST | `/api/v1/nodes/identify` | Identify by serial number, run election |
//! | POST | `/api/v1/nodes/onboarded` | Record onboarding |
//! | PUT | `/api/v1/nodes/{id}/info` | Report version and health bits |
//! | GET | `/api/v1/nodes/{id}/status` | Node status |
//! | GET | `/api/v1/nodes/{id}/features` | Features of the node's cluster |
//! | GET | `/api/v1/features?version=` | Resolve a version's features |
//! | POST | `/api/v1/upgrades/eligibility` | Validate an upgrade target |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use fleet_cluster::Coordinator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
}

/// Build the complete API router.
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let state = ApiState { coordinator };

    let api_routes = Router::new()
        .route("/clusters", post(handlers::create_cluster))
        .route(
            "/clusters/{id}",
            get(handlers::get_cluster).delete(handlers::delete_cluster),
        )
        .route("/clusters/{id}/virtual-ip", put(handlers::update_virtual_ip))
        .route("/clusters/{id}/status", get(handlers::cluster_status))
        .route("/nodes", post(handlers::create_node))
        .route("/nodes/identify", post(handlers::identify_node))
        .route("/nodes/onboarded", post(handlers::mark_onboarded))
        .route(
            "/nodes/{id}",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/nodes/{id}/info", put(handlers::report_node_info))
        .route("/nodes/{id}/status", get(handlers::node_status))
        .route("/nodes/{id}/features", get(handlers::node_features))
        .route("/features", get(handlers::resolve_features))
        .route("/upgrades/eligibility", post(handlers::upgrade_eligibility))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
