//! fleet-health — health evaluation and status projection for fleetgrid.
//!
//! Nodes report a map of boolean health bits alongside their software
//! version. This crate turns that telemetry into the externally visible
//! node status.
//!
//! # Architecture
//!
//! ```text
//! StatusProjector
//!   ├── FeatureCatalog (is the node multi-node-aware?)
//!   ├── HealthPolicy::evaluate(health_bits) → HealthStatus
//!   └── LiveSignals (websocket connection, credential lock, onboarded flag)
//!         └── NodeStatus { connected, healthy, health_status, onboarded }
//! ```
//!
//! Multi-node-aware nodes are judged on their own telemetry: connectivity
//! follows the age of the last report and health follows the evaluator.
//! Older nodes fall back to the live connection registry and the cluster's
//! credential lock.

pub mod evaluator;
pub mod projector;

pub use evaluator::{HealthPolicy, default_expected_bits};
pub use projector::{LiveSignals, NodeStatus, StatusProjector};
