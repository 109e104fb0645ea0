//! fleet-state — embedded state store for fleetgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for clusters, nodes, node telemetry, and credential locks.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Mutations run inside [`StateStore::write`], whose single exclusive write
//! transaction is the unit of atomicity for every multi-step check-then-act
//! sequence the coordinator performs.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ReadTxn, StateStore, StoreView, WriteTxn};
pub use types::*;
