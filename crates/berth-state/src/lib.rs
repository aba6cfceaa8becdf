//! berth-state — embedded state store for the Berth control plane.
//!
//! Backed by [redb](https://docs.rs/redb), holds the physical inventory
//! (zones, pods, clusters, hosts), the ownership tree (domains, accounts),
//! and dedication records.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Inventory tables use the numeric resource id as the key, so plain table
//! iteration yields ordered-by-id sequences. Dedication records use a
//! `{level}/{resource_id}` composite key, which makes the single-record-per-
//! resource rule a key-uniqueness property.
//!
//! Mutations run in redb write transactions (single writer, so any
//! read-validate-write sequence inside one transaction is serializable);
//! reads run against MVCC snapshots and never observe a half-committed
//! dedication. The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across threads.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{DedicationTxn, Snapshot, StateStore};
