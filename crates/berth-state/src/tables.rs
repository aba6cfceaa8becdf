//! redb table definitions for the Berth state store.
//!
//! Inventory tables key by the numeric resource id (`u64`), so iteration is
//! ordered by id. Values are JSON-serialized domain types. Dedication
//! records key by `{level}/{resource_id}` (e.g. `pod/42`).

use redb::TableDefinition;

/// Zones keyed by zone id.
pub const ZONES: TableDefinition<u64, &[u8]> = TableDefinition::new("zones");

/// Pods keyed by pod id.
pub const PODS: TableDefinition<u64, &[u8]> = TableDefinition::new("pods");

/// Clusters keyed by cluster id.
pub const CLUSTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("clusters");

/// Hosts keyed by host id.
pub const HOSTS: TableDefinition<u64, &[u8]> = TableDefinition::new("hosts");

/// Domains keyed by domain id.
pub const DOMAINS: TableDefinition<u64, &[u8]> = TableDefinition::new("domains");

/// Accounts keyed by account id.
pub const ACCOUNTS: TableDefinition<u64, &[u8]> = TableDefinition::new("accounts");

/// Dedication records keyed by `{level}/{resource_id}`.
pub const DEDICATIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("dedications");

/// Monotonic counters keyed by name (currently only `dedication_id`).
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
