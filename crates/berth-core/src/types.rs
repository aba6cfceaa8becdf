//! Shared domain types used across Berth crates.
//!
//! Physical inventory records (zone/pod/cluster/host), the ownership tree
//! (domains and accounts), dedication records, and the per-request
//! avoid/include sets threaded through the placement pipeline. All persisted
//! types are serializable to/from JSON for storage in redb tables.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a zone (the root of the physical hierarchy).
pub type ZoneId = u64;

/// Unique identifier for a pod within a zone.
pub type PodId = u64;

/// Unique identifier for a cluster within a pod.
pub type ClusterId = u64;

/// Unique identifier for a host within a cluster.
pub type HostId = u64;

/// Unique identifier for a domain in the ownership tree.
pub type DomainId = u64;

/// Unique identifier for an account (a leaf of the ownership tree).
pub type AccountId = u64;

/// Unique identifier for a virtual machine.
pub type VmId = u64;

// ── Physical hierarchy ─────────────────────────────────────────────

/// A zone: the root of one physical hierarchy tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
}

/// A pod inside a zone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pod {
    pub id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    /// Pool tag marking this pod as implicitly dedicated capacity.
    pub implicit_pool: bool,
}

/// A cluster inside a pod.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub id: ClusterId,
    pub pod_id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    /// A disabled cluster accepts no new allocations and cannot be dedicated.
    pub allocation_enabled: bool,
    /// Pool tag marking this cluster as implicitly dedicated capacity.
    pub implicit_pool: bool,
}

/// A host inside a cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub cluster_id: ClusterId,
    pub pod_id: PodId,
    pub zone_id: ZoneId,
    pub name: String,
    pub kind: HostKind,
}

/// What a host is used for. Only routing hosts run workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    Routing,
    Storage,
}

/// The four levels of the physical hierarchy a dedication can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceLevel {
    Zone,
    Pod,
    Cluster,
    Host,
}

impl ResourceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceLevel::Zone => "zone",
            ResourceLevel::Pod => "pod",
            ResourceLevel::Cluster => "cluster",
            ResourceLevel::Host => "host",
        }
    }
}

impl fmt::Display for ResourceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Ownership tree ─────────────────────────────────────────────────

/// A domain in the ownership tree. The root domain has no parent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Domain {
    pub id: DomainId,
    pub parent_id: Option<DomainId>,
    pub name: String,
}

/// An account, attached to exactly one domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub domain_id: DomainId,
    pub name: String,
}

// ── Dedication ─────────────────────────────────────────────────────

/// An exclusive-use grant of one physical resource (and everything beneath
/// it) to a domain, optionally narrowed to a single account of that domain.
///
/// At most one record exists per (level, resource) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedicationRecord {
    pub id: u64,
    pub level: ResourceLevel,
    pub resource_id: u64,
    pub domain_id: DomainId,
    pub account_id: Option<AccountId>,
}

// ── Placement request ──────────────────────────────────────────────

/// Whether a VM is customer-owned or part of the platform itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmKind {
    User,
    System,
}

/// Context for one placement call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementRequest {
    pub vm_id: VmId,
    pub account_id: AccountId,
    pub domain_id: DomainId,
    pub zone_id: ZoneId,
    pub vm_kind: VmKind,
    pub bare_metal: bool,
    /// The VM belongs to an explicit-dedication affinity group.
    pub explicit_dedication: bool,
    /// The VM's service offering requests implicitly dedicated capacity.
    pub implicit_dedication: bool,
}

/// The destination a successful placement resolves to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub zone_id: ZoneId,
    pub pod_id: PodId,
    pub cluster_id: ClusterId,
    pub host_id: HostId,
}

// ── Avoid / include sets ───────────────────────────────────────────

/// Physical resources excluded from consideration for one placement call.
///
/// Owned by a single placement call for its lifetime; stages of the pipeline
/// add to it in order, so later stages always see earlier exclusions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvoidSet {
    pub zones: BTreeSet<ZoneId>,
    pub pods: BTreeSet<PodId>,
    pub clusters: BTreeSet<ClusterId>,
    pub hosts: BTreeSet<HostId>,
}

impl AvoidSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_zone(&mut self, id: ZoneId) {
        self.zones.insert(id);
    }

    pub fn add_pod(&mut self, id: PodId) {
        self.pods.insert(id);
    }

    pub fn add_cluster(&mut self, id: ClusterId) {
        self.clusters.insert(id);
    }

    pub fn add_host(&mut self, id: HostId) {
        self.hosts.insert(id);
    }

    pub fn avoids_zone(&self, id: ZoneId) -> bool {
        self.zones.contains(&id)
    }

    pub fn avoids_pod(&self, id: PodId) -> bool {
        self.pods.contains(&id)
    }

    pub fn avoids_cluster(&self, id: ClusterId) -> bool {
        self.clusters.contains(&id)
    }

    pub fn avoids_host(&self, id: HostId) -> bool {
        self.hosts.contains(&id)
    }

    /// Union-merge another avoid set into this one.
    pub fn union_with(&mut self, other: &AvoidSet) {
        self.zones.extend(&other.zones);
        self.pods.extend(&other.pods);
        self.clusters.extend(&other.clusters);
        self.hosts.extend(&other.hosts);
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
            && self.pods.is_empty()
            && self.clusters.is_empty()
            && self.hosts.is_empty()
    }
}

/// Physical resources an owner is entitled to use — the complement of the
/// avoid set over one zone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncludeSet {
    pub pods: BTreeSet<PodId>,
    pub clusters: BTreeSet<ClusterId>,
    pub hosts: BTreeSet<HostId>,
}

impl IncludeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty() && self.clusters.is_empty() && self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avoid_set_union_merges_all_levels() {
        let mut a = AvoidSet::new();
        a.add_pod(1);
        a.add_host(10);

        let mut b = AvoidSet::new();
        b.add_pod(2);
        b.add_cluster(5);

        a.union_with(&b);

        assert!(a.avoids_pod(1));
        assert!(a.avoids_pod(2));
        assert!(a.avoids_cluster(5));
        assert!(a.avoids_host(10));
    }

    #[test]
    fn avoid_set_starts_empty() {
        let a = AvoidSet::new();
        assert!(a.is_empty());
        assert!(!a.avoids_pod(1));
    }

    #[test]
    fn resource_level_display() {
        assert_eq!(ResourceLevel::Zone.to_string(), "zone");
        assert_eq!(ResourceLevel::Host.to_string(), "host");
    }

    #[test]
    fn dedication_record_json_round_trip() {
        let record = DedicationRecord {
            id: 7,
            level: ResourceLevel::Cluster,
            resource_id: 42,
            domain_id: 3,
            account_id: Some(9),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: DedicationRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
