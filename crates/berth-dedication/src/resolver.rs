//! ConstraintResolver — per-request avoid sets from dedication records.
//!
//! Given `(zone, domain, account)`, computes the complement of what the
//! owner may use. Priority is strict and first-match-wins:
//!
//! 1. records narrowed to the account itself;
//! 2. else domain-level records of the account's domain;
//! 3. else the first ancestor domain (walking root-ward) holding any;
//! 4. else only the non-dedicated remainder of the zone is usable.
//!
//! Lower-priority levels are never merged in. Expansion of a chosen record
//! pulls in the resource's own ancestor chain (the pod of an included
//! cluster, the pod and cluster of an included host) so per-level avoid
//! filtering cannot orphan an included resource. A defensive pass then
//! re-excludes the subtree of every record that does not grant to the
//! owner, so a broad grant never overrides a narrower conflicting one even
//! if the registry invariant was somehow bypassed.
//!
//! All reads happen against one store snapshot.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use berth_core::{
    AccountId, AvoidSet, ClusterId, DedicationRecord, DomainId, HostId, IncludeSet, PodId,
    ResourceLevel, ZoneId,
};
use berth_state::{Snapshot, StateStore};

use crate::error::{DedicationError, DedicationResult};

/// Whether a record entitles the given owner to use its subtree.
///
/// An account-narrowed record grants only that account. A domain-level
/// record grants the domain itself and every descendant domain, which is
/// the same as saying the record's domain appears in the owner's ancestor
/// chain.
pub fn grants_owner(
    record: &DedicationRecord,
    account_id: Option<AccountId>,
    owner_ancestors: &HashSet<DomainId>,
) -> bool {
    match record.account_id {
        Some(acc) => account_id == Some(acc),
        None => owner_ancestors.contains(&record.domain_id),
    }
}

/// Zone topology indexed for subtree expansion.
struct ZoneMap {
    pods: BTreeSet<PodId>,
    clusters: BTreeSet<ClusterId>,
    hosts: BTreeSet<HostId>,
    clusters_by_pod: HashMap<PodId, Vec<ClusterId>>,
    hosts_by_pod: HashMap<PodId, Vec<HostId>>,
    hosts_by_cluster: HashMap<ClusterId, Vec<HostId>>,
    pod_of_cluster: HashMap<ClusterId, PodId>,
    location_of_host: HashMap<HostId, (PodId, ClusterId)>,
}

impl ZoneMap {
    fn load(snapshot: &Snapshot, zone_id: ZoneId) -> DedicationResult<Self> {
        let mut map = ZoneMap {
            pods: BTreeSet::new(),
            clusters: BTreeSet::new(),
            hosts: BTreeSet::new(),
            clusters_by_pod: HashMap::new(),
            hosts_by_pod: HashMap::new(),
            hosts_by_cluster: HashMap::new(),
            pod_of_cluster: HashMap::new(),
            location_of_host: HashMap::new(),
        };
        for pod in snapshot.pods_of_zone(zone_id)? {
            map.pods.insert(pod.id);
        }
        for cluster in snapshot.clusters_of_zone(zone_id)? {
            map.clusters.insert(cluster.id);
            map.clusters_by_pod
                .entry(cluster.pod_id)
                .or_default()
                .push(cluster.id);
            map.pod_of_cluster.insert(cluster.id, cluster.pod_id);
        }
        for host in snapshot.hosts_of_zone(zone_id)? {
            map.hosts.insert(host.id);
            map.hosts_by_pod.entry(host.pod_id).or_default().push(host.id);
            map.hosts_by_cluster
                .entry(host.cluster_id)
                .or_default()
                .push(host.id);
            map.location_of_host
                .insert(host.id, (host.pod_id, host.cluster_id));
        }
        Ok(map)
    }

    /// Does the record's resource lie inside this zone?
    fn contains(&self, record: &DedicationRecord, zone_id: ZoneId) -> bool {
        match record.level {
            ResourceLevel::Zone => record.resource_id == zone_id,
            ResourceLevel::Pod => self.pods.contains(&record.resource_id),
            ResourceLevel::Cluster => self.clusters.contains(&record.resource_id),
            ResourceLevel::Host => self.hosts.contains(&record.resource_id),
        }
    }
}

/// Read-only resolver over the dedication record set.
#[derive(Clone)]
pub struct ConstraintResolver {
    state: StateStore,
}

impl ConstraintResolver {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// The avoid set for one owner in one zone: everything under the zone
    /// the owner is not entitled to use, expressed per level.
    pub fn resolve_avoid_set(
        &self,
        zone_id: ZoneId,
        domain_id: DomainId,
        account_id: AccountId,
    ) -> DedicationResult<AvoidSet> {
        let snapshot = self.state.snapshot()?;

        if snapshot.get_zone(zone_id)?.is_none() {
            return Err(DedicationError::InvalidTarget(format!(
                "zone {zone_id} does not exist"
            )));
        }

        let map = ZoneMap::load(&snapshot, zone_id)?;
        let records: Vec<DedicationRecord> = snapshot
            .list_dedications()?
            .into_iter()
            .filter(|r| map.contains(r, zone_id))
            .collect();

        // Nothing in the zone is dedicated: everything is usable.
        if records.is_empty() {
            return Ok(AvoidSet::new());
        }

        // The walk also validates the domain and traps tree cycles.
        let owner_chain: Vec<DomainId> = snapshot
            .ancestor_domains(domain_id)?
            .iter()
            .map(|d| d.id)
            .collect();
        let owner_ancestors: HashSet<DomainId> = owner_chain.iter().copied().collect();

        let chosen = choose_records(&records, &owner_chain, account_id);

        let mut include = IncludeSet::new();
        match &chosen {
            Some(chosen) => {
                for record in chosen {
                    expand_record(&mut include, record, &map);
                }
            }
            None => {
                // No grant anywhere in the ownership chain: start from the
                // whole zone and let the defensive pass carve out every
                // dedicated subtree.
                include.pods.extend(&map.pods);
                include.clusters.extend(&map.clusters);
                include.hosts.extend(&map.hosts);
            }
        }

        // Defensive pass: a record that does not grant to this owner keeps
        // its subtree excluded no matter what a broader grant pulled in.
        for record in &records {
            if !grants_owner(record, Some(account_id), &owner_ancestors) {
                strip_record(&mut include, record, &map);
            }
        }

        let mut avoid = AvoidSet::new();
        avoid.pods = map.pods.difference(&include.pods).copied().collect();
        avoid.clusters = map.clusters.difference(&include.clusters).copied().collect();
        avoid.hosts = map.hosts.difference(&include.hosts).copied().collect();

        debug!(
            zone = zone_id,
            domain = domain_id,
            account = account_id,
            chosen = chosen.as_ref().map(|c| c.len()).unwrap_or(0),
            avoided_pods = avoid.pods.len(),
            avoided_clusters = avoid.clusters.len(),
            avoided_hosts = avoid.hosts.len(),
            "avoid set resolved"
        );
        Ok(avoid)
    }
}

/// Strict-priority selection: account records, else the first domain in the
/// owner's chain (outward to the root) holding domain-level records.
fn choose_records(
    records: &[DedicationRecord],
    owner_chain: &[DomainId],
    account_id: AccountId,
) -> Option<Vec<DedicationRecord>> {
    let by_account: Vec<DedicationRecord> = records
        .iter()
        .filter(|r| r.account_id == Some(account_id))
        .cloned()
        .collect();
    if !by_account.is_empty() {
        return Some(by_account);
    }

    for &domain_id in owner_chain {
        let by_domain: Vec<DedicationRecord> = records
            .iter()
            .filter(|r| r.account_id.is_none() && r.domain_id == domain_id)
            .cloned()
            .collect();
        if !by_domain.is_empty() {
            return Some(by_domain);
        }
    }
    None
}

/// Pull a chosen record's subtree into the include set, along with the
/// resource's own ancestors (themselves only, not their other children).
fn expand_record(include: &mut IncludeSet, record: &DedicationRecord, map: &ZoneMap) {
    match record.level {
        ResourceLevel::Zone => {
            include.pods.extend(&map.pods);
            include.clusters.extend(&map.clusters);
            include.hosts.extend(&map.hosts);
        }
        ResourceLevel::Pod => {
            let pod_id = record.resource_id;
            include.pods.insert(pod_id);
            if let Some(clusters) = map.clusters_by_pod.get(&pod_id) {
                include.clusters.extend(clusters);
            }
            if let Some(hosts) = map.hosts_by_pod.get(&pod_id) {
                include.hosts.extend(hosts);
            }
        }
        ResourceLevel::Cluster => {
            let cluster_id = record.resource_id;
            include.clusters.insert(cluster_id);
            if let Some(hosts) = map.hosts_by_cluster.get(&cluster_id) {
                include.hosts.extend(hosts);
            }
            if let Some(&pod_id) = map.pod_of_cluster.get(&cluster_id) {
                include.pods.insert(pod_id);
            }
        }
        ResourceLevel::Host => {
            let host_id = record.resource_id;
            include.hosts.insert(host_id);
            if let Some(&(pod_id, cluster_id)) = map.location_of_host.get(&host_id) {
                include.pods.insert(pod_id);
                include.clusters.insert(cluster_id);
            }
        }
    }
}

/// Remove a foreign record's subtree from the include set. Ancestors of the
/// resource stay: a pod with one foreign cluster still serves its others.
fn strip_record(include: &mut IncludeSet, record: &DedicationRecord, map: &ZoneMap) {
    match record.level {
        ResourceLevel::Zone => {
            include.pods.clear();
            include.clusters.clear();
            include.hosts.clear();
        }
        ResourceLevel::Pod => {
            let pod_id = record.resource_id;
            include.pods.remove(&pod_id);
            if let Some(clusters) = map.clusters_by_pod.get(&pod_id) {
                for cluster in clusters {
                    include.clusters.remove(cluster);
                }
            }
            if let Some(hosts) = map.hosts_by_pod.get(&pod_id) {
                for host in hosts {
                    include.hosts.remove(host);
                }
            }
        }
        ResourceLevel::Cluster => {
            let cluster_id = record.resource_id;
            include.clusters.remove(&cluster_id);
            if let Some(hosts) = map.hosts_by_cluster.get(&cluster_id) {
                for host in hosts {
                    include.hosts.remove(host);
                }
            }
        }
        ResourceLevel::Host => {
            include.hosts.remove(&record.resource_id);
        }
    }
}
