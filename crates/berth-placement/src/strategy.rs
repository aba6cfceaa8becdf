//! Placement strategies — candidate walks over capacity-ranked resources.
//!
//! Capacity ranking is an external concern: a [`CapacityProvider`] hands
//! each strategy best-fit-first candidate lists, and the strategy only
//! filters (avoid set, disabled clusters, non-routing hosts) and re-ranks
//! (dedication preference). Strategies never inject candidates the
//! provider did not rank.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use berth_core::{
    AccountId, AvoidSet, ClusterId, Destination, DomainId, HostId, HostKind, PlacementRequest,
    PodId, ResourceLevel, ZoneId,
};
use berth_state::{Snapshot, StateStore};

use crate::error::PlacementResult;

/// Best-fit-first candidate ranking, supplied by the capacity subsystem.
pub trait CapacityProvider: Send + Sync {
    fn pods_by_capacity(&self, zone_id: ZoneId) -> Vec<PodId>;
    fn clusters_by_capacity(&self, pod_id: PodId) -> Vec<ClusterId>;
    fn hosts_by_capacity(&self, cluster_id: ClusterId) -> Vec<HostId>;
}

/// Fallback ranking straight from the store's id order, for tests and for
/// deployments without capacity data.
pub struct StoreOrderCapacity {
    state: StateStore,
}

impl StoreOrderCapacity {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl CapacityProvider for StoreOrderCapacity {
    fn pods_by_capacity(&self, zone_id: ZoneId) -> Vec<PodId> {
        match self.state.pods_of_zone(zone_id) {
            Ok(pods) => pods.iter().map(|p| p.id).collect(),
            Err(e) => {
                warn!(zone = zone_id, error = %e, "pod ranking unavailable");
                Vec::new()
            }
        }
    }

    fn clusters_by_capacity(&self, pod_id: PodId) -> Vec<ClusterId> {
        match self.state.clusters_of_pod(pod_id) {
            Ok(clusters) => clusters.iter().map(|c| c.id).collect(),
            Err(e) => {
                warn!(pod = pod_id, error = %e, "cluster ranking unavailable");
                Vec::new()
            }
        }
    }

    fn hosts_by_capacity(&self, cluster_id: ClusterId) -> Vec<HostId> {
        match self.state.hosts_of_cluster(cluster_id) {
            Ok(hosts) => hosts.iter().map(|h| h.id).collect(),
            Err(e) => {
                warn!(cluster = cluster_id, error = %e, "host ranking unavailable");
                Vec::new()
            }
        }
    }
}

/// One link of the strategy chain.
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy applies to the request at all.
    fn can_handle(&self, request: &PlacementRequest) -> bool;

    /// Pick a destination, or defer to the next strategy with `None`.
    fn plan(
        &self,
        request: &PlacementRequest,
        avoid: &AvoidSet,
    ) -> PlacementResult<Option<Destination>>;
}

/// Move candidates in `preferred` to the front, preserving the relative
/// capacity order of both groups. Candidates not in the ranked input are
/// never injected.
pub fn reorder_preferred(ranked: Vec<u64>, preferred: &BTreeSet<u64>) -> Vec<u64> {
    if preferred.is_empty() {
        return ranked;
    }
    let (front, back): (Vec<u64>, Vec<u64>) =
        ranked.into_iter().partition(|id| preferred.contains(id));
    front.into_iter().chain(back).collect()
}

/// The shared pod → cluster → host descent. Preferred sets bias the order;
/// empty sets leave the capacity ranking untouched.
fn first_fit_walk(
    snapshot: &Snapshot,
    capacity: &dyn CapacityProvider,
    request: &PlacementRequest,
    avoid: &AvoidSet,
    preferred_pods: &BTreeSet<PodId>,
    preferred_clusters: &BTreeSet<ClusterId>,
) -> PlacementResult<Option<Destination>> {
    let pods = reorder_preferred(capacity.pods_by_capacity(request.zone_id), preferred_pods);
    for pod_id in pods {
        if avoid.avoids_pod(pod_id) {
            continue;
        }
        let clusters =
            reorder_preferred(capacity.clusters_by_capacity(pod_id), preferred_clusters);
        for cluster_id in clusters {
            if avoid.avoids_cluster(cluster_id) {
                continue;
            }
            let Some(cluster) = snapshot.get_cluster(cluster_id)? else {
                continue;
            };
            if !cluster.allocation_enabled {
                continue;
            }
            for host_id in capacity.hosts_by_capacity(cluster_id) {
                if avoid.avoids_host(host_id) {
                    continue;
                }
                let Some(host) = snapshot.get_host(host_id)? else {
                    continue;
                };
                if host.kind != HostKind::Routing {
                    continue;
                }
                return Ok(Some(Destination {
                    zone_id: request.zone_id,
                    pod_id,
                    cluster_id,
                    host_id,
                }));
            }
        }
    }
    Ok(None)
}

/// Capacity-order first fit: the general-purpose tail of the chain.
pub struct FirstFitStrategy {
    state: StateStore,
    capacity: Arc<dyn CapacityProvider>,
}

impl FirstFitStrategy {
    pub fn new(state: StateStore, capacity: Arc<dyn CapacityProvider>) -> Self {
        Self { state, capacity }
    }
}

impl PlacementStrategy for FirstFitStrategy {
    fn name(&self) -> &'static str {
        "first-fit"
    }

    fn can_handle(&self, request: &PlacementRequest) -> bool {
        !request.bare_metal
    }

    fn plan(
        &self,
        request: &PlacementRequest,
        avoid: &AvoidSet,
    ) -> PlacementResult<Option<Destination>> {
        let snapshot = self.state.snapshot()?;
        let none = BTreeSet::new();
        let destination =
            first_fit_walk(&snapshot, self.capacity.as_ref(), request, avoid, &none, &none)?;
        debug!(vm = request.vm_id, found = destination.is_some(), "first-fit walk finished");
        Ok(destination)
    }
}

/// First fit biased toward dedicated capacity, for workloads that asked for
/// dedication. Not applicable to bare-metal requests.
pub struct DedicationAwareStrategy {
    state: StateStore,
    capacity: Arc<dyn CapacityProvider>,
}

impl DedicationAwareStrategy {
    pub fn new(state: StateStore, capacity: Arc<dyn CapacityProvider>) -> Self {
        Self { state, capacity }
    }

    /// The pods and clusters this request should be steered toward.
    ///
    /// Implicit dedication prefers the implicit pool, system-wide. Explicit
    /// dedication prefers resources granted to the account, else to the
    /// first domain in the ownership chain holding any — the same
    /// account-over-domain-over-ancestor rule the resolver applies.
    fn preferred_sets(
        &self,
        request: &PlacementRequest,
    ) -> PlacementResult<(BTreeSet<PodId>, BTreeSet<ClusterId>)> {
        let snapshot = self.state.snapshot()?;

        if request.implicit_dedication {
            let pods = snapshot.implicit_pool_pods()?.iter().map(|p| p.id).collect();
            let clusters = snapshot
                .implicit_pool_clusters()?
                .iter()
                .map(|c| c.id)
                .collect();
            return Ok((pods, clusters));
        }

        let chain: Vec<DomainId> = snapshot
            .ancestor_domains(request.domain_id)?
            .iter()
            .map(|d| d.id)
            .collect();
        let pods = preferred_level(&snapshot, ResourceLevel::Pod, request.account_id, &chain)?;
        let clusters =
            preferred_level(&snapshot, ResourceLevel::Cluster, request.account_id, &chain)?;
        Ok((pods, clusters))
    }
}

fn preferred_level(
    snapshot: &Snapshot,
    level: ResourceLevel,
    account_id: AccountId,
    chain: &[DomainId],
) -> PlacementResult<BTreeSet<u64>> {
    let by_account: BTreeSet<u64> = snapshot
        .dedications_for_account(account_id)?
        .iter()
        .filter(|r| r.level == level)
        .map(|r| r.resource_id)
        .collect();
    if !by_account.is_empty() {
        return Ok(by_account);
    }
    for &domain_id in chain {
        let by_domain: BTreeSet<u64> = snapshot
            .dedications_for_domain(domain_id)?
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.resource_id)
            .collect();
        if !by_domain.is_empty() {
            return Ok(by_domain);
        }
    }
    Ok(BTreeSet::new())
}

impl PlacementStrategy for DedicationAwareStrategy {
    fn name(&self) -> &'static str {
        "dedication-aware"
    }

    fn can_handle(&self, request: &PlacementRequest) -> bool {
        !request.bare_metal && (request.implicit_dedication || request.explicit_dedication)
    }

    fn plan(
        &self,
        request: &PlacementRequest,
        avoid: &AvoidSet,
    ) -> PlacementResult<Option<Destination>> {
        let (preferred_pods, preferred_clusters) = self.preferred_sets(request)?;
        debug!(
            vm = request.vm_id,
            preferred_pods = preferred_pods.len(),
            preferred_clusters = preferred_clusters.len(),
            "dedication preference computed"
        );
        let snapshot = self.state.snapshot()?;
        first_fit_walk(
            &snapshot,
            self.capacity.as_ref(),
            request,
            avoid,
            &preferred_pods,
            &preferred_clusters,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_core::{Account, Cluster, Domain, Host, Pod, VmKind, Zone};
    use berth_dedication::DedicationRegistry;

    fn seeded() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&Zone { id: 1, name: "z1".into() }).unwrap();
        for (pod, implicit) in [(11, false), (12, true)] {
            store
                .put_pod(&Pod {
                    id: pod,
                    zone_id: 1,
                    name: format!("p{pod}"),
                    implicit_pool: implicit,
                })
                .unwrap();
        }
        for (cluster, pod) in [(21, 11), (22, 12)] {
            store
                .put_cluster(&Cluster {
                    id: cluster,
                    pod_id: pod,
                    zone_id: 1,
                    name: format!("c{cluster}"),
                    allocation_enabled: true,
                    implicit_pool: false,
                })
                .unwrap();
        }
        for (host, cluster, pod) in [(31, 21, 11), (32, 22, 12)] {
            store
                .put_host(&Host {
                    id: host,
                    cluster_id: cluster,
                    pod_id: pod,
                    zone_id: 1,
                    name: format!("h{host}"),
                    kind: HostKind::Routing,
                })
                .unwrap();
        }
        store.put_domain(&Domain { id: 1, parent_id: None, name: "root".into() }).unwrap();
        store.put_domain(&Domain { id: 2, parent_id: Some(1), name: "d2".into() }).unwrap();
        store.put_account(&Account { id: 100, domain_id: 2, name: "a100".into() }).unwrap();
        store
    }

    fn request(implicit: bool, explicit: bool) -> PlacementRequest {
        PlacementRequest {
            vm_id: 1,
            account_id: 100,
            domain_id: 2,
            zone_id: 1,
            vm_kind: VmKind::User,
            bare_metal: false,
            explicit_dedication: explicit,
            implicit_dedication: implicit,
        }
    }

    // ── Reordering ─────────────────────────────────────────────────

    #[test]
    fn reorder_moves_preferred_to_front_keeping_order() {
        let preferred: BTreeSet<u64> = [4, 2].into_iter().collect();
        let ranked = vec![1, 2, 3, 4, 5];

        assert_eq!(reorder_preferred(ranked, &preferred), vec![2, 4, 1, 3, 5]);
    }

    #[test]
    fn reorder_with_empty_preference_is_identity() {
        let preferred = BTreeSet::new();
        assert_eq!(reorder_preferred(vec![3, 1, 2], &preferred), vec![3, 1, 2]);
    }

    #[test]
    fn reorder_never_injects_unranked_candidates() {
        let preferred: BTreeSet<u64> = [9].into_iter().collect();
        assert_eq!(reorder_preferred(vec![1, 2], &preferred), vec![1, 2]);
    }

    // ── can_handle gating ──────────────────────────────────────────

    #[test]
    fn dedication_aware_requires_a_dedication_flag() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = DedicationAwareStrategy::new(store, capacity);

        assert!(!strategy.can_handle(&request(false, false)));
        assert!(strategy.can_handle(&request(true, false)));
        assert!(strategy.can_handle(&request(false, true)));

        let mut bare = request(true, false);
        bare.bare_metal = true;
        assert!(!strategy.can_handle(&bare));
    }

    #[test]
    fn first_fit_rejects_bare_metal() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = FirstFitStrategy::new(store, capacity);

        let mut bare = request(false, false);
        bare.bare_metal = true;
        assert!(!strategy.can_handle(&bare));
    }

    // ── Planning ───────────────────────────────────────────────────

    #[test]
    fn first_fit_takes_best_capacity_candidate() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = FirstFitStrategy::new(store, capacity);

        let destination = strategy
            .plan(&request(false, false), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 11);
        assert_eq!(destination.host_id, 31);
    }

    #[test]
    fn first_fit_honors_avoid_set() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = FirstFitStrategy::new(store, capacity);

        let mut avoid = AvoidSet::new();
        avoid.add_pod(11);
        let destination = strategy
            .plan(&request(false, false), &avoid)
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 12);

        avoid.add_host(32);
        assert!(strategy.plan(&request(false, false), &avoid).unwrap().is_none());
    }

    #[test]
    fn implicit_request_prefers_the_implicit_pool() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = DedicationAwareStrategy::new(store, capacity);

        // Pod 12 is pool-tagged; it wins over the better-ranked pod 11.
        let destination = strategy
            .plan(&request(true, false), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 12);
        assert_eq!(destination.host_id, 32);
    }

    #[test]
    fn explicit_request_prefers_account_dedicated_pod() {
        let store = seeded();
        let registry = DedicationRegistry::new(store.clone());
        registry
            .dedicate(ResourceLevel::Pod, 12, 2, Some(100))
            .unwrap();

        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = DedicationAwareStrategy::new(store, capacity);

        let destination = strategy
            .plan(&request(false, true), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 12);
    }

    #[test]
    fn explicit_request_falls_back_to_domain_grants() {
        let store = seeded();
        let registry = DedicationRegistry::new(store.clone());
        // Grant held by the domain, not the account.
        registry.dedicate(ResourceLevel::Pod, 12, 2, None).unwrap();

        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = DedicationAwareStrategy::new(store, capacity);

        let destination = strategy
            .plan(&request(false, true), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 12);
    }

    #[test]
    fn no_preference_leaves_capacity_order_unchanged() {
        let store = seeded();
        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = DedicationAwareStrategy::new(store, capacity);

        // Explicit flag set but nothing dedicated anywhere: capacity order
        // stands and the first-ranked pod wins.
        let destination = strategy
            .plan(&request(false, true), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.pod_id, 11);
    }

    #[test]
    fn disabled_cluster_is_skipped() {
        let store = seeded();
        store
            .put_cluster(&Cluster {
                id: 21,
                pod_id: 11,
                zone_id: 1,
                name: "c21".into(),
                allocation_enabled: false,
                implicit_pool: false,
            })
            .unwrap();

        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = FirstFitStrategy::new(store, capacity);

        let destination = strategy
            .plan(&request(false, false), &AvoidSet::new())
            .unwrap()
            .unwrap();
        // Pod 11's only cluster is disabled; the walk moves on to pod 12.
        assert_eq!(destination.pod_id, 12);
    }

    #[test]
    fn storage_host_is_skipped() {
        let store = seeded();
        store
            .put_host(&Host {
                id: 31,
                cluster_id: 21,
                pod_id: 11,
                zone_id: 1,
                name: "h31".into(),
                kind: HostKind::Storage,
            })
            .unwrap();

        let capacity = Arc::new(StoreOrderCapacity::new(store.clone()));
        let strategy = FirstFitStrategy::new(store, capacity);

        let destination = strategy
            .plan(&request(false, false), &AvoidSet::new())
            .unwrap()
            .unwrap();
        assert_eq!(destination.host_id, 32);
    }
}
