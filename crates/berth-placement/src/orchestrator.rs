//! PlacementOrchestrator — drives one placement call end to end.
//!
//! Per call: affinity chain → default dedication protection → strategy
//! chain. The avoid set lives for exactly one call and is threaded through
//! every stage in order. The winning strategy's host is added to the set
//! before the call returns, so a caller re-entering with the same set in
//! the same pass cannot be handed the same host twice. Strategies earlier
//! in the chain are never re-evaluated against a later strategy's
//! exclusions — this is a single pass, not a round-robin.

use std::sync::Arc;

use tracing::{debug, info};

use berth_core::{AvoidSet, Destination, PlacementConfig, PlacementRequest, ResourceLevel, VmKind};
use berth_state::StateStore;

use crate::affinity::{AffinityProcessor, ExplicitDedicationProcessor};
use crate::error::{PlacementError, PlacementResult};
use crate::strategy::{
    CapacityProvider, DedicationAwareStrategy, FirstFitStrategy, PlacementStrategy,
};

pub struct PlacementOrchestrator {
    state: StateStore,
    processors: Vec<Box<dyn AffinityProcessor>>,
    strategies: Vec<Box<dyn PlacementStrategy>>,
    protect_dedicated: bool,
}

impl std::fmt::Debug for PlacementOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementOrchestrator")
            .field("processors", &self.processors.len())
            .field("strategies", &self.strategies.len())
            .field("protect_dedicated", &self.protect_dedicated)
            .finish()
    }
}

impl PlacementOrchestrator {
    /// An orchestrator with empty chains; register stages explicitly.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            processors: Vec::new(),
            strategies: Vec::new(),
            protect_dedicated: true,
        }
    }

    /// Wire the standard pipeline from configuration: the explicit-
    /// dedication processor plus the configured strategy chain, in order.
    pub fn from_config(
        state: StateStore,
        capacity: Arc<dyn CapacityProvider>,
        config: &PlacementConfig,
    ) -> PlacementResult<Self> {
        let mut orchestrator = Self::new(state.clone());
        orchestrator.register_processor(Box::new(ExplicitDedicationProcessor::new(state.clone())));
        for name in &config.strategies {
            let strategy: Box<dyn PlacementStrategy> = match name.as_str() {
                "first-fit" => Box::new(FirstFitStrategy::new(state.clone(), capacity.clone())),
                "dedication-aware" => {
                    Box::new(DedicationAwareStrategy::new(state.clone(), capacity.clone()))
                }
                other => return Err(PlacementError::UnknownStrategy(other.to_string())),
            };
            orchestrator.register_strategy(strategy);
        }
        orchestrator.protect_dedicated = config.protect_dedicated();
        Ok(orchestrator)
    }

    /// Append a processor to the affinity chain. Order is call order.
    pub fn register_processor(&mut self, processor: Box<dyn AffinityProcessor>) {
        self.processors.push(processor);
    }

    /// Append a strategy to the chain. Order is call order.
    pub fn register_strategy(&mut self, strategy: Box<dyn PlacementStrategy>) {
        self.strategies.push(strategy);
    }

    /// Plan a placement starting from an empty avoid set.
    pub fn plan_placement(&self, request: &PlacementRequest) -> PlacementResult<Destination> {
        let mut avoid = AvoidSet::new();
        self.plan_with_avoid(request, &mut avoid)
    }

    /// Plan a placement, accumulating into the caller's avoid set. On
    /// success the chosen host has been added to the set.
    pub fn plan_with_avoid(
        &self,
        request: &PlacementRequest,
        avoid: &mut AvoidSet,
    ) -> PlacementResult<Destination> {
        if self.state.get_zone(request.zone_id)?.is_none() {
            return Err(PlacementError::InvalidTarget(format!(
                "zone {} does not exist",
                request.zone_id
            )));
        }

        for processor in &self.processors {
            processor.process(request, avoid)?;
            debug!(
                vm = request.vm_id,
                processor = processor.name(),
                pods = avoid.pods.len(),
                clusters = avoid.clusters.len(),
                hosts = avoid.hosts.len(),
                "affinity processor ran"
            );
        }

        if self.protect_dedicated
            && request.vm_kind == VmKind::User
            && !request.explicit_dedication
        {
            self.apply_default_protection(request, avoid)?;
        }

        debug!(
            vm = request.vm_id,
            pods = avoid.pods.len(),
            clusters = avoid.clusters.len(),
            hosts = avoid.hosts.len(),
            "avoid set final before strategies"
        );

        for strategy in &self.strategies {
            if !strategy.can_handle(request) {
                continue;
            }
            if let Some(destination) = strategy.plan(request, avoid)? {
                avoid.add_host(destination.host_id);
                info!(
                    vm = request.vm_id,
                    strategy = strategy.name(),
                    host = destination.host_id,
                    cluster = destination.cluster_id,
                    pod = destination.pod_id,
                    "destination selected"
                );
                return Ok(destination);
            }
            debug!(vm = request.vm_id, strategy = strategy.name(), "strategy deferred");
        }

        Err(PlacementError::InsufficientCapacity(format!(
            "no strategy produced a destination for vm {} in zone {}",
            request.vm_id, request.zone_id
        )))
    }

    /// Keep a non-dedicated user workload off all dedicated capacity. A
    /// zone-wide dedication rejects the request outright.
    fn apply_default_protection(
        &self,
        request: &PlacementRequest,
        avoid: &mut AvoidSet,
    ) -> PlacementResult<()> {
        let snapshot = self.state.snapshot()?;

        if let Some(record) = snapshot.find_dedication(ResourceLevel::Zone, request.zone_id)? {
            return Err(PlacementError::DedicatedZoneRejectsNonDedicated(format!(
                "zone {} is dedicated to domain {}",
                request.zone_id, record.domain_id
            )));
        }

        let mut shielded = 0usize;
        for record in snapshot.list_dedications()? {
            match record.level {
                ResourceLevel::Zone => {}
                ResourceLevel::Pod => {
                    if let Some(pod) = snapshot.get_pod(record.resource_id)? {
                        if pod.zone_id == request.zone_id {
                            avoid.add_pod(pod.id);
                            shielded += 1;
                        }
                    }
                }
                ResourceLevel::Cluster => {
                    if let Some(cluster) = snapshot.get_cluster(record.resource_id)? {
                        if cluster.zone_id == request.zone_id {
                            avoid.add_cluster(cluster.id);
                            shielded += 1;
                        }
                    }
                }
                ResourceLevel::Host => {
                    if let Some(host) = snapshot.get_host(record.resource_id)? {
                        if host.zone_id == request.zone_id {
                            avoid.add_host(host.id);
                            shielded += 1;
                        }
                    }
                }
            }
        }
        debug!(vm = request.vm_id, shielded, "dedicated capacity shielded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use berth_core::{Account, Cluster, Domain, Host, HostKind, Pod, Zone};
    use berth_dedication::DedicationRegistry;

    /// A scripted strategy for chain-behavior tests: records the avoid set
    /// it was called with and returns a fixed answer.
    struct ScriptedStrategy {
        name: &'static str,
        handles: bool,
        destination: Option<Destination>,
        calls: AtomicUsize,
        seen_avoid: Mutex<Option<AvoidSet>>,
    }

    impl ScriptedStrategy {
        fn new(name: &'static str, handles: bool, destination: Option<Destination>) -> Self {
            Self {
                name,
                handles,
                destination,
                calls: AtomicUsize::new(0),
                seen_avoid: Mutex::new(None),
            }
        }
    }

    impl PlacementStrategy for &'static ScriptedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        fn can_handle(&self, _request: &PlacementRequest) -> bool {
            self.handles
        }

        fn plan(
            &self,
            _request: &PlacementRequest,
            avoid: &AvoidSet,
        ) -> PlacementResult<Option<Destination>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_avoid.lock().unwrap() = Some(avoid.clone());
            Ok(self.destination.clone())
        }
    }

    fn seeded() -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store.put_zone(&Zone { id: 1, name: "z1".into() }).unwrap();
        for pod in [11, 12] {
            store
                .put_pod(&Pod {
                    id: pod,
                    zone_id: 1,
                    name: format!("p{pod}"),
                    implicit_pool: false,
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
        store.put_domain(&Domain { id: 3, parent_id: Some(1), name: "d3".into() }).unwrap();
        store.put_account(&Account { id: 100, domain_id: 2, name: "a100".into() }).unwrap();
        store
    }

    fn user_request() -> PlacementRequest {
        PlacementRequest {
            vm_id: 1,
            account_id: 100,
            domain_id: 2,
            zone_id: 1,
            vm_kind: VmKind::User,
            bare_metal: false,
            explicit_dedication: false,
            implicit_dedication: false,
        }
    }

    fn destination(host_id: u64) -> Destination {
        Destination {
            zone_id: 1,
            pod_id: 11,
            cluster_id: 21,
            host_id,
        }
    }

    #[test]
    fn unknown_zone_is_invalid() {
        let store = seeded();
        let orchestrator = PlacementOrchestrator::new(store);
        let mut request = user_request();
        request.zone_id = 9;

        let err = orchestrator.plan_placement(&request).unwrap_err();
        assert!(matches!(err, PlacementError::InvalidTarget(_)));
    }

    #[test]
    fn exhausted_chain_is_insufficient_capacity() {
        let store = seeded();
        let orchestrator = PlacementOrchestrator::new(store);

        let err = orchestrator.plan_placement(&user_request()).unwrap_err();
        assert!(matches!(err, PlacementError::InsufficientCapacity(_)));
    }

    #[test]
    fn winner_host_joins_avoid_set_and_chain_stops() {
        let first: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("first", true, None)));
        let winner: &'static ScriptedStrategy = Box::leak(Box::new(ScriptedStrategy::new(
            "winner",
            true,
            Some(destination(31)),
        )));
        let after: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("after", true, Some(destination(32)))));

        let store = seeded();
        let mut orchestrator = PlacementOrchestrator::new(store);
        orchestrator.register_strategy(Box::new(first));
        orchestrator.register_strategy(Box::new(winner));
        orchestrator.register_strategy(Box::new(after));

        let mut avoid = AvoidSet::new();
        let result = orchestrator
            .plan_with_avoid(&user_request(), &mut avoid)
            .unwrap();

        assert_eq!(result.host_id, 31);
        // The winner's host is excluded for the rest of the pass.
        assert!(avoid.avoids_host(31));
        // Strategies after the winner never run.
        assert_eq!(after.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn deferring_strategy_passes_original_avoid_set_on() {
        let first: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("first", false, Some(destination(31)))));
        let second: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("second", true, Some(destination(32)))));

        let store = seeded();
        let mut orchestrator = PlacementOrchestrator::new(store);
        orchestrator.register_strategy(Box::new(first));
        orchestrator.register_strategy(Box::new(second));

        let mut avoid = AvoidSet::new();
        avoid.add_pod(12);
        let result = orchestrator
            .plan_with_avoid(&user_request(), &mut avoid)
            .unwrap();

        assert_eq!(result.host_id, 32);
        // First strategy could not handle, so it never ran at all.
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        // Second strategy saw exactly the pre-chain avoid set.
        let seen = second.seen_avoid.lock().unwrap().clone().unwrap();
        assert!(seen.avoids_pod(12));
        assert!(!seen.avoids_host(31));
    }

    #[test]
    fn default_protection_shields_dedicated_resources() {
        let store = seeded();
        let registry = DedicationRegistry::new(store.clone());
        registry.dedicate(ResourceLevel::Pod, 11, 3, None).unwrap();
        registry.dedicate(ResourceLevel::Host, 32, 3, None).unwrap();

        let probe: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("probe", true, Some(destination(31)))));

        let mut orchestrator = PlacementOrchestrator::new(store);
        orchestrator.register_strategy(Box::new(probe));
        orchestrator.plan_placement(&user_request()).unwrap();

        let seen = probe.seen_avoid.lock().unwrap().clone().unwrap();
        assert!(seen.avoids_pod(11));
        assert!(seen.avoids_host(32));
        assert!(!seen.avoids_pod(12));
    }

    #[test]
    fn protection_skipped_for_explicit_and_system_vms() {
        let store = seeded();
        let registry = DedicationRegistry::new(store.clone());
        registry.dedicate(ResourceLevel::Pod, 11, 2, None).unwrap();

        let probe: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("probe", true, Some(destination(31)))));

        let mut orchestrator = PlacementOrchestrator::new(store);
        orchestrator.register_strategy(Box::new(probe));

        let mut request = user_request();
        request.vm_kind = VmKind::System;
        orchestrator.plan_placement(&request).unwrap();

        let seen = probe.seen_avoid.lock().unwrap().clone().unwrap();
        assert!(!seen.avoids_pod(11));
    }

    #[test]
    fn dedicated_zone_rejects_non_dedicated_workload() {
        let store = seeded();
        let registry = DedicationRegistry::new(store.clone());
        registry.dedicate(ResourceLevel::Zone, 1, 2, None).unwrap();

        let probe: &'static ScriptedStrategy =
            Box::leak(Box::new(ScriptedStrategy::new("probe", true, Some(destination(31)))));

        let mut orchestrator = PlacementOrchestrator::new(store);
        orchestrator.register_strategy(Box::new(probe));

        // Even the zone owner's own account is rejected without the
        // explicit-dedication flag.
        let err = orchestrator.plan_placement(&user_request()).unwrap_err();
        assert!(matches!(
            err,
            PlacementError::DedicatedZoneRejectsNonDedicated(_)
        ));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn from_config_rejects_unknown_strategy() {
        let store = seeded();
        let capacity = Arc::new(crate::strategy::StoreOrderCapacity::new(store.clone()));
        let config = PlacementConfig {
            strategies: vec!["no-such-strategy".to_string()],
            protect_dedicated: None,
        };

        let err = PlacementOrchestrator::from_config(store, capacity, &config).unwrap_err();
        assert!(matches!(err, PlacementError::UnknownStrategy(_)));
    }
}
