//! Affinity processors — per-request avoid-set contributors.
//!
//! Processors run before any strategy, in registration order, each adding
//! exclusions to the shared avoid set. The set is threaded through the
//! chain as a plain mutable value; no processor sees anything but the
//! accumulated result of the ones before it.

use std::collections::HashSet;

use tracing::debug;

use berth_core::{AvoidSet, DomainId, PlacementRequest, ResourceLevel};
use berth_dedication::{ConstraintResolver, grants_owner};
use berth_state::StateStore;

use crate::error::{PlacementError, PlacementResult};

/// One stage of the affinity chain.
pub trait AffinityProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Add exclusions for this request. A processor that does not apply to
    /// the request must leave the set untouched.
    fn process(&self, request: &PlacementRequest, avoid: &mut AvoidSet) -> PlacementResult<()>;
}

/// Narrows explicit-dedication workloads to the resources their owner was
/// granted, by unioning the resolver's avoid set into the request's.
pub struct ExplicitDedicationProcessor {
    state: StateStore,
    resolver: ConstraintResolver,
}

impl ExplicitDedicationProcessor {
    pub fn new(state: StateStore) -> Self {
        let resolver = ConstraintResolver::new(state.clone());
        Self { state, resolver }
    }
}

impl AffinityProcessor for ExplicitDedicationProcessor {
    fn name(&self) -> &'static str {
        "explicit-dedication"
    }

    fn process(&self, request: &PlacementRequest, avoid: &mut AvoidSet) -> PlacementResult<()> {
        if !request.explicit_dedication {
            return Ok(());
        }

        // A dedicated zone is all-or-nothing: either the owner may use the
        // whole zone, or the request cannot be served here at all.
        if let Some(zone_record) = self
            .state
            .find_dedication(ResourceLevel::Zone, request.zone_id)?
        {
            let owner_ancestors: HashSet<DomainId> = self
                .state
                .ancestor_domains(request.domain_id)?
                .iter()
                .map(|d| d.id)
                .collect();
            if !grants_owner(&zone_record, Some(request.account_id), &owner_ancestors) {
                return Err(PlacementError::ExplicitDedicationConflict(format!(
                    "zone {} is dedicated to domain {}",
                    request.zone_id, zone_record.domain_id
                )));
            }
            debug!(
                vm = request.vm_id,
                zone = request.zone_id,
                "zone wholly granted to the requesting owner"
            );
            return Ok(());
        }

        let resolved =
            self.resolver
                .resolve_avoid_set(request.zone_id, request.domain_id, request.account_id)?;
        debug!(
            vm = request.vm_id,
            pods = resolved.pods.len(),
            clusters = resolved.clusters.len(),
            hosts = resolved.hosts.len(),
            "explicit dedication exclusions applied"
        );
        avoid.union_with(&resolved);
        Ok(())
    }
}
