//! DedicationRegistry — conflict-checked creation and release of grants.
//!
//! Every dedicate runs four checks before persisting, all inside one write
//! transaction so a concurrent dedicate on an overlapping subtree cannot
//! slip between validation and commit:
//!
//! 1. the target resource, owner domain, and (if given) account exist and
//!    agree with each other;
//! 2. the resource itself carries no record yet;
//! 3. walking upward to the zone, every already-dedicated ancestor admits
//!    the new owner (refinement only);
//! 4. walking downward to the hosts, every already-dedicated descendant is
//!    owned within the new owner's domain subtree.

use std::collections::HashSet;

use tracing::{debug, info};

use berth_core::{
    AccountId, DedicationRecord, DomainId, HostKind, ResourceLevel,
};
use berth_state::{DedicationTxn, StateStore};

use crate::error::{DedicationError, DedicationResult};

/// Filter for listing dedication records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedicationFilter {
    All,
    ByDomain(DomainId),
    ByAccount(AccountId),
    ByLevel(ResourceLevel),
    ByResource(ResourceLevel, u64),
}

/// Shared, persistent set of dedication records.
#[derive(Clone)]
pub struct DedicationRegistry {
    state: StateStore,
}

impl DedicationRegistry {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Dedicate a resource (and everything beneath it) to a domain,
    /// optionally narrowed to one account of that domain.
    pub fn dedicate(
        &self,
        level: ResourceLevel,
        resource_id: u64,
        domain_id: DomainId,
        account_id: Option<AccountId>,
    ) -> DedicationResult<DedicationRecord> {
        let txn = self.state.begin_dedication()?;

        let ancestors = validate_target(&txn, level, resource_id)?;
        validate_owner(&txn, domain_id, account_id)?;

        if txn.find_dedication(level, resource_id)?.is_some() {
            return Err(DedicationError::AlreadyDedicated(format!(
                "{level} {resource_id} is already dedicated"
            )));
        }

        let owner_ancestors: HashSet<DomainId> =
            txn.ancestor_domain_ids(domain_id)?.into_iter().collect();
        let owner_descendants: HashSet<DomainId> =
            txn.descendant_domain_ids(domain_id)?.into_iter().collect();

        // Upward walk: refinement of an existing broader grant only.
        for (anc_level, anc_id) in ancestors {
            if let Some(anc) = txn.find_dedication(anc_level, anc_id)? {
                if !ancestor_admits(&anc, domain_id, account_id, &owner_ancestors) {
                    debug!(
                        level = %anc.level,
                        resource = anc.resource_id,
                        owner = anc.domain_id,
                        "ancestor dedication blocks the request"
                    );
                    return Err(DedicationError::ConflictWithAncestor(format!(
                        "{} {} is already dedicated to domain {}",
                        anc.level, anc.resource_id, anc.domain_id
                    )));
                }
            }
        }

        // Downward walk: existing narrower grants must sit inside the new
        // owner's domain subtree.
        for (desc_level, desc_id) in descendant_resources(&txn, level, resource_id)? {
            if let Some(desc) = txn.find_dedication(desc_level, desc_id)? {
                if !owner_descendants.contains(&desc.domain_id) {
                    debug!(
                        level = %desc.level,
                        resource = desc.resource_id,
                        owner = desc.domain_id,
                        "descendant dedication blocks the request"
                    );
                    return Err(DedicationError::ConflictWithDescendant(format!(
                        "{} {} under this {} is dedicated to domain {}",
                        desc.level, desc.resource_id, level, desc.domain_id
                    )));
                }
            }
        }

        let record = DedicationRecord {
            id: txn.next_dedication_id()?,
            level,
            resource_id,
            domain_id,
            account_id,
        };
        txn.insert_dedication(&record)?;
        txn.commit()?;

        info!(
            record = record.id,
            level = %level,
            resource = resource_id,
            domain = domain_id,
            account = ?account_id,
            "resource dedicated"
        );
        Ok(record)
    }

    /// Release a dedicated resource. Releasing a resource that carries no
    /// record is an error, not a no-op.
    pub fn release(&self, level: ResourceLevel, resource_id: u64) -> DedicationResult<()> {
        let txn = self.state.begin_dedication()?;
        if txn.find_dedication(level, resource_id)?.is_none() {
            return Err(DedicationError::NotDedicated(format!(
                "{level} {resource_id} is not dedicated"
            )));
        }
        txn.remove_dedication(level, resource_id)?;
        txn.commit()?;

        info!(level = %level, resource = resource_id, "dedication released");
        Ok(())
    }

    /// The record owning a resource, if any.
    pub fn find_owning(
        &self,
        level: ResourceLevel,
        resource_id: u64,
    ) -> DedicationResult<Option<DedicationRecord>> {
        Ok(self.state.find_dedication(level, resource_id)?)
    }

    /// Domain-level grants for a domain, optionally including grants held by
    /// its ancestor domains.
    pub fn list_for_domain(
        &self,
        domain_id: DomainId,
        include_ancestors: bool,
    ) -> DedicationResult<Vec<DedicationRecord>> {
        let snapshot = self.state.snapshot()?;
        let mut records = snapshot.dedications_for_domain(domain_id)?;
        if include_ancestors {
            for ancestor in snapshot.ancestor_domains(domain_id)?.iter().skip(1) {
                records.extend(snapshot.dedications_for_domain(ancestor.id)?);
            }
        }
        Ok(records)
    }

    /// Account-narrowed grants for an account.
    pub fn list_for_account(
        &self,
        account_id: AccountId,
    ) -> DedicationResult<Vec<DedicationRecord>> {
        Ok(self.state.dedications_for_account(account_id)?)
    }

    /// List records matching a filter.
    pub fn list(&self, filter: DedicationFilter) -> DedicationResult<Vec<DedicationRecord>> {
        let all = self.state.list_dedications()?;
        let records = match filter {
            DedicationFilter::All => all,
            DedicationFilter::ByDomain(domain_id) => all
                .into_iter()
                .filter(|r| r.domain_id == domain_id)
                .collect(),
            DedicationFilter::ByAccount(account_id) => all
                .into_iter()
                .filter(|r| r.account_id == Some(account_id))
                .collect(),
            DedicationFilter::ByLevel(level) => {
                all.into_iter().filter(|r| r.level == level).collect()
            }
            DedicationFilter::ByResource(level, resource_id) => all
                .into_iter()
                .filter(|r| r.level == level && r.resource_id == resource_id)
                .collect(),
        };
        Ok(records)
    }
}

/// Check the target exists (and is dedicable) and return its ancestor
/// resources, from the immediate parent up to the zone.
fn validate_target(
    txn: &DedicationTxn,
    level: ResourceLevel,
    resource_id: u64,
) -> DedicationResult<Vec<(ResourceLevel, u64)>> {
    match level {
        ResourceLevel::Zone => {
            txn.get_zone(resource_id)?.ok_or_else(|| {
                DedicationError::InvalidTarget(format!("zone {resource_id} does not exist"))
            })?;
            Ok(Vec::new())
        }
        ResourceLevel::Pod => {
            let pod = txn.get_pod(resource_id)?.ok_or_else(|| {
                DedicationError::InvalidTarget(format!("pod {resource_id} does not exist"))
            })?;
            Ok(vec![(ResourceLevel::Zone, pod.zone_id)])
        }
        ResourceLevel::Cluster => {
            let cluster = txn.get_cluster(resource_id)?.ok_or_else(|| {
                DedicationError::InvalidTarget(format!("cluster {resource_id} does not exist"))
            })?;
            if !cluster.allocation_enabled {
                return Err(DedicationError::InvalidTarget(format!(
                    "cluster {resource_id} is disabled for allocation"
                )));
            }
            Ok(vec![
                (ResourceLevel::Pod, cluster.pod_id),
                (ResourceLevel::Zone, cluster.zone_id),
            ])
        }
        ResourceLevel::Host => {
            let host = txn.get_host(resource_id)?.ok_or_else(|| {
                DedicationError::InvalidTarget(format!("host {resource_id} does not exist"))
            })?;
            if host.kind != HostKind::Routing {
                return Err(DedicationError::InvalidTarget(format!(
                    "host {resource_id} is not a routing host"
                )));
            }
            Ok(vec![
                (ResourceLevel::Cluster, host.cluster_id),
                (ResourceLevel::Pod, host.pod_id),
                (ResourceLevel::Zone, host.zone_id),
            ])
        }
    }
}

fn validate_owner(
    txn: &DedicationTxn,
    domain_id: DomainId,
    account_id: Option<AccountId>,
) -> DedicationResult<()> {
    if txn.get_domain(domain_id)?.is_none() {
        return Err(DedicationError::InvalidTarget(format!(
            "domain {domain_id} does not exist"
        )));
    }
    if let Some(account_id) = account_id {
        let account = txn.get_account(account_id)?.ok_or_else(|| {
            DedicationError::InvalidTarget(format!("account {account_id} does not exist"))
        })?;
        if account.domain_id != domain_id {
            return Err(DedicationError::InvalidTarget(format!(
                "account {account_id} belongs to domain {}, not domain {domain_id}",
                account.domain_id
            )));
        }
    }
    Ok(())
}

/// Whether an existing ancestor record admits the requested owner below it.
///
/// An account-narrowed ancestor admits only that same account. A
/// domain-level ancestor admits any strictly-descendant domain, and its own
/// domain only when the request narrows to an account — re-dedicating the
/// same subtree to the same unnarrowed domain is redundant and refused.
fn ancestor_admits(
    anc: &DedicationRecord,
    domain_id: DomainId,
    account_id: Option<AccountId>,
    owner_ancestors: &HashSet<DomainId>,
) -> bool {
    match anc.account_id {
        Some(anc_account) => account_id == Some(anc_account),
        None => {
            if anc.domain_id == domain_id {
                account_id.is_some()
            } else {
                owner_ancestors.contains(&anc.domain_id)
            }
        }
    }
}

/// All resources beneath the given one, with their levels.
fn descendant_resources(
    txn: &DedicationTxn,
    level: ResourceLevel,
    resource_id: u64,
) -> DedicationResult<Vec<(ResourceLevel, u64)>> {
    let mut result = Vec::new();
    match level {
        ResourceLevel::Zone => {
            result.extend(
                txn.pods_of_zone(resource_id)?
                    .iter()
                    .map(|p| (ResourceLevel::Pod, p.id)),
            );
            result.extend(
                txn.clusters_of_zone(resource_id)?
                    .iter()
                    .map(|c| (ResourceLevel::Cluster, c.id)),
            );
            result.extend(
                txn.hosts_of_zone(resource_id)?
                    .iter()
                    .map(|h| (ResourceLevel::Host, h.id)),
            );
        }
        ResourceLevel::Pod => {
            result.extend(
                txn.clusters_of_pod(resource_id)?
                    .iter()
                    .map(|c| (ResourceLevel::Cluster, c.id)),
            );
            result.extend(
                txn.hosts_of_pod(resource_id)?
                    .iter()
                    .map(|h| (ResourceLevel::Host, h.id)),
            );
        }
        ResourceLevel::Cluster => {
            result.extend(
                txn.hosts_of_cluster(resource_id)?
                    .iter()
                    .map(|h| (ResourceLevel::Host, h.id)),
            );
        }
        ResourceLevel::Host => {}
    }
    Ok(result)
}
