//! StateStore — redb-backed persistence for the Berth control plane.
//!
//! Holds the physical inventory, the ownership tree, and dedication
//! records. Three access paths:
//!
//! - [`StateStore`] — convenience point reads/writes, one transaction each.
//! - [`Snapshot`] — a single read transaction for multi-query reads that
//!   must observe one consistent state (the constraint resolver).
//! - [`DedicationTxn`] — a write transaction for one dedicate/release
//!   operation; redb has a single writer, so the whole validate-then-persist
//!   sequence is serializable and no concurrent dedicate can interleave
//!   with the conflict checks.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use berth_core::{
    Account, AccountId, Cluster, ClusterId, DedicationRecord, Domain, DomainId, Host, HostId,
    Pod, PodId, ResourceLevel, Zone, ZoneId,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Composite key for the dedications table: `{level}/{resource_id}`.
pub fn dedication_key(level: ResourceLevel, resource_id: u64) -> String {
    format!("{level}/{resource_id}")
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn read_row<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    key: u64,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

/// Scan a u64-keyed table in key order, keeping rows matching the predicate.
fn scan_rows<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    mut keep: impl FnMut(&T) -> bool,
) -> StateResult<Vec<T>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let row: T = decode(value.value())?;
        if keep(&row) {
            results.push(row);
        }
    }
    Ok(results)
}

fn read_dedication(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    level: ResourceLevel,
    resource_id: u64,
) -> StateResult<Option<DedicationRecord>> {
    let key = dedication_key(level, resource_id);
    match table.get(key.as_str()).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_dedications(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    mut keep: impl FnMut(&DedicationRecord) -> bool,
) -> StateResult<Vec<DedicationRecord>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let record: DedicationRecord = decode(value.value())?;
        if keep(&record) {
            results.push(record);
        }
    }
    Ok(results)
}

/// Iterative parent-pointer walk from `start` to the root, inclusive.
///
/// A revisited domain id means the tree has a cycle; that is a
/// data-integrity fault and aborts the walk.
fn walk_ancestors(
    table: &impl ReadableTable<u64, &'static [u8]>,
    start: DomainId,
) -> StateResult<Vec<Domain>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor = Some(start);
    while let Some(id) = cursor {
        if !seen.insert(id) {
            return Err(StateError::Corrupt(format!(
                "cycle in domain tree at domain {id}"
            )));
        }
        let domain: Domain = read_row(table, id)?
            .ok_or_else(|| StateError::NotFound(format!("domain {id}")))?;
        cursor = domain.parent_id;
        chain.push(domain);
    }
    Ok(chain)
}

/// Iterative BFS over the children adjacency of the domain tree, from
/// `start` downward, inclusive. Cycle-safe like [`walk_ancestors`].
fn walk_descendants(
    table: &impl ReadableTable<u64, &'static [u8]>,
    start: DomainId,
) -> StateResult<Vec<Domain>> {
    let root: Domain = read_row(table, start)?
        .ok_or_else(|| StateError::NotFound(format!("domain {start}")))?;

    let mut children: HashMap<DomainId, Vec<Domain>> = HashMap::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let domain: Domain = decode(value.value())?;
        if let Some(parent) = domain.parent_id {
            children.entry(parent).or_default().push(domain);
        }
    }

    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([root]);
    let mut result = Vec::new();
    while let Some(domain) = queue.pop_front() {
        let id = domain.id;
        result.push(domain);
        if let Some(kids) = children.remove(&id) {
            for kid in kids {
                if !seen.insert(kid.id) {
                    return Err(StateError::Corrupt(format!(
                        "cycle in domain tree at domain {}",
                        kid.id
                    )));
                }
                queue.push_back(kid);
            }
        }
    }
    Ok(result)
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ZONES).map_err(map_err!(Table))?;
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        txn.open_table(HOSTS).map_err(map_err!(Table))?;
        txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// A consistent read snapshot of the whole store.
    pub fn snapshot(&self) -> StateResult<Snapshot> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(Snapshot { txn })
    }

    /// Start an atomic dedication write. All reads done through the returned
    /// transaction see a state no concurrent writer can change before
    /// [`DedicationTxn::commit`].
    pub fn begin_dedication(&self) -> StateResult<DedicationTxn> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        Ok(DedicationTxn { txn })
    }

    fn put_row<T: Serialize>(
        &self,
        table_def: redb::TableDefinition<'static, u64, &'static [u8]>,
        key: u64,
        row: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn require_row<T: DeserializeOwned>(
        &self,
        table_def: redb::TableDefinition<'static, u64, &'static [u8]>,
        key: u64,
        what: &str,
    ) -> StateResult<T> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        read_row(&table, key)?.ok_or_else(|| StateError::NotFound(format!("{what} {key}")))
    }

    // ── Inventory writes ───────────────────────────────────────────

    pub fn put_zone(&self, zone: &Zone) -> StateResult<()> {
        self.put_row(ZONES, zone.id, zone)?;
        debug!(zone = zone.id, "zone stored");
        Ok(())
    }

    pub fn put_pod(&self, pod: &Pod) -> StateResult<()> {
        self.require_row::<Zone>(ZONES, pod.zone_id, "zone")?;
        self.put_row(PODS, pod.id, pod)?;
        debug!(pod = pod.id, zone = pod.zone_id, "pod stored");
        Ok(())
    }

    pub fn put_cluster(&self, cluster: &Cluster) -> StateResult<()> {
        let pod = self.require_row::<Pod>(PODS, cluster.pod_id, "pod")?;
        if pod.zone_id != cluster.zone_id {
            return Err(StateError::Corrupt(format!(
                "cluster {} claims zone {} but pod {} is in zone {}",
                cluster.id, cluster.zone_id, pod.id, pod.zone_id
            )));
        }
        self.put_row(CLUSTERS, cluster.id, cluster)?;
        debug!(cluster = cluster.id, pod = cluster.pod_id, "cluster stored");
        Ok(())
    }

    pub fn put_host(&self, host: &Host) -> StateResult<()> {
        let cluster = self.require_row::<Cluster>(CLUSTERS, host.cluster_id, "cluster")?;
        if cluster.pod_id != host.pod_id || cluster.zone_id != host.zone_id {
            return Err(StateError::Corrupt(format!(
                "host {} claims pod {}/zone {} but cluster {} is in pod {}/zone {}",
                host.id, host.pod_id, host.zone_id, cluster.id, cluster.pod_id, cluster.zone_id
            )));
        }
        self.put_row(HOSTS, host.id, host)?;
        debug!(host = host.id, cluster = host.cluster_id, "host stored");
        Ok(())
    }

    pub fn put_domain(&self, domain: &Domain) -> StateResult<()> {
        if let Some(parent) = domain.parent_id {
            self.require_row::<Domain>(DOMAINS, parent, "domain")?;
        }
        self.put_row(DOMAINS, domain.id, domain)?;
        debug!(domain = domain.id, "domain stored");
        Ok(())
    }

    pub fn put_account(&self, account: &Account) -> StateResult<()> {
        self.require_row::<Domain>(DOMAINS, account.domain_id, "domain")?;
        self.put_row(ACCOUNTS, account.id, account)?;
        debug!(account = account.id, domain = account.domain_id, "account stored");
        Ok(())
    }

    // ── Point reads (one snapshot each) ────────────────────────────

    pub fn get_zone(&self, id: ZoneId) -> StateResult<Option<Zone>> {
        self.snapshot()?.get_zone(id)
    }

    pub fn get_pod(&self, id: PodId) -> StateResult<Option<Pod>> {
        self.snapshot()?.get_pod(id)
    }

    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<Cluster>> {
        self.snapshot()?.get_cluster(id)
    }

    pub fn get_host(&self, id: HostId) -> StateResult<Option<Host>> {
        self.snapshot()?.get_host(id)
    }

    pub fn get_domain(&self, id: DomainId) -> StateResult<Option<Domain>> {
        self.snapshot()?.get_domain(id)
    }

    pub fn get_account(&self, id: AccountId) -> StateResult<Option<Account>> {
        self.snapshot()?.get_account(id)
    }

    pub fn list_zones(&self) -> StateResult<Vec<Zone>> {
        self.snapshot()?.list_zones()
    }

    pub fn list_domains(&self) -> StateResult<Vec<Domain>> {
        self.snapshot()?.list_domains()
    }

    pub fn pods_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Pod>> {
        self.snapshot()?.pods_of_zone(zone_id)
    }

    pub fn clusters_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Cluster>> {
        self.snapshot()?.clusters_of_zone(zone_id)
    }

    pub fn clusters_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Cluster>> {
        self.snapshot()?.clusters_of_pod(pod_id)
    }

    pub fn hosts_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Host>> {
        self.snapshot()?.hosts_of_zone(zone_id)
    }

    pub fn hosts_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Host>> {
        self.snapshot()?.hosts_of_pod(pod_id)
    }

    pub fn hosts_of_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Host>> {
        self.snapshot()?.hosts_of_cluster(cluster_id)
    }

    pub fn implicit_pool_pods(&self) -> StateResult<Vec<Pod>> {
        self.snapshot()?.implicit_pool_pods()
    }

    pub fn implicit_pool_clusters(&self) -> StateResult<Vec<Cluster>> {
        self.snapshot()?.implicit_pool_clusters()
    }

    pub fn ancestor_domains(&self, domain_id: DomainId) -> StateResult<Vec<Domain>> {
        self.snapshot()?.ancestor_domains(domain_id)
    }

    pub fn descendant_domains(&self, domain_id: DomainId) -> StateResult<Vec<Domain>> {
        self.snapshot()?.descendant_domains(domain_id)
    }

    pub fn find_dedication(
        &self,
        level: ResourceLevel,
        resource_id: u64,
    ) -> StateResult<Option<DedicationRecord>> {
        self.snapshot()?.find_dedication(level, resource_id)
    }

    pub fn list_dedications(&self) -> StateResult<Vec<DedicationRecord>> {
        self.snapshot()?.list_dedications()
    }

    pub fn dedications_for_domain(&self, domain_id: DomainId) -> StateResult<Vec<DedicationRecord>> {
        self.snapshot()?.dedications_for_domain(domain_id)
    }

    pub fn dedications_for_account(
        &self,
        account_id: AccountId,
    ) -> StateResult<Vec<DedicationRecord>> {
        self.snapshot()?.dedications_for_account(account_id)
    }
}

/// A read transaction: every query sees the same committed state, no matter
/// how many writers commit in the meantime.
pub struct Snapshot {
    txn: redb::ReadTransaction,
}

impl Snapshot {
    pub fn get_zone(&self, id: ZoneId) -> StateResult<Option<Zone>> {
        let table = self.txn.open_table(ZONES).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_pod(&self, id: PodId) -> StateResult<Option<Pod>> {
        let table = self.txn.open_table(PODS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_host(&self, id: HostId) -> StateResult<Option<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_domain(&self, id: DomainId) -> StateResult<Option<Domain>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_account(&self, id: AccountId) -> StateResult<Option<Account>> {
        let table = self.txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn list_zones(&self) -> StateResult<Vec<Zone>> {
        let table = self.txn.open_table(ZONES).map_err(map_err!(Table))?;
        scan_rows(&table, |_: &Zone| true)
    }

    pub fn list_domains(&self) -> StateResult<Vec<Domain>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        scan_rows(&table, |_: &Domain| true)
    }

    /// Pods of a zone, ordered by id.
    pub fn pods_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Pod>> {
        let table = self.txn.open_table(PODS).map_err(map_err!(Table))?;
        scan_rows(&table, |p: &Pod| p.zone_id == zone_id)
    }

    /// Clusters of a zone, ordered by id.
    pub fn clusters_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_rows(&table, |c: &Cluster| c.zone_id == zone_id)
    }

    /// Clusters of a pod, ordered by id.
    pub fn clusters_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_rows(&table, |c: &Cluster| c.pod_id == pod_id)
    }

    /// Hosts of a zone, ordered by id.
    pub fn hosts_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.zone_id == zone_id)
    }

    /// Hosts of a pod, ordered by id.
    pub fn hosts_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.pod_id == pod_id)
    }

    /// Hosts of a cluster, ordered by id.
    pub fn hosts_of_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.cluster_id == cluster_id)
    }

    /// All pods carrying the implicit-dedication pool tag, system-wide.
    pub fn implicit_pool_pods(&self) -> StateResult<Vec<Pod>> {
        let table = self.txn.open_table(PODS).map_err(map_err!(Table))?;
        scan_rows(&table, |p: &Pod| p.implicit_pool)
    }

    /// All clusters carrying the implicit-dedication pool tag, system-wide.
    pub fn implicit_pool_clusters(&self) -> StateResult<Vec<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_rows(&table, |c: &Cluster| c.implicit_pool)
    }

    /// Ordered chain from the domain up to the root, inclusive.
    pub fn ancestor_domains(&self, domain_id: DomainId) -> StateResult<Vec<Domain>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        walk_ancestors(&table, domain_id)
    }

    /// Every domain reachable downward from the given one, inclusive.
    pub fn descendant_domains(&self, domain_id: DomainId) -> StateResult<Vec<Domain>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        walk_descendants(&table, domain_id)
    }

    /// The record owning a resource, if any.
    pub fn find_dedication(
        &self,
        level: ResourceLevel,
        resource_id: u64,
    ) -> StateResult<Option<DedicationRecord>> {
        let table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        read_dedication(&table, level, resource_id)
    }

    pub fn list_dedications(&self) -> StateResult<Vec<DedicationRecord>> {
        let table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        scan_dedications(&table, |_| true)
    }

    /// Domain-level grants for a domain (account-narrowed records excluded).
    pub fn dedications_for_domain(&self, domain_id: DomainId) -> StateResult<Vec<DedicationRecord>> {
        let table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        scan_dedications(&table, |r| {
            r.domain_id == domain_id && r.account_id.is_none()
        })
    }

    /// Account-narrowed grants for an account.
    pub fn dedications_for_account(
        &self,
        account_id: AccountId,
    ) -> StateResult<Vec<DedicationRecord>> {
        let table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        scan_dedications(&table, |r| r.account_id == Some(account_id))
    }
}

/// A write transaction scoped to one dedicate/release operation.
///
/// Dropping the transaction without committing rolls everything back, so a
/// failed conflict check never leaves a partial record behind.
pub struct DedicationTxn {
    txn: redb::WriteTransaction,
}

impl DedicationTxn {
    pub fn get_zone(&self, id: ZoneId) -> StateResult<Option<Zone>> {
        let table = self.txn.open_table(ZONES).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_pod(&self, id: PodId) -> StateResult<Option<Pod>> {
        let table = self.txn.open_table(PODS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_cluster(&self, id: ClusterId) -> StateResult<Option<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_host(&self, id: HostId) -> StateResult<Option<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_domain(&self, id: DomainId) -> StateResult<Option<Domain>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn get_account(&self, id: AccountId) -> StateResult<Option<Account>> {
        let table = self.txn.open_table(ACCOUNTS).map_err(map_err!(Table))?;
        read_row(&table, id)
    }

    pub fn pods_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Pod>> {
        let table = self.txn.open_table(PODS).map_err(map_err!(Table))?;
        scan_rows(&table, |p: &Pod| p.zone_id == zone_id)
    }

    pub fn clusters_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_rows(&table, |c: &Cluster| c.zone_id == zone_id)
    }

    pub fn clusters_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Cluster>> {
        let table = self.txn.open_table(CLUSTERS).map_err(map_err!(Table))?;
        scan_rows(&table, |c: &Cluster| c.pod_id == pod_id)
    }

    pub fn hosts_of_zone(&self, zone_id: ZoneId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.zone_id == zone_id)
    }

    pub fn hosts_of_pod(&self, pod_id: PodId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.pod_id == pod_id)
    }

    pub fn hosts_of_cluster(&self, cluster_id: ClusterId) -> StateResult<Vec<Host>> {
        let table = self.txn.open_table(HOSTS).map_err(map_err!(Table))?;
        scan_rows(&table, |h: &Host| h.cluster_id == cluster_id)
    }

    pub fn ancestor_domain_ids(&self, domain_id: DomainId) -> StateResult<Vec<DomainId>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        Ok(walk_ancestors(&table, domain_id)?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }

    pub fn descendant_domain_ids(&self, domain_id: DomainId) -> StateResult<Vec<DomainId>> {
        let table = self.txn.open_table(DOMAINS).map_err(map_err!(Table))?;
        Ok(walk_descendants(&table, domain_id)?
            .into_iter()
            .map(|d| d.id)
            .collect())
    }

    pub fn find_dedication(
        &self,
        level: ResourceLevel,
        resource_id: u64,
    ) -> StateResult<Option<DedicationRecord>> {
        let table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        read_dedication(&table, level, resource_id)
    }

    /// Allocate the next dedication record id from the persisted sequence.
    pub fn next_dedication_id(&self) -> StateResult<u64> {
        let mut table = self.txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        let next = table
            .get("dedication_id")
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0)
            + 1;
        table
            .insert("dedication_id", next)
            .map_err(map_err!(Write))?;
        Ok(next)
    }

    pub fn insert_dedication(&self, record: &DedicationRecord) -> StateResult<()> {
        let key = dedication_key(record.level, record.resource_id);
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
        Ok(())
    }

    /// Remove the record owning a resource. Returns true if one existed.
    pub fn remove_dedication(
        &self,
        level: ResourceLevel,
        resource_id: u64,
    ) -> StateResult<bool> {
        let key = dedication_key(level, resource_id);
        let mut table = self.txn.open_table(DEDICATIONS).map_err(map_err!(Table))?;
        let existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    pub fn commit(self) -> StateResult<()> {
        self.txn.commit().map_err(map_err!(Transaction))
    }
}
