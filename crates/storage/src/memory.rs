//! In-memory `CaseStorage` backend.
//!
//! Committed tables sit behind one async mutex. A snapshot stages its
//! writes as an overlay (`Some` = upsert, `None` = delete) and pins the
//! version of every case instance it reads or writes. `commit_snapshot`
//! re-checks the pinned versions and applies the whole overlay under the
//! lock, so runtime and historic writes of one snapshot become visible
//! together.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::filter::{HistoricCaseInstanceFilter, HistoricPlanItemInstanceFilter};
use crate::record::{
    CaseInstanceRecord, HistoricCaseInstanceRecord, HistoricIdentityLinkRecord,
    HistoricPlanItemInstanceRecord, IdentityLinkRecord, PlanItemInstanceRecord, TransitionRecord,
};
use crate::traits::CaseStorage;

#[derive(Debug, Default)]
struct Tables {
    cases: BTreeMap<String, CaseInstanceRecord>,
    plan_items: BTreeMap<String, PlanItemInstanceRecord>,
    transitions: BTreeMap<String, Vec<TransitionRecord>>,
    links: BTreeMap<String, IdentityLinkRecord>,
    historic_cases: BTreeMap<String, HistoricCaseInstanceRecord>,
    historic_plan_items: BTreeMap<String, HistoricPlanItemInstanceRecord>,
    historic_links: Vec<HistoricIdentityLinkRecord>,
}

/// In-memory storage for tests, embedding and development.
#[derive(Debug, Default)]
pub struct InMemoryCaseStorage {
    tables: Mutex<Tables>,
    next_snapshot: AtomicU64,
}

impl InMemoryCaseStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Staged writes of one in-memory transaction.
#[derive(Debug, Default)]
pub struct InMemorySnapshot {
    id: u64,
    /// Committed version each touched case instance must still have at
    /// commit. `None` means the case must not exist.
    pinned: BTreeMap<String, Option<i64>>,
    cases: BTreeMap<String, Option<CaseInstanceRecord>>,
    plan_items: BTreeMap<String, Option<PlanItemInstanceRecord>>,
    transitions: Vec<TransitionRecord>,
    deleted_cases: BTreeSet<String>,
    links: BTreeMap<String, Option<IdentityLinkRecord>>,
    historic_cases: BTreeMap<String, HistoricCaseInstanceRecord>,
    historic_plan_items: BTreeMap<String, HistoricPlanItemInstanceRecord>,
    historic_links: Vec<HistoricIdentityLinkRecord>,
}

impl InMemorySnapshot {
    fn current_case(&self, tables: &Tables, id: &str) -> Option<CaseInstanceRecord> {
        match self.cases.get(id) {
            Some(staged) => staged.clone(),
            None => tables.cases.get(id).cloned(),
        }
    }

    fn pin(&mut self, tables: &Tables, id: &str) {
        let committed = tables.cases.get(id).map(|c| c.version);
        self.pinned.entry(id.to_string()).or_insert(committed);
    }

    fn current_plan_items(&self, tables: &Tables, case_id: &str) -> Vec<PlanItemInstanceRecord> {
        merge_overlay(&tables.plan_items, &self.plan_items, |p| {
            p.case_instance_id == case_id
        })
    }

    fn current_links(&self, tables: &Tables, case_id: &str) -> Vec<IdentityLinkRecord> {
        merge_overlay(&tables.links, &self.links, |l| l.case_instance_id == case_id)
    }
}

/// Committed rows overlaid with staged upserts and deletes.
fn merge_overlay<T: Clone>(
    committed: &BTreeMap<String, T>,
    staged: &BTreeMap<String, Option<T>>,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut rows: BTreeMap<&String, &T> = committed.iter().filter(|(_, v)| keep(v)).collect();
    for (id, value) in staged {
        match value {
            Some(v) if keep(v) => {
                rows.insert(id, v);
            }
            _ => {
                rows.remove(id);
            }
        }
    }
    rows.into_values().cloned().collect()
}

fn apply_overlay<T>(committed: &mut BTreeMap<String, T>, staged: BTreeMap<String, Option<T>>) {
    for (id, value) in staged {
        match value {
            Some(v) => {
                committed.insert(id, v);
            }
            None => {
                committed.remove(&id);
            }
        }
    }
}

fn not_found(id: &str) -> StorageError {
    StorageError::CaseInstanceNotFound {
        case_instance_id: id.to_string(),
    }
}

#[async_trait]
impl CaseStorage for InMemoryCaseStorage {
    type Snapshot = InMemorySnapshot;

    async fn begin_snapshot(&self) -> Result<InMemorySnapshot, StorageError> {
        Ok(InMemorySnapshot {
            id: self.next_snapshot.fetch_add(1, Ordering::Relaxed),
            ..Default::default()
        })
    }

    async fn commit_snapshot(&self, snapshot: InMemorySnapshot) -> Result<(), StorageError> {
        let mut tables = self.tables.lock().await;

        for (id, pinned) in &snapshot.pinned {
            let current = tables.cases.get(id).map(|c| c.version);
            if current != *pinned {
                return Err(match pinned {
                    None => StorageError::CaseInstanceAlreadyExists {
                        case_instance_id: id.clone(),
                    },
                    Some(expected) => StorageError::ConcurrentConflict {
                        case_instance_id: id.clone(),
                        expected_version: *expected,
                    },
                });
            }
        }

        let InMemorySnapshot {
            id,
            cases,
            plan_items,
            transitions,
            deleted_cases,
            links,
            historic_cases,
            historic_plan_items,
            historic_links,
            ..
        } = snapshot;

        apply_overlay(&mut tables.cases, cases);
        apply_overlay(&mut tables.plan_items, plan_items);
        apply_overlay(&mut tables.links, links);
        for case_id in &deleted_cases {
            tables.transitions.remove(case_id);
        }
        for t in transitions {
            tables
                .transitions
                .entry(t.case_instance_id.clone())
                .or_default()
                .push(t);
        }
        tables.historic_cases.extend(historic_cases);
        tables.historic_plan_items.extend(historic_plan_items);
        for link in historic_links {
            if !tables.historic_links.iter().any(|l| l.same_key(&link)) {
                tables.historic_links.push(link);
            }
        }

        debug!(snapshot = id, "committed in-memory snapshot");
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: InMemorySnapshot) -> Result<(), StorageError> {
        debug!(snapshot = snapshot.id, "aborted in-memory snapshot");
        Ok(())
    }

    // ── Case instances ───────────────────────────────────────────────────────

    async fn insert_case_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: CaseInstanceRecord,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        if snapshot.current_case(&tables, &record.id).is_some() {
            return Err(StorageError::CaseInstanceAlreadyExists {
                case_instance_id: record.id,
            });
        }
        snapshot.pin(&tables, &record.id);
        snapshot.cases.insert(record.id.clone(), Some(record));
        Ok(())
    }

    async fn get_case_instance_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
    ) -> Result<CaseInstanceRecord, StorageError> {
        let tables = self.tables.lock().await;
        let record = snapshot
            .current_case(&tables, case_instance_id)
            .ok_or_else(|| not_found(case_instance_id))?;
        snapshot.pin(&tables, case_instance_id);
        Ok(record)
    }

    async fn update_case_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        mut record: CaseInstanceRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let tables = self.tables.lock().await;
        let current = snapshot
            .current_case(&tables, &record.id)
            .ok_or_else(|| not_found(&record.id))?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                case_instance_id: record.id,
                expected_version,
            });
        }
        snapshot.pin(&tables, &record.id);
        record.version = expected_version + 1;
        let new_version = record.version;
        snapshot.cases.insert(record.id.clone(), Some(record));
        Ok(new_version)
    }

    async fn delete_case_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
        expected_version: i64,
    ) -> Result<(), StorageError> {
        let tables = self.tables.lock().await;
        let current = snapshot
            .current_case(&tables, case_instance_id)
            .ok_or_else(|| not_found(case_instance_id))?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                case_instance_id: case_instance_id.to_string(),
                expected_version,
            });
        }
        snapshot.pin(&tables, case_instance_id);

        for item in snapshot.current_plan_items(&tables, case_instance_id) {
            snapshot.plan_items.insert(item.id, None);
        }
        for link in snapshot.current_links(&tables, case_instance_id) {
            snapshot.links.insert(link.id, None);
        }
        snapshot
            .transitions
            .retain(|t| t.case_instance_id != case_instance_id);
        snapshot.deleted_cases.insert(case_instance_id.to_string());
        snapshot.cases.insert(case_instance_id.to_string(), None);
        Ok(())
    }

    // ── Plan items, transitions, identity links ──────────────────────────────

    async fn list_plan_item_instances_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(snapshot.current_plan_items(&tables, case_instance_id))
    }

    async fn save_plan_item_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: PlanItemInstanceRecord,
    ) -> Result<(), StorageError> {
        snapshot.plan_items.insert(record.id.clone(), Some(record));
        Ok(())
    }

    async fn list_transitions_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
    ) -> Result<Vec<TransitionRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<TransitionRecord> = if snapshot.deleted_cases.contains(case_instance_id)
        {
            Vec::new()
        } else {
            tables
                .transitions
                .get(case_instance_id)
                .cloned()
                .unwrap_or_default()
        };
        rows.extend(
            snapshot
                .transitions
                .iter()
                .filter(|t| t.case_instance_id == case_instance_id)
                .cloned(),
        );
        rows.sort_by_key(|t| t.seq);
        Ok(rows)
    }

    async fn insert_transition(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: TransitionRecord,
    ) -> Result<(), StorageError> {
        snapshot.transitions.push(record);
        Ok(())
    }

    async fn list_identity_links_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
    ) -> Result<Vec<IdentityLinkRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(snapshot.current_links(&tables, case_instance_id))
    }

    async fn insert_identity_link(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: IdentityLinkRecord,
    ) -> Result<bool, StorageError> {
        let tables = self.tables.lock().await;
        let exists = snapshot
            .current_links(&tables, &record.case_instance_id)
            .iter()
            .any(|l| l.same_key(&record));
        if exists {
            return Ok(false);
        }
        snapshot.links.insert(record.id.clone(), Some(record));
        Ok(true)
    }

    async fn delete_identity_link(
        &self,
        snapshot: &mut InMemorySnapshot,
        link_id: &str,
    ) -> Result<(), StorageError> {
        snapshot.links.insert(link_id.to_string(), None);
        Ok(())
    }

    // ── History ──────────────────────────────────────────────────────────────

    async fn get_historic_case_instance_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        case_instance_id: &str,
    ) -> Result<Option<HistoricCaseInstanceRecord>, StorageError> {
        if let Some(staged) = snapshot.historic_cases.get(case_instance_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = self.tables.lock().await;
        Ok(tables.historic_cases.get(case_instance_id).cloned())
    }

    async fn save_historic_case_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: HistoricCaseInstanceRecord,
    ) -> Result<(), StorageError> {
        snapshot.historic_cases.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get_historic_plan_item_instance_for_update(
        &self,
        snapshot: &mut InMemorySnapshot,
        plan_item_instance_id: &str,
    ) -> Result<Option<HistoricPlanItemInstanceRecord>, StorageError> {
        if let Some(staged) = snapshot.historic_plan_items.get(plan_item_instance_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = self.tables.lock().await;
        Ok(tables.historic_plan_items.get(plan_item_instance_id).cloned())
    }

    async fn save_historic_plan_item_instance(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: HistoricPlanItemInstanceRecord,
    ) -> Result<(), StorageError> {
        snapshot.historic_plan_items.insert(record.id.clone(), record);
        Ok(())
    }

    async fn insert_historic_identity_link(
        &self,
        snapshot: &mut InMemorySnapshot,
        record: HistoricIdentityLinkRecord,
    ) -> Result<bool, StorageError> {
        let tables = self.tables.lock().await;
        let exists = tables
            .historic_links
            .iter()
            .chain(snapshot.historic_links.iter())
            .any(|l| l.same_key(&record));
        if exists {
            return Ok(false);
        }
        snapshot.historic_links.push(record);
        Ok(true)
    }

    // ── Committed reads ──────────────────────────────────────────────────────

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<CaseInstanceRecord, StorageError> {
        let tables = self.tables.lock().await;
        tables
            .cases
            .get(case_instance_id)
            .cloned()
            .ok_or_else(|| not_found(case_instance_id))
    }

    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .plan_items
            .values()
            .filter(|p| p.case_instance_id == case_instance_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_seq);
        Ok(rows)
    }

    async fn list_identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<IdentityLinkRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .links
            .values()
            .filter(|l| l.case_instance_id == case_instance_id)
            .cloned()
            .collect())
    }

    async fn find_historic_case_instances(
        &self,
        filter: &HistoricCaseInstanceFilter,
    ) -> Result<Vec<HistoricCaseInstanceRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let matching = tables
            .historic_cases
            .values()
            .filter(|r| filter.matches(r, &tables.historic_links))
            .cloned()
            .collect();
        Ok(filter.order_and_page(matching))
    }

    async fn count_historic_case_instances(
        &self,
        filter: &HistoricCaseInstanceFilter,
    ) -> Result<usize, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .historic_cases
            .values()
            .filter(|r| filter.matches(r, &tables.historic_links))
            .count())
    }

    async fn find_historic_plan_item_instances(
        &self,
        filter: &HistoricPlanItemInstanceFilter,
    ) -> Result<Vec<HistoricPlanItemInstanceRecord>, StorageError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<_> = tables
            .historic_plan_items
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        HistoricPlanItemInstanceFilter::order(&mut rows);
        Ok(rows)
    }

    async fn count_historic_plan_item_instances(
        &self,
        filter: &HistoricPlanItemInstanceFilter,
    ) -> Result<usize, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .historic_plan_items
            .values()
            .filter(|r| filter.matches(r))
            .count())
    }

    async fn list_historic_identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<HistoricIdentityLinkRecord>, StorageError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .historic_links
            .iter()
            .filter(|l| l.case_instance_id == case_instance_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::fixtures;

    #[tokio::test]
    async fn staged_writes_visible_inside_snapshot_only() {
        let storage = InMemoryCaseStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_case_instance(&mut snap, fixtures::case_instance("c1"))
            .await
            .unwrap();
        assert!(storage
            .get_case_instance_for_update(&mut snap, "c1")
            .await
            .is_ok());
        assert!(storage.get_case_instance("c1").await.is_err());
        storage.commit_snapshot(snap).await.unwrap();
        assert_eq!(storage.get_case_instance("c1").await.unwrap().version, 0);
    }

    #[tokio::test]
    async fn delete_cascades_runtime_but_keeps_history() {
        let storage = InMemoryCaseStorage::new();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .insert_case_instance(&mut snap, fixtures::case_instance("c1"))
            .await
            .unwrap();
        storage
            .save_plan_item_instance(&mut snap, fixtures::plan_item("p1", "c1"))
            .await
            .unwrap();
        storage
            .insert_transition(&mut snap, fixtures::transition("c1", 1, "p1"))
            .await
            .unwrap();
        let link = fixtures::user_link("l1", "c1", "kermit");
        storage
            .insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&link))
            .await
            .unwrap();
        storage
            .insert_identity_link(&mut snap, link)
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let mut snap = storage.begin_snapshot().await.unwrap();
        storage
            .delete_case_instance(&mut snap, "c1", 0)
            .await
            .unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        assert!(storage.get_case_instance("c1").await.is_err());
        assert!(storage.list_plan_item_instances("c1").await.unwrap().is_empty());
        assert!(storage.list_identity_links("c1").await.unwrap().is_empty());
        let mut snap = storage.begin_snapshot().await.unwrap();
        assert!(storage
            .list_transitions_for_update(&mut snap, "c1")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            storage.list_historic_identity_links("c1").await.unwrap().len(),
            1
        );
    }
}
