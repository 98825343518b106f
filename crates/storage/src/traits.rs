use async_trait::async_trait;

use crate::error::StorageError;
use crate::filter::{HistoricCaseInstanceFilter, HistoricPlanItemInstanceFilter};
use crate::record::{
    CaseInstanceRecord, HistoricCaseInstanceRecord, HistoricIdentityLinkRecord,
    HistoricPlanItemInstanceRecord, IdentityLinkRecord, PlanItemInstanceRecord, TransitionRecord,
};

/// The storage trait for casework execution backends.
///
/// A `CaseStorage` implementation provides transactional storage for the
/// runtime state of case instances (case record, plan item instances,
/// transition history, identity links) and for the historic mirror
/// records the query layer reads.
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating and `*_for_update` methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// If a `Snapshot` is dropped without committing, its writes MUST be
/// discarded. Runtime and historic writes staged in one snapshot become
/// visible together or not at all.
///
/// Reads through a snapshot see that snapshot's own staged writes. Reads
/// without a snapshot see committed data only.
///
/// ## OCC Conflict Detection
///
/// `update_case_instance` and `delete_case_instance` check the caller's
/// expected version against the stored one and return
/// `Err(StorageError::ConcurrentConflict { .. })` on mismatch. The check is
/// repeated at commit, so a snapshot that raced with another committed
/// unit of work on the same case instance fails to commit.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so one storage value can
/// be shared by concurrently executing commands.
#[async_trait]
pub trait CaseStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all staged writes visible atomically.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all staged writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Case instances (within snapshot) ─────────────────────────────────────

    /// Insert a new case instance.
    ///
    /// Returns `Err(StorageError::CaseInstanceAlreadyExists)` if the id is taken.
    async fn insert_case_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: CaseInstanceRecord,
    ) -> Result<(), StorageError>;

    /// Read a case instance and pin its version for the commit-time check.
    ///
    /// Returns `Err(StorageError::CaseInstanceNotFound)` if it does not exist.
    async fn get_case_instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
    ) -> Result<CaseInstanceRecord, StorageError>;

    /// Replace a case instance if its stored version equals `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`, which is returned.
    async fn update_case_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: CaseInstanceRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Delete a case instance with all its plan item instances, transitions
    /// and identity links. Historic records are not touched.
    async fn delete_case_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
        expected_version: i64,
    ) -> Result<(), StorageError>;

    // ── Plan items, transitions, identity links (within snapshot) ────────────

    async fn list_plan_item_instances_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError>;

    /// Insert or replace a plan item instance by id.
    async fn save_plan_item_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: PlanItemInstanceRecord,
    ) -> Result<(), StorageError>;

    /// Transitions of a case in ascending sequence order.
    async fn list_transitions_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
    ) -> Result<Vec<TransitionRecord>, StorageError>;

    async fn insert_transition(
        &self,
        snapshot: &mut Self::Snapshot,
        record: TransitionRecord,
    ) -> Result<(), StorageError>;

    /// Case- and task-scoped links of a case instance.
    async fn list_identity_links_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
    ) -> Result<Vec<IdentityLinkRecord>, StorageError>;

    /// Insert a link unless one with the same key exists.
    ///
    /// Returns `true` if a new link was stored.
    async fn insert_identity_link(
        &self,
        snapshot: &mut Self::Snapshot,
        record: IdentityLinkRecord,
    ) -> Result<bool, StorageError>;

    /// Delete a link by id. Deleting a missing link is a no-op.
    async fn delete_identity_link(
        &self,
        snapshot: &mut Self::Snapshot,
        link_id: &str,
    ) -> Result<(), StorageError>;

    // ── History (within snapshot) ────────────────────────────────────────────

    async fn get_historic_case_instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        case_instance_id: &str,
    ) -> Result<Option<HistoricCaseInstanceRecord>, StorageError>;

    /// Insert or replace a historic case instance by id.
    async fn save_historic_case_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: HistoricCaseInstanceRecord,
    ) -> Result<(), StorageError>;

    async fn get_historic_plan_item_instance_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        plan_item_instance_id: &str,
    ) -> Result<Option<HistoricPlanItemInstanceRecord>, StorageError>;

    /// Insert or replace a historic plan item instance by id.
    async fn save_historic_plan_item_instance(
        &self,
        snapshot: &mut Self::Snapshot,
        record: HistoricPlanItemInstanceRecord,
    ) -> Result<(), StorageError>;

    /// Insert a historic link unless one with the same key exists.
    ///
    /// Returns `true` if a new historic link was stored.
    async fn insert_historic_identity_link(
        &self,
        snapshot: &mut Self::Snapshot,
        record: HistoricIdentityLinkRecord,
    ) -> Result<bool, StorageError>;

    // ── Committed reads (no snapshot) ────────────────────────────────────────

    async fn get_case_instance(
        &self,
        case_instance_id: &str,
    ) -> Result<CaseInstanceRecord, StorageError>;

    async fn list_plan_item_instances(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<PlanItemInstanceRecord>, StorageError>;

    async fn list_identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<IdentityLinkRecord>, StorageError>;

    /// Matching historic case instances, ordered and paged per the filter.
    async fn find_historic_case_instances(
        &self,
        filter: &HistoricCaseInstanceFilter,
    ) -> Result<Vec<HistoricCaseInstanceRecord>, StorageError>;

    /// Number of matching historic case instances, ignoring paging.
    async fn count_historic_case_instances(
        &self,
        filter: &HistoricCaseInstanceFilter,
    ) -> Result<usize, StorageError>;

    async fn find_historic_plan_item_instances(
        &self,
        filter: &HistoricPlanItemInstanceFilter,
    ) -> Result<Vec<HistoricPlanItemInstanceRecord>, StorageError>;

    /// Number of matching historic plan item instances.
    async fn count_historic_plan_item_instances(
        &self,
        filter: &HistoricPlanItemInstanceFilter,
    ) -> Result<usize, StorageError>;

    async fn list_historic_identity_links(
        &self,
        case_instance_id: &str,
    ) -> Result<Vec<HistoricIdentityLinkRecord>, StorageError>;
}
