use std::future::Future;

use super::{fixtures, TestResult};
use crate::{CaseStorage, HistoricCaseInstanceFilter, StorageError};

pub(super) async fn run_error_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "error",
            "get_case_instance_nonexistent",
            get_case_instance_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "get_case_instance_for_update_nonexistent",
            get_case_instance_for_update_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "update_case_instance_nonexistent",
            update_case_instance_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "delete_case_instance_nonexistent",
            delete_case_instance_nonexistent(factory).await,
        ),
        TestResult::from_result(
            "error",
            "empty_reads_for_unknown_case",
            empty_reads_for_unknown_case(factory).await,
        ),
    ]
}

// ── 1. Committed read of a missing case ─────────────────────────────────────

async fn get_case_instance_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    match s.get_case_instance("case-999").await {
        Err(StorageError::CaseInstanceNotFound { case_instance_id })
            if case_instance_id == "case-999" =>
        {
            Ok(())
        }
        other => Err(format!("expected CaseInstanceNotFound, got {other:?}")),
    }
}

// ── 2. Locked read of a missing case ────────────────────────────────────────

async fn get_case_instance_for_update_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.get_case_instance_for_update(&mut snap, "case-999").await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::CaseInstanceNotFound { .. }) => Ok(()),
        other => Err(format!("expected CaseInstanceNotFound, got {other:?}")),
    }
}

// ── 3. Update of a missing case ─────────────────────────────────────────────

async fn update_case_instance_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s
        .update_case_instance(&mut snap, fixtures::case_instance("case-999"), 0)
        .await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::CaseInstanceNotFound { .. }) => Ok(()),
        other => Err(format!("expected CaseInstanceNotFound, got {other:?}")),
    }
}

// ── 4. Delete of a missing case ─────────────────────────────────────────────

async fn delete_case_instance_nonexistent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.delete_case_instance(&mut snap, "case-999", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::CaseInstanceNotFound { .. }) => Ok(()),
        other => Err(format!("expected CaseInstanceNotFound, got {other:?}")),
    }
}

// ── 5. List reads of an unknown case are empty, not errors ──────────────────

async fn empty_reads_for_unknown_case<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let items = s
        .list_plan_item_instances("case-999")
        .await
        .map_err(|e| format!("plan items: {e}"))?;
    let links = s
        .list_identity_links("case-999")
        .await
        .map_err(|e| format!("links: {e}"))?;
    let historic_links = s
        .list_historic_identity_links("case-999")
        .await
        .map_err(|e| format!("historic links: {e}"))?;
    let count = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if !items.is_empty() || !links.is_empty() || !historic_links.is_empty() || count != 0 {
        return Err("expected empty results for unknown case".to_string());
    }
    Ok(())
}
