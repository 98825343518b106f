//! Snapshot isolation conformance tests.
//!
//! Verifies that uncommitted writes are invisible outside a snapshot,
//! visible to the snapshot that staged them, and discarded on abort.

use std::future::Future;

use super::{fixtures, seed_case, TestResult};
use crate::{CaseStorage, HistoricCaseInstanceFilter};

pub(super) async fn run_snapshot_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "snapshot",
            "commit_empty_snapshot",
            commit_empty_snapshot(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_case_invisible",
            uncommitted_case_invisible(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "staged_writes_visible_in_own_snapshot",
            staged_writes_visible_in_own_snapshot(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "aborted_writes_discarded",
            aborted_writes_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "dropped_snapshot_discarded",
            dropped_snapshot_discarded(factory).await,
        ),
        TestResult::from_result(
            "snapshot",
            "uncommitted_update_invisible",
            uncommitted_update_invisible(factory).await,
        ),
    ]
}

async fn commit_empty_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn uncommitted_case_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.save_historic_case_instance(&mut snap, fixtures::historic_case("case-1"))
        .await
        .map_err(|e| format!("historic: {e}"))?;

    if s.get_case_instance("case-1").await.is_ok() {
        return Err("uncommitted case instance visible outside snapshot".to_string());
    }
    let count = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if count != 0 {
        return Err(format!("uncommitted historic case visible, count {count}"));
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn staged_writes_visible_in_own_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.save_plan_item_instance(&mut snap, fixtures::plan_item("item-1", "case-1"))
        .await
        .map_err(|e| format!("plan item: {e}"))?;
    s.insert_transition(&mut snap, fixtures::transition("case-1", 1, "item-1"))
        .await
        .map_err(|e| format!("transition: {e}"))?;
    s.save_historic_case_instance(&mut snap, fixtures::historic_case("case-1"))
        .await
        .map_err(|e| format!("historic: {e}"))?;

    s.get_case_instance_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("read own case: {e}"))?;
    let items = s
        .list_plan_item_instances_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("list items: {e}"))?;
    let transitions = s
        .list_transitions_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("list transitions: {e}"))?;
    let historic = s
        .get_historic_case_instance_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("historic read: {e}"))?;
    let _ = s.abort_snapshot(snap).await;

    if items.len() != 1 || transitions.len() != 1 || historic.is_none() {
        return Err(format!(
            "expected own writes visible, got {} items, {} transitions, historic {:?}",
            items.len(),
            transitions.len(),
            historic.map(|h| h.id)
        ));
    }
    Ok(())
}

async fn aborted_writes_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.save_historic_case_instance(&mut snap, fixtures::historic_case("case-1"))
        .await
        .map_err(|e| format!("historic: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    if s.get_case_instance("case-1").await.is_ok() {
        return Err("aborted case instance visible".to_string());
    }
    let count = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if count != 0 {
        return Err(format!("aborted historic case visible, count {count}"));
    }
    Ok(())
}

async fn dropped_snapshot_discarded<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    if s.get_case_instance("case-1").await.is_ok() {
        return Err("dropped snapshot's case instance visible".to_string());
    }
    Ok(())
}

async fn uncommitted_update_invisible<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let mut record = s
        .get_case_instance_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    record.variables = serde_json::json!({"approved": true});
    s.update_case_instance(&mut snap, record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let committed = s
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    let _ = s.abort_snapshot(snap).await;
    if committed.version != 0 || committed.variables != serde_json::json!({}) {
        return Err(format!(
            "uncommitted update visible: version {}",
            committed.version
        ));
    }
    Ok(())
}
