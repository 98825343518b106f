//! Atomic commit conformance tests.
//!
//! Runtime and historic writes staged in one snapshot must be visible
//! together after commit, and none of them after abort.

use std::future::Future;

use super::{fixtures, seed_case, TestResult};
use crate::{CaseStorage, HistoricCaseInstanceFilter, HistoricIdentityLinkRecord};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "commit",
            "runtime_and_history_visible_after_commit",
            runtime_and_history_visible_after_commit(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "runtime_and_history_invisible_after_abort",
            runtime_and_history_invisible_after_abort(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "transitions_returned_in_sequence_order",
            transitions_returned_in_sequence_order(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "plan_item_upsert_replaces",
            plan_item_upsert_replaces(factory).await,
        ),
        TestResult::from_result(
            "commit",
            "multiple_commits_accumulate",
            multiple_commits_accumulate(factory).await,
        ),
    ]
}

async fn runtime_and_history_visible_after_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let link = fixtures::user_link("link-1", "case-1", "kermit");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.save_plan_item_instance(&mut snap, fixtures::plan_item("item-1", "case-1"))
        .await
        .map_err(|e| format!("plan item: {e}"))?;
    s.insert_identity_link(&mut snap, link.clone())
        .await
        .map_err(|e| format!("link: {e}"))?;
    s.save_historic_case_instance(&mut snap, fixtures::historic_case("case-1"))
        .await
        .map_err(|e| format!("historic case: {e}"))?;
    s.insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&link))
        .await
        .map_err(|e| format!("historic link: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    s.get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    let items = s
        .list_plan_item_instances("case-1")
        .await
        .map_err(|e| format!("items: {e}"))?;
    let links = s
        .list_identity_links("case-1")
        .await
        .map_err(|e| format!("links: {e}"))?;
    let historic_links = s
        .list_historic_identity_links("case-1")
        .await
        .map_err(|e| format!("historic links: {e}"))?;
    let count = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if items.len() != 1 || links.len() != 1 || historic_links.len() != 1 || count != 1 {
        return Err(format!(
            "expected one of each, got items={} links={} historic_links={} cases={}",
            items.len(),
            links.len(),
            historic_links.len(),
            count
        ));
    }
    Ok(())
}

async fn runtime_and_history_invisible_after_abort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let link = fixtures::user_link("link-1", "case-1", "kermit");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let record = s
        .get_case_instance_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("read: {e}"))?;
    s.update_case_instance(&mut snap, record, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    s.insert_identity_link(&mut snap, link.clone())
        .await
        .map_err(|e| format!("link: {e}"))?;
    s.insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&link))
        .await
        .map_err(|e| format!("historic link: {e}"))?;
    s.abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    let version = s
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .version;
    let links = s
        .list_identity_links("case-1")
        .await
        .map_err(|e| format!("links: {e}"))?;
    let historic_links = s
        .list_historic_identity_links("case-1")
        .await
        .map_err(|e| format!("historic links: {e}"))?;
    if version != 0 || !links.is_empty() || !historic_links.is_empty() {
        return Err(format!(
            "aborted writes visible: version={version} links={} historic_links={}",
            links.len(),
            historic_links.len()
        ));
    }
    Ok(())
}

async fn transitions_returned_in_sequence_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    for seqs in [[2, 1], [4, 3]] {
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        for seq in seqs {
            s.insert_transition(&mut snap, fixtures::transition("case-1", seq, "item-1"))
                .await
                .map_err(|e| format!("transition {seq}: {e}"))?;
        }
        s.commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
    }
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let seqs: Vec<i64> = s
        .list_transitions_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|t| t.seq)
        .collect();
    let _ = s.abort_snapshot(snap).await;
    if seqs != vec![1, 2, 3, 4] {
        return Err(format!("expected [1, 2, 3, 4], got {seqs:?}"));
    }
    Ok(())
}

async fn plan_item_upsert_replaces<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let mut item = fixtures::plan_item("item-1", "case-1");
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.save_plan_item_instance(&mut snap, item.clone())
        .await
        .map_err(|e| format!("save: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    item.state = "completed".to_string();
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.save_plan_item_instance(&mut snap, item)
        .await
        .map_err(|e| format!("save: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let items = s
        .list_plan_item_instances("case-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    match items.as_slice() {
        [only] if only.state == "completed" => Ok(()),
        other => Err(format!("expected one completed item, got {other:?}")),
    }
}

async fn multiple_commits_accumulate<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    for i in 0..3 {
        let id = format!("case-{i}");
        let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
        s.insert_case_instance(&mut snap, fixtures::case_instance(&id))
            .await
            .map_err(|e| format!("insert: {e}"))?;
        s.save_historic_case_instance(&mut snap, fixtures::historic_case(&id))
            .await
            .map_err(|e| format!("historic: {e}"))?;
        s.commit_snapshot(snap)
            .await
            .map_err(|e| format!("commit: {e}"))?;
    }
    let count = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if count != 3 {
        return Err(format!("expected 3 historic cases, got {count}"));
    }
    Ok(())
}
