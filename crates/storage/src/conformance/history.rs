//! Historic record conformance tests.
//!
//! Historic identity links are idempotent and permanent: duplicate inserts
//! are no-ops, and deleting the runtime case or link leaves them in place.
//! Involvement filters only consider links owned by the case.

use std::collections::BTreeSet;
use std::future::Future;

use super::{fixtures, seed_case, TestResult};
use crate::{
    CaseState, CaseStorage, HistoricCaseInstanceFilter, HistoricIdentityLinkRecord,
    HistoricPlanItemInstanceFilter, IdentityLinkRecord,
};

pub(super) async fn run_history_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "history",
            "duplicate_historic_link_is_noop",
            duplicate_historic_link_is_noop(factory).await,
        ),
        TestResult::from_result(
            "history",
            "duplicate_runtime_link_is_noop",
            duplicate_runtime_link_is_noop(factory).await,
        ),
        TestResult::from_result(
            "history",
            "history_survives_case_deletion",
            history_survives_case_deletion(factory).await,
        ),
        TestResult::from_result(
            "history",
            "history_survives_link_deletion",
            history_survives_link_deletion(factory).await,
        ),
        TestResult::from_result(
            "history",
            "involvement_filters",
            involvement_filters(factory).await,
        ),
        TestResult::from_result(
            "history",
            "finished_filter_and_paging",
            finished_filter_and_paging(factory).await,
        ),
        TestResult::from_result(
            "history",
            "plan_item_filters",
            plan_item_filters(factory).await,
        ),
    ]
}

/// Stage a case-scoped link plus its historic mirror in one snapshot.
async fn link_case<S: CaseStorage>(s: &S, link: IdentityLinkRecord) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&link))
        .await
        .map_err(|e| format!("historic link: {e}"))?;
    s.insert_identity_link(&mut snap, link)
        .await
        .map_err(|e| format!("link: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn seed_historic_case<S: CaseStorage>(s: &S, id: &str) -> Result<(), String> {
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance(id))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.save_historic_case_instance(&mut snap, fixtures::historic_case(id))
        .await
        .map_err(|e| format!("historic: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))
}

async fn duplicate_historic_link_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let first = fixtures::user_link("link-1", "case-1", "kermit");
    let second = fixtures::user_link("link-2", "case-1", "kermit");

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let inserted = s
        .insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&first))
        .await
        .map_err(|e| format!("first: {e}"))?;
    let duplicate_same_snapshot = s
        .insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&second))
        .await
        .map_err(|e| format!("second: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let duplicate_later = s
        .insert_historic_identity_link(&mut snap, HistoricIdentityLinkRecord::from(&second))
        .await
        .map_err(|e| format!("third: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if !inserted || duplicate_same_snapshot || duplicate_later {
        return Err(format!(
            "expected (true, false, false), got ({inserted}, {duplicate_same_snapshot}, {duplicate_later})"
        ));
    }
    let links = s
        .list_historic_identity_links("case-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if links.len() != 1 {
        return Err(format!("expected 1 historic link, got {}", links.len()));
    }
    Ok(())
}

async fn duplicate_runtime_link_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    link_case(&s, fixtures::user_link("link-1", "case-1", "kermit")).await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let inserted = s
        .insert_identity_link(&mut snap, fixtures::user_link("link-2", "case-1", "kermit"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;
    if inserted {
        return Err("duplicate runtime link reported as inserted".to_string());
    }
    let links = s
        .list_identity_links("case-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    if links.len() != 1 {
        return Err(format!("expected 1 runtime link, got {}", links.len()));
    }
    Ok(())
}

async fn history_survives_case_deletion<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_historic_case(&s, "case-1").await?;
    link_case(&s, fixtures::user_link("link-1", "case-1", "kermit")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let mut historic = s
        .get_historic_case_instance_for_update(&mut snap, "case-1")
        .await
        .map_err(|e| format!("historic read: {e}"))?
        .ok_or("historic case missing")?;
    historic.state = CaseState::Completed;
    historic.ended_at = Some("2025-01-02T00:00:00Z".to_string());
    s.save_historic_case_instance(&mut snap, historic)
        .await
        .map_err(|e| format!("historic save: {e}"))?;
    s.delete_case_instance(&mut snap, "case-1", 0)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    if s.get_case_instance("case-1").await.is_ok() {
        return Err("runtime case still present".to_string());
    }
    let runtime_links = s
        .list_identity_links("case-1")
        .await
        .map_err(|e| format!("links: {e}"))?;
    if !runtime_links.is_empty() {
        return Err("runtime links still present".to_string());
    }
    let filter = HistoricCaseInstanceFilter {
        involved_users: vec!["kermit".to_string()],
        finished: Some(true),
        ..Default::default()
    };
    let found = s
        .find_historic_case_instances(&filter)
        .await
        .map_err(|e| format!("find: {e}"))?;
    match found.as_slice() {
        [only] if only.id == "case-1" && only.state == CaseState::Completed => Ok(()),
        other => Err(format!("expected finished case-1, got {other:?}")),
    }
}

async fn history_survives_link_deletion<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_historic_case(&s, "case-1").await?;
    link_case(&s, fixtures::user_link("link-1", "case-1", "kermit")).await?;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.delete_identity_link(&mut snap, "link-1")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    s.delete_identity_link(&mut snap, "link-unknown")
        .await
        .map_err(|e| format!("delete unknown: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let runtime = s
        .list_identity_links("case-1")
        .await
        .map_err(|e| format!("links: {e}"))?;
    let historic = s
        .list_historic_identity_links("case-1")
        .await
        .map_err(|e| format!("historic links: {e}"))?;
    if !runtime.is_empty() || historic.len() != 1 {
        return Err(format!(
            "expected 0 runtime and 1 historic link, got {} and {}",
            runtime.len(),
            historic.len()
        ));
    }
    Ok(())
}

async fn involvement_filters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_historic_case(&s, "case-1").await?;
    seed_historic_case(&s, "case-2").await?;
    link_case(&s, fixtures::user_link("link-1", "case-1", "kermit")).await?;
    link_case(&s, fixtures::group_link("link-2", "case-1", "testGroup")).await?;
    link_case(&s, fixtures::user_link("link-3", "case-2", "gonzo")).await?;

    let groups = |gs: &[&str]| gs.iter().map(|g| g.to_string()).collect::<BTreeSet<_>>();
    let cases: [(&str, HistoricCaseInstanceFilter, usize); 5] = [
        (
            "kermit",
            HistoricCaseInstanceFilter {
                involved_users: vec!["kermit".to_string()],
                ..Default::default()
            },
            1,
        ),
        (
            "empty user",
            HistoricCaseInstanceFilter {
                involved_users: vec![String::new()],
                ..Default::default()
            },
            0,
        ),
        (
            "group or",
            HistoricCaseInstanceFilter {
                involved_group_sets: vec![groups(&["testGroup", "other"])],
                ..Default::default()
            },
            1,
        ),
        (
            "user and group",
            HistoricCaseInstanceFilter {
                involved_users: vec!["gonzo".to_string()],
                involved_group_sets: vec![groups(&["testGroup"])],
                ..Default::default()
            },
            0,
        ),
        (
            "no involvement",
            HistoricCaseInstanceFilter::default(),
            2,
        ),
    ];
    for (label, filter, expected) in cases {
        let count = s
            .count_historic_case_instances(&filter)
            .await
            .map_err(|e| format!("{label}: {e}"))?;
        if count != expected {
            return Err(format!("{label}: expected {expected}, got {count}"));
        }
    }
    Ok(())
}

async fn finished_filter_and_paging<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for (i, day) in ["03", "01", "02"].iter().enumerate() {
        let mut record = fixtures::historic_case(&format!("case-{i}"));
        record.started_at = format!("2025-01-{day}T00:00:00Z");
        if i == 0 {
            record.state = CaseState::Terminated;
            record.ended_at = Some("2025-01-04T00:00:00Z".to_string());
        }
        s.save_historic_case_instance(&mut snap, record)
            .await
            .map_err(|e| format!("historic: {e}"))?;
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let unfinished = s
        .count_historic_case_instances(&HistoricCaseInstanceFilter {
            finished: Some(false),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("count: {e}"))?;
    if unfinished != 2 {
        return Err(format!("expected 2 unfinished, got {unfinished}"));
    }

    let page = s
        .find_historic_case_instances(&HistoricCaseInstanceFilter {
            first_result: 1,
            max_results: Some(2),
            ..Default::default()
        })
        .await
        .map_err(|e| format!("find: {e}"))?;
    let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
    if ids != ["case-2", "case-0"] {
        return Err(format!("expected [case-2, case-0], got {ids:?}"));
    }
    Ok(())
}

async fn plan_item_filters<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    for (id, case_id, ended) in [("p1", "case-1", false), ("p2", "case-1", true), ("p3", "case-2", true)] {
        let mut record = fixtures::historic_plan_item(id, case_id);
        if ended {
            record.state = "completed".to_string();
            record.completed_at = Some("2025-01-02T00:00:00Z".to_string());
            record.ended_at = record.completed_at.clone();
        }
        s.save_historic_plan_item_instance(&mut snap, record)
            .await
            .map_err(|e| format!("historic plan item: {e}"))?;
    }

    let staged = s
        .count_historic_plan_item_instances(&HistoricPlanItemInstanceFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    if staged != 0 {
        return Err(format!("uncommitted rows visible: {staged}"));
    }
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let cases = [
        ("all", HistoricPlanItemInstanceFilter::default(), 3),
        (
            "by case",
            HistoricPlanItemInstanceFilter {
                case_instance_id: Some("case-1".to_string()),
                ..Default::default()
            },
            2,
        ),
        (
            "ended in case",
            HistoricPlanItemInstanceFilter {
                case_instance_id: Some("case-1".to_string()),
                ended: Some(true),
                ..Default::default()
            },
            1,
        ),
        (
            "by state",
            HistoricPlanItemInstanceFilter {
                state: Some("active".to_string()),
                ..Default::default()
            },
            1,
        ),
    ];
    for (label, filter, expected) in cases {
        let count = s
            .count_historic_plan_item_instances(&filter)
            .await
            .map_err(|e| format!("{label}: {e}"))?;
        let listed = s
            .find_historic_plan_item_instances(&filter)
            .await
            .map_err(|e| format!("{label}: {e}"))?
            .len();
        if count != expected || listed != expected {
            return Err(format!(
                "{label}: expected {expected}, counted {count}, listed {listed}"
            ));
        }
    }
    Ok(())
}
