//! Case instance creation conformance tests.

use std::future::Future;

use super::{fixtures, seed_case, TestResult};
use crate::{CaseState, CaseStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "init",
            "insert_creates_case_at_version_0",
            insert_creates_case_at_version_0(factory).await,
        ),
        TestResult::from_result(
            "init",
            "insert_preserves_fields",
            insert_preserves_fields(factory).await,
        ),
        TestResult::from_result(
            "init",
            "double_insert_same_snapshot",
            double_insert_same_snapshot(factory).await,
        ),
        TestResult::from_result(
            "init",
            "double_insert_across_snapshots",
            double_insert_across_snapshots(factory).await,
        ),
        TestResult::from_result(
            "init",
            "different_cases_are_independent",
            different_cases_are_independent(factory).await,
        ),
    ]
}

// ── 1. Fresh case instance is at version 0 ──────────────────────────────────

async fn insert_creates_case_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let record = s
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if record.version != 0 {
        return Err(format!("expected version 0, got {}", record.version));
    }
    Ok(())
}

// ── 2. All fields survive the round trip ────────────────────────────────────

async fn insert_preserves_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut record = fixtures::case_instance("case-1");
    record.business_key = Some("order-42".to_string());
    record.tenant_id = Some("acme".to_string());
    record.started_by = Some("kermit".to_string());
    record.variables = serde_json::json!({"amount": 12.5, "tags": ["a", "b"]});

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, record.clone())
        .await
        .map_err(|e| format!("insert: {e}"))?;
    s.commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let stored = s
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored != record {
        return Err(format!("expected {record:?}, got {stored:?}"));
    }
    if stored.state != CaseState::Active {
        return Err(format!("expected active, got {}", stored.state));
    }
    Ok(())
}

// ── 3. Duplicate inside one snapshot ────────────────────────────────────────

async fn double_insert_same_snapshot<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    match s
        .insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
    {
        Err(StorageError::CaseInstanceAlreadyExists { case_instance_id })
            if case_instance_id == "case-1" =>
        {
            Ok(())
        }
        other => Err(format!("expected CaseInstanceAlreadyExists, got {other:?}")),
    }
}

// ── 4. Duplicate of a committed case ────────────────────────────────────────

async fn double_insert_across_snapshots<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    match s
        .insert_case_instance(&mut snap, fixtures::case_instance("case-1"))
        .await
    {
        Err(StorageError::CaseInstanceAlreadyExists { .. }) => Ok(()),
        other => Err(format!("expected CaseInstanceAlreadyExists, got {other:?}")),
    }
}

// ── 5. Two ids, two records ─────────────────────────────────────────────────

async fn different_cases_are_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    seed_case(&s, "case-2").await?;
    for id in ["case-1", "case-2"] {
        let record = s
            .get_case_instance(id)
            .await
            .map_err(|e| format!("get {id}: {e}"))?;
        if record.id != id {
            return Err(format!("expected {id}, got {}", record.id));
        }
    }
    Ok(())
}
