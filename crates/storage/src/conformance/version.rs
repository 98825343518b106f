//! Version validation / OCC conformance tests.
//!
//! Sequential simulation of lost updates: two snapshots read the same
//! version, the first commits, the second must not.

use std::future::Future;

use super::{seed_case, TestResult};
use crate::{CaseStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_returns_new_version",
            update_returns_new_version(factory).await,
        ),
        TestResult::from_result(
            "version",
            "stale_expected_version_conflicts",
            stale_expected_version_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "conflict_has_correct_fields",
            conflict_has_correct_fields(factory).await,
        ),
        TestResult::from_result(
            "version",
            "interleaved_snapshots_second_commit_conflicts",
            interleaved_snapshots_second_commit_conflicts(factory).await,
        ),
        TestResult::from_result(
            "version",
            "delete_with_stale_version_conflicts",
            delete_with_stale_version_conflicts(factory).await,
        ),
    ]
}

async fn bump<S: CaseStorage>(s: &S, id: &str, expected: i64) -> Result<i64, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let record = s.get_case_instance_for_update(&mut snap, id).await?;
    let v = s.update_case_instance(&mut snap, record, expected).await?;
    s.commit_snapshot(snap).await?;
    Ok(v)
}

async fn update_returns_new_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    for expected in 0..3 {
        let v = bump(&s, "case-1", expected)
            .await
            .map_err(|e| format!("update at {expected}: {e}"))?;
        if v != expected + 1 {
            return Err(format!("expected version {}, got {v}", expected + 1));
        }
    }
    let stored = s
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.version != 3 {
        return Err(format!("expected stored version 3, got {}", stored.version));
    }
    Ok(())
}

async fn stale_expected_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    bump(&s, "case-1", 0)
        .await
        .map_err(|e| format!("first update: {e}"))?;
    match bump(&s, "case-1", 0).await {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn conflict_has_correct_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    match bump(&s, "case-1", 7).await {
        Err(StorageError::ConcurrentConflict {
            case_instance_id,
            expected_version,
        }) => {
            if case_instance_id != "case-1" || expected_version != 7 {
                return Err(format!(
                    "wrong fields: case_instance_id={case_instance_id}, expected_version={expected_version}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

/// Both snapshots stage an update from version 0; the later commit must fail.
async fn interleaved_snapshots_second_commit_conflicts<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;

    let mut first = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let mut second = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let a = s
        .get_case_instance_for_update(&mut first, "case-1")
        .await
        .map_err(|e| format!("read first: {e}"))?;
    let b = s
        .get_case_instance_for_update(&mut second, "case-1")
        .await
        .map_err(|e| format!("read second: {e}"))?;
    s.update_case_instance(&mut first, a, 0)
        .await
        .map_err(|e| format!("update first: {e}"))?;
    s.commit_snapshot(first)
        .await
        .map_err(|e| format!("commit first: {e}"))?;

    let staged = s.update_case_instance(&mut second, b, 0).await;
    let committed = match staged {
        Ok(_) => s.commit_snapshot(second).await,
        Err(e) => {
            let _ = s.abort_snapshot(second).await;
            Err(e)
        }
    };
    match committed {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

async fn delete_with_stale_version_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    seed_case(&s, "case-1").await?;
    bump(&s, "case-1", 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.delete_case_instance(&mut snap, "case-1", 0).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ConcurrentConflict { .. }) => Ok(()),
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}
