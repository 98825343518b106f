use std::future::Future;
use std::sync::Arc;

use super::{seed_case, TestResult};
use crate::{CaseStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_exactly_one_wins",
        concurrent_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_cases_all_succeed",
        concurrent_updates_different_cases_all_succeed(factory).await,
    ));

    results
}

/// Stage an update from version 0 and commit; `Ok(false)` on a lost race.
///
/// Backends may report the conflict when staging or when committing.
async fn try_update<S: CaseStorage>(s: &S, id: &str) -> Result<bool, StorageError> {
    let mut snap = s.begin_snapshot().await?;
    let record = s.get_case_instance_for_update(&mut snap, id).await?;
    let staged = s.update_case_instance(&mut snap, record, 0).await;
    let committed = match staged {
        Ok(_) => s.commit_snapshot(snap).await,
        Err(e) => {
            let _ = s.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match committed {
        Ok(()) => Ok(true),
        Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and attempt to update the same case instance
/// from version 0. Exactly one commit succeeds; the rest must get
/// ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed_case(storage.as_ref(), "case-1").await?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move { try_update(s.as_ref(), "case-1").await }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    let version = storage
        .get_case_instance("case-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .version;
    if version != 1 {
        return Err(format!("expected final version 1, got {version}"));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

async fn concurrent_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            match seed_case(s.as_ref(), "case-1").await {
                Ok(()) => true,
                Err(_) => false,
            }
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        if handle.await.map_err(|e| format!("task panic: {e}"))? {
            winners += 1;
        }
    }
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

// ── Different cases never conflict ──────────────────────────────────────────

async fn concurrent_updates_different_cases_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: CaseStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed_case(storage.as_ref(), &format!("case-{i}")).await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            try_update(s.as_ref(), &format!("case-{i}")).await
        }));
    }

    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if !won {
            return Err("update of an independent case conflicted".to_string());
        }
    }
    Ok(())
}
