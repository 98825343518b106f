use casework_storage::conformance::run_conformance_suite;
use casework_storage::InMemoryCaseStorage;

#[tokio::test]
async fn in_memory_backend_passes_conformance() {
    let report = run_conformance_suite(|| async { InMemoryCaseStorage::new() }).await;
    assert!(report.total > 0);
    assert!(report.failed == 0, "{report}");
}
