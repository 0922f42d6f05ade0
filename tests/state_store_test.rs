//! State store gateway tests: admission idempotence, the status DAG,
//! reservation policy, park FIFO ordering, and terminal transitions.

use conductor::config::StoreConfig;
use conductor::database::{connect_store, run_migrations, seed_gpu_pool};
use conductor::models::GpuResource;
use conductor::orchestration::state_store::{AdmitOutcome, StateStore, StoreError};
use conductor::state_machine::states::GpuState;
use conductor::state_machine::CaseStatus;

struct StoreFixture {
    store: StateStore,
    _dir: tempfile::TempDir,
}

async fn store_with_gpus(gpu_count: u32) -> StoreFixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::builder()
        .path(dir.path().join("state.db").display().to_string())
        .build();
    let pool = connect_store(&config).await.expect("connect");
    run_migrations(&pool).await.expect("migrate");
    seed_gpu_pool(&pool, gpu_count).await.expect("seed");
    StoreFixture {
        store: StateStore::new(pool, &config),
        _dir: dir,
    }
}

impl StoreFixture {
    async fn gpus(&self) -> Vec<GpuResource> {
        let mut conn = self.store.pool().acquire().await.expect("acquire");
        GpuResource::list_all(&mut conn).await.expect("list")
    }
}

#[tokio::test]
async fn test_admit_is_idempotent() {
    let f = store_with_gpus(0).await;

    let first = f.store.admit_case("C1").await.expect("admit");
    let AdmitOutcome::Admitted(case) = first else {
        panic!("first admission must insert");
    };
    assert_eq!(case.status, CaseStatus::New);
    assert_eq!(case.progress, 0);

    let second = f.store.admit_case("C1").await.expect("admit again");
    let AdmitOutcome::AlreadyPresent(existing) = second else {
        panic!("second admission must be a no-op");
    };
    // Admit→load round-trip: same identity and correlation
    assert_eq!(existing.case_id, case.case_id);
    assert_eq!(existing.correlation_id, case.correlation_id);

    let loaded = f.store.load_case("C1").await.expect("load").expect("present");
    assert_eq!(loaded.correlation_id, case.correlation_id);
}

#[tokio::test]
async fn test_advance_conflicts_on_terminal_case() {
    let f = store_with_gpus(0).await;
    f.store.admit_case("C1").await.expect("admit");
    f.store
        .mark_failed("C1", "NetworkError", "peer reset")
        .await
        .expect("fail");

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.expect("begin");
    let err = tx.advance_to_step(&case, "any", None, 10).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
async fn test_terminal_transitions_are_final() {
    let f = store_with_gpus(0).await;
    f.store.admit_case("C1").await.expect("admit");
    f.store.mark_completed("C1").await.expect("complete");

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Completed);
    assert_eq!(case.progress, 100);

    // A second terminal transition conflicts
    let err = f
        .store
        .mark_failed("C1", "X", "late failure")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));

    let unchanged = f.store.load_case("C1").await.unwrap().unwrap();
    assert_eq!(unchanged.status, CaseStatus::Completed);
    assert_eq!(unchanged.error_kind, None);
}

#[tokio::test]
async fn test_reserve_lowest_index_first() {
    let f = store_with_gpus(3).await;
    f.store.admit_case("C1").await.unwrap();
    f.store.admit_case("C2").await.unwrap();

    let mut tx = f.store.begin().await.unwrap();
    let first = tx.try_reserve_gpu("C1").await.unwrap();
    let second = tx.try_reserve_gpu("C2").await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(first, Some(0));
    assert_eq!(second, Some(1));

    let gpus = f.gpus().await;
    assert_eq!(gpus[0].owner_case_id.as_deref(), Some("C1"));
    assert_eq!(gpus[1].owner_case_id.as_deref(), Some("C2"));
    assert_eq!(gpus[2].state, GpuState::Free);
}

#[tokio::test]
async fn test_reservation_exhaustion_and_release_cycle() {
    let f = store_with_gpus(1).await;
    f.store.admit_case("C1").await.unwrap();
    f.store.admit_case("C2").await.unwrap();

    let mut tx = f.store.begin().await.unwrap();
    assert_eq!(tx.try_reserve_gpu("C1").await.unwrap(), Some(0));
    assert_eq!(tx.try_reserve_gpu("C2").await.unwrap(), None);
    tx.commit().await.unwrap();

    // Release and the singleton slot is reservable again
    f.store.release_gpu(0).await.unwrap();
    let mut tx = f.store.begin().await.unwrap();
    assert_eq!(tx.try_reserve_gpu("C2").await.unwrap(), Some(0));
    tx.commit().await.unwrap();

    let gpus = f.gpus().await;
    assert_eq!(gpus[0].owner_case_id.as_deref(), Some("C2"));
}

#[tokio::test]
async fn test_release_is_idempotent() {
    let f = store_with_gpus(1).await;

    // Releasing a FREE slot is a logged no-op, not an error
    f.store.release_gpu(0).await.expect("first release");
    f.store.release_gpu(0).await.expect("second release");

    let gpus = f.gpus().await;
    assert_eq!(gpus[0].state, GpuState::Free);
    assert_eq!(gpus[0].owner_case_id, None);
}

#[tokio::test]
async fn test_parked_fifo_order_and_reparking() {
    let f = store_with_gpus(0).await;

    for case_id in ["C2", "C1", "C3"] {
        f.store.admit_case(case_id).await.unwrap();
        let case = f.store.load_case(case_id).await.unwrap().unwrap();
        let mut tx = f.store.begin().await.unwrap();
        tx.park_for_resource(&case, "run").await.unwrap();
        tx.commit().await.unwrap();
        // Distinct park instants make the FIFO order unambiguous
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let parked = f.store.list_parked_cases().await.unwrap();
    let order: Vec<&str> = parked.iter().map(|p| p.case_id.as_str()).collect();
    assert_eq!(order, vec!["C2", "C1", "C3"], "oldest park first");

    // Re-parking the head case must not move it to the back
    let head = f.store.load_case("C2").await.unwrap().unwrap();
    let head_parked_at = parked[0].parked_at;
    let mut tx = f.store.begin().await.unwrap();
    tx.park_for_resource(&head, "run").await.unwrap();
    tx.commit().await.unwrap();

    let parked = f.store.list_parked_cases().await.unwrap();
    assert_eq!(parked[0].case_id, "C2");
    assert_eq!(parked[0].parked_at, head_parked_at, "park timestamp preserved");
}

#[tokio::test]
async fn test_park_refuses_resource_holder() {
    let f = store_with_gpus(1).await;
    f.store.admit_case("C1").await.unwrap();

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.unwrap();
    let gpu = tx.try_reserve_gpu("C1").await.unwrap().unwrap();
    tx.advance_to_step(&case, "run", Some(gpu), 50).await.unwrap();
    tx.commit().await.unwrap();

    let holding = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.unwrap();
    let err = tx.park_for_resource(&holding, "run").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { .. }));
}

#[tokio::test]
async fn test_terminal_release_frees_owned_slot() {
    let f = store_with_gpus(1).await;
    f.store.admit_case("C1").await.unwrap();

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.unwrap();
    let gpu = tx.try_reserve_gpu("C1").await.unwrap().unwrap();
    tx.advance_to_step(&case, "run", Some(gpu), 100).await.unwrap();
    tx.commit().await.unwrap();

    let released = f.store.mark_completed("C1").await.expect("complete");
    assert_eq!(released, Some(0));

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    assert_eq!(case.resource_index, None);
    let gpus = f.gpus().await;
    assert_eq!(gpus[0].state, GpuState::Free);
    assert_eq!(gpus[0].owner_case_id, None);
}

#[tokio::test]
async fn test_owner_invariant_one_slot_per_case() {
    let f = store_with_gpus(2).await;
    f.store.admit_case("C1").await.unwrap();

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.unwrap();
    let gpu = tx.try_reserve_gpu("C1").await.unwrap().unwrap();
    tx.advance_to_step(&case, "run", Some(gpu), 50).await.unwrap();
    tx.commit().await.unwrap();

    // Exactly one slot names C1 as owner
    let owners: Vec<_> = f
        .gpus()
        .await
        .into_iter()
        .filter(|g| g.owner_case_id.as_deref() == Some("C1"))
        .collect();
    assert_eq!(owners.len(), 1);

    // And the owning case is PROCESSING with the matching index
    let case = f.store.load_case("C1").await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Processing);
    assert_eq!(case.resource_index, Some(owners[0].gpu_index));
}

#[tokio::test]
async fn test_failed_case_keeps_progress_and_error_fields() {
    let f = store_with_gpus(0).await;
    f.store.admit_case("C1").await.unwrap();

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    let mut tx = f.store.begin().await.unwrap();
    tx.advance_to_step(&case, "upload", None, 50).await.unwrap();
    tx.commit().await.unwrap();

    f.store
        .mark_failed("C1", "NetworkError", "peer reset")
        .await
        .unwrap();

    let case = f.store.load_case("C1").await.unwrap().unwrap();
    assert_eq!(case.status, CaseStatus::Failed);
    assert_eq!(case.progress, 50, "failure keeps the last dispatched progress");
    assert_eq!(case.error_kind.as_deref(), Some("NetworkError"));
    assert_eq!(case.error_message.as_deref(), Some("peer reset"));
}
