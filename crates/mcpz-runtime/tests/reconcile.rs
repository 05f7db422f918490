#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Reconciling and stopping instances left behind by another controller.

mod common;

use common::{fast_options, plan, specs, Behavior, FakeSpawner, FakeTable};
use mcpz_core::McpzError;
use mcpz_runtime::{
    FileInstanceStore, InstanceManager, InstanceRecord, InstanceStatus, InstanceStore, Liveness,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const PREVIOUS_OWNER: u32 = 90_001;

fn record(server: &str, pid: u32, status: InstanceStatus) -> InstanceRecord {
    let mut record = InstanceRecord::starting(server, Some(pid), PREVIOUS_OWNER);
    if status != InstanceStatus::Starting {
        assert!(record.transition(status));
    }
    record
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<FileInstanceStore>,
    table: Arc<FakeTable>,
    manager: InstanceManager,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileInstanceStore::new(dir.path().join("instances.json")));
    let table = Arc::new(FakeTable::default());
    let manager = InstanceManager::new(
        store.clone(),
        Arc::new(FakeSpawner::default()),
        table.clone(),
        fast_options(),
    );
    Fixture {
        _dir: dir,
        store,
        table,
        manager,
    }
}

#[tokio::test]
async fn test_reconcile_sweeps_by_liveness_and_is_idempotent() {
    let f = fixture();
    let gone = record("gone", 101, InstanceStatus::Running);
    let unknown = record("unknown", 102, InstanceStatus::Running);
    let alive = record("alive", 103, InstanceStatus::Running);
    let orphan = record("orphan", 104, InstanceStatus::Starting);
    let exited = record("exited", 105, InstanceStatus::Exited);
    for r in [&gone, &unknown, &alive, &orphan, &exited] {
        f.store.put(r).await.unwrap();
    }
    f.table.set(102, Liveness::Unknown);
    f.table.set(103, Liveness::Alive);
    f.table.set(104, Liveness::Alive);

    let first = f.manager.reconcile().await.unwrap();
    let status_of = |records: &[InstanceRecord], server: &str| {
        records
            .iter()
            .find(|r| r.server_name == server)
            .map(|r| r.status)
    };

    assert_eq!(first.len(), 3);
    assert_eq!(status_of(&first, "gone"), None);
    assert_eq!(status_of(&first, "exited"), None);
    assert_eq!(status_of(&first, "unknown"), Some(InstanceStatus::Unreachable));
    assert_eq!(status_of(&first, "alive"), Some(InstanceStatus::Running));
    assert_eq!(status_of(&first, "orphan"), Some(InstanceStatus::Unreachable));

    let second = f.manager.reconcile().await.unwrap();
    let ids = |records: &[InstanceRecord]| {
        records
            .iter()
            .map(|r| (r.id.clone(), r.status))
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn test_starting_record_with_live_owner_is_left_alone() {
    let f = fixture();
    let starting = record("booting", 201, InstanceStatus::Starting);
    f.store.put(&starting).await.unwrap();
    f.table.set(201, Liveness::Alive);
    f.table.running.lock().unwrap().insert(PREVIOUS_OWNER);

    let records = f.manager.reconcile().await.unwrap();
    assert_eq!(records[0].status, InstanceStatus::Starting);
}

#[tokio::test]
async fn test_stop_foreign_instance_kills_by_pid() {
    let f = fixture();
    let alive = record("alive", 301, InstanceStatus::Running);
    f.store.put(&alive).await.unwrap();
    f.table.set(301, Liveness::Alive);

    f.manager.stop(&alive.id).await.unwrap();
    assert_eq!(*f.table.killed.lock().unwrap(), [301]);
    assert!(f.store.get(&alive.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_stop_foreign_instance_that_survives_times_out() {
    let f = fixture();
    let stubborn = record("stubborn", 302, InstanceStatus::Running);
    f.store.put(&stubborn).await.unwrap();
    f.table.set(302, Liveness::Alive);
    f.table.unkillable.lock().unwrap().insert(302);

    let err = f.manager.stop(&stubborn.id).await.unwrap_err();
    assert!(matches!(err, McpzError::StopTimeout(ref id) if id == &stubborn.id));
    let kept = f.store.get(&stubborn.id).await.unwrap().unwrap();
    assert_eq!(kept.status, InstanceStatus::Unreachable);
}

#[tokio::test]
async fn test_unconfirmed_pid_is_never_killed() {
    let f = fixture();
    let unsure = record("unsure", 303, InstanceStatus::Running);
    f.store.put(&unsure).await.unwrap();
    f.table.set(303, Liveness::Unknown);

    let err = f.manager.stop(&unsure.id).await.unwrap_err();
    assert!(matches!(err, McpzError::StopTimeout(_)));
    assert!(f.table.killed.lock().unwrap().is_empty());
    assert!(f.store.get(&unsure.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_second_controller_sees_and_reclaims_first_controllers_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("instances.json");

    let spawner = Arc::new(FakeSpawner::new(&[
        ("a", Behavior::Serve(vec!["t"])),
        ("b", Behavior::Serve(vec!["t"])),
    ]));
    let first = InstanceManager::new(
        Arc::new(FileInstanceStore::new(&path)),
        spawner.clone(),
        Arc::new(FakeTable::default()),
        fast_options(),
    )
    .with_owner_pid(PREVIOUS_OWNER);
    let handle = first
        .launch(&plan(specs(&["a", "b"])), &CancellationToken::new())
        .await
        .unwrap();

    // `a` is still up, `b` died with its controller
    let table = Arc::new(FakeTable::default());
    table.set(handle.instances[0].record.pid.unwrap(), Liveness::Alive);

    let second = InstanceManager::new(
        Arc::new(FileInstanceStore::new(&path)),
        spawner,
        table,
        fast_options(),
    );
    assert_eq!(second.list().await.unwrap().len(), 2);

    let survivors = second.reconcile().await.unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].server_name, "a");
    assert_eq!(survivors[0].owner_pid, PREVIOUS_OWNER);

    second.stop(&survivors[0].id).await.unwrap();
    assert!(second.list().await.unwrap().is_empty());
}
