#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Launching run plans against fake processes: partial failure,
//! cancellation, supervision and endpoint composition.

mod common;

use common::{fast_options, plan, specs, wait_for, Behavior, FakeSpawner, FakeTable};
use mcpz_core::{McpzError, ServerSpec, ToolDefinition, ToolFilter};
use mcpz_mcp::Dialect;
use mcpz_runtime::{
    InstanceManager, InstanceStatus, InstanceStore, ManagerOptions, MemoryInstanceStore,
    SkillTool,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn manager(
    spawner: Arc<FakeSpawner>,
    options: ManagerOptions,
) -> (InstanceManager, Arc<MemoryInstanceStore>) {
    let store = Arc::new(MemoryInstanceStore::new());
    let manager = InstanceManager::new(
        store.clone(),
        spawner,
        Arc::new(FakeTable::default()),
        options,
    );
    (manager, store)
}

#[tokio::test]
async fn test_one_bad_server_of_three_still_runs_two() {
    let spawner = Arc::new(FakeSpawner::new(&[
        ("a", Behavior::Serve(vec!["read"])),
        ("b", Behavior::FailSpawn),
        ("c", Behavior::Serve(vec!["write"])),
    ]));
    let (manager, store) = manager(spawner, fast_options());

    let handle = manager
        .launch(&plan(specs(&["a", "b", "c"])), &CancellationToken::new())
        .await
        .unwrap();

    let running: Vec<_> = handle
        .instances
        .iter()
        .map(|i| i.record.server_name.as_str())
        .collect();
    assert_eq!(running, ["a", "c"]);
    assert!(handle.is_partial());
    assert_eq!(handle.failures.len(), 1);
    assert_eq!(handle.failures[0].server, "b");
    assert!(matches!(handle.failures[0].error, McpzError::SpawnFailed { .. }));

    let records = store.list().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status == InstanceStatus::Running));
    assert!(records.iter().all(|r| r.owner_pid == std::process::id()));
}

#[tokio::test]
async fn test_all_failures_return_the_first_error() {
    let spawner = Arc::new(FakeSpawner::new(&[
        ("a", Behavior::FailSpawn),
        ("b", Behavior::FailSpawn),
    ]));
    let (manager, store) = manager(spawner, fast_options());

    let err = manager
        .launch(&plan(specs(&["a", "b"])), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, McpzError::SpawnFailed { ref server, .. } if server == "a"));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_command_and_busy_port_are_reported() {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let spawner = Arc::new(FakeSpawner::default());
    let (manager, _store) = manager(spawner.clone(), fast_options());
    let servers = vec![
        ServerSpec::new("web", "fake-server").with_port(port),
        ServerSpec::new("blank", ""),
        ServerSpec::new("ok", "fake-server"),
    ];

    let handle = manager
        .launch(&plan(servers), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(handle.instances.len(), 1);
    assert!(matches!(
        handle.failures[0].error,
        McpzError::PortInUse { ref server, port: p } if server == "web" && p == port
    ));
    assert!(matches!(
        handle.failures[1].error,
        McpzError::SpawnFailed { ref server, .. } if server == "blank"
    ));
    // neither failure got as far as spawning
    assert_eq!(spawner.spawned.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_handshake_failure_purges_record_and_stops_process() {
    let spawner = Arc::new(FakeSpawner::new(&[
        ("early", Behavior::ExitEarly),
        ("slow", Behavior::Hang),
        ("ok", Behavior::Serve(vec!["t"])),
    ]));
    let (manager, store) = manager(spawner.clone(), fast_options());

    let handle = manager
        .launch(&plan(specs(&["early", "slow", "ok"])), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(handle.instances.len(), 1);
    let reasons: Vec<_> = handle.failures.iter().map(|f| f.error.to_string()).collect();
    assert!(reasons[0].contains("exited before handshake"), "{reasons:?}");
    assert!(reasons[1].contains("after 2 attempts"), "{reasons:?}");

    assert_eq!(store.list().await.unwrap().len(), 1);
    assert!(spawner.process("slow").shutdowns.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_cancellation_at_any_point_leaves_no_process_behind() {
    let names = ["a", "b", "c", "d", "e", "f"];
    for delay_us in [0u64, 50, 200, 500, 1_000, 5_000, 20_000] {
        let spawner = Arc::new(FakeSpawner::new(
            &names.map(|n| (n, Behavior::Hang)),
        ));
        let options = ManagerOptions {
            handshake_timeout: Duration::from_secs(30),
            max_parallel: 6,
            ..fast_options()
        };
        let (manager, store) = manager(spawner.clone(), options);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_micros(delay_us)).await;
            trigger.cancel();
        });
        let err = manager
            .launch(&plan(specs(&names)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, McpzError::Cancelled));

        assert!(manager.owned_ids().await.is_empty(), "after {delay_us}us");
        assert!(store.list().await.unwrap().is_empty(), "after {delay_us}us");
        for process in spawner.spawned.lock().unwrap().iter() {
            // shut down, or no longer held by anything but the spawner
            let released = process.shutdowns.load(Ordering::SeqCst) > 0
                || Arc::strong_count(process) == 1;
            assert!(released, "{} leaked after {delay_us}us", process.name);
        }
    }
}

#[tokio::test]
async fn test_cancellation_stops_spawned_processes_and_clears_records() {
    let spawner = Arc::new(FakeSpawner::new(&[
        ("fast", Behavior::Serve(vec!["t"])),
        ("stuck", Behavior::Hang),
    ]));
    let options = ManagerOptions {
        handshake_timeout: Duration::from_secs(30),
        ..fast_options()
    };
    let (manager, store) = manager(spawner.clone(), options);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = manager
        .launch(&plan(specs(&["fast", "stuck"])), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, McpzError::Cancelled));

    assert!(store.list().await.unwrap().is_empty());
    assert!(manager.owned_ids().await.is_empty());
    for name in ["fast", "stuck"] {
        let process = spawner.process(name);
        assert!(process.exited.load(Ordering::SeqCst), "{name} still running");
    }
}

#[tokio::test]
async fn test_supervisor_marks_crashed_instance_exited() {
    let spawner = Arc::new(FakeSpawner::new(&[("a", Behavior::Serve(vec![]))]));
    let (manager, store) = manager(spawner.clone(), fast_options());

    let handle = manager
        .launch(&plan(specs(&["a"])), &CancellationToken::new())
        .await
        .unwrap();
    let id = handle.instances[0].record.id.clone();

    spawner.process("a").crash();
    assert!(
        wait_for(store.as_ref(), &id, |r| {
            r.is_some_and(|r| r.status == InstanceStatus::Exited)
        })
        .await
    );
}

#[tokio::test]
async fn test_failed_health_probes_mark_instance_unreachable() {
    let spawner = Arc::new(FakeSpawner::new(&[("a", Behavior::Serve(vec![]))]));
    let options = ManagerOptions {
        health_interval: Duration::from_millis(20),
        ..fast_options()
    };
    let (manager, store) = manager(spawner.clone(), options);

    let handle = manager
        .launch(&plan(specs(&["a"])), &CancellationToken::new())
        .await
        .unwrap();
    let id = handle.instances[0].record.id.clone();

    spawner.process("a").healthy.store(false, Ordering::SeqCst);
    assert!(
        wait_for(store.as_ref(), &id, |r| {
            r.is_some_and(|r| r.status == InstanceStatus::Unreachable)
        })
        .await
    );

    // a hung process that finally dies still ends up exited
    spawner.process("a").crash();
    assert!(
        wait_for(store.as_ref(), &id, |r| {
            r.is_some_and(|r| r.status == InstanceStatus::Exited)
        })
        .await
    );
}

#[tokio::test]
async fn test_stop_owned_instance_purges_record() {
    let spawner = Arc::new(FakeSpawner::new(&[("a", Behavior::Serve(vec![]))]));
    let (manager, store) = manager(spawner.clone(), fast_options());

    let handle = manager
        .launch(&plan(specs(&["a"])), &CancellationToken::new())
        .await
        .unwrap();
    let id = handle.instances[0].record.id.clone();

    manager.stop(&id).await.unwrap();
    assert!(store.get(&id).await.unwrap().is_none());
    assert_eq!(spawner.process("a").shutdowns.load(Ordering::SeqCst), 1);

    let err = manager.stop(&id).await.unwrap_err();
    assert!(matches!(err, McpzError::NotFound(ref missing) if missing == &id));
}

#[tokio::test]
async fn test_stop_all_stops_every_owned_instance() {
    let spawner = Arc::new(FakeSpawner::default());
    let (manager, store) = manager(spawner, fast_options());

    manager
        .launch(&plan(specs(&["a", "b", "c"])), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(manager.owned_ids().await.len(), 3);

    manager.stop_all().await.unwrap();
    assert!(manager.owned_ids().await.is_empty());
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_endpoint_composes_filtered_tools_and_skills() {
    let spawner = Arc::new(FakeSpawner::new(&[
        ("fs", Behavior::Serve(vec!["read", "write", "delete"])),
        ("git", Behavior::ServeLegacy(vec!["log", "read"])),
    ]));
    let (manager, _store) = manager(spawner, fast_options());
    let handle = manager
        .launch(&plan(specs(&["fs", "git"])), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(handle.instances[1].dialect, Dialect::Legacy);

    let filter = ToolFilter::new(["read", "write", "git/log", "review"]);
    let skills = [SkillTool {
        skill: "review".into(),
        definition: ToolDefinition::new("review", "Review a change"),
        instructions: "Read the diff before commenting.".into(),
    }];
    let endpoint = handle.build_endpoint("mcpz", Dialect::Current, Some(&filter), &skills);

    let names: Vec<_> = endpoint.list_tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["read", "write", "log", "git__read", "review"]);

    let result = endpoint
        .call_tool("git__read", serde_json::json!({"path": "README.md"}))
        .await
        .unwrap();
    assert_eq!(result.content[0].text, r#"git:read:{"path":"README.md"}"#);

    let result = endpoint
        .call_tool("review", serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(result.content[0].text, "Read the diff before commenting.");
    assert!(!result.is_error);
}
