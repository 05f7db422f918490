//! In-process fakes for the process seams.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use mcpz_core::{McpzError, McpzResult, ServerSpec, ToolDefinition};
use mcpz_mcp::McpToolResult;
use mcpz_runtime::{
    Handshake, InstanceRecord, InstanceStore, Liveness, ManagerOptions, ProcessSpawner,
    ProcessTable, ResolvedRunPlan, ServerProcess,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a fake server behaves once spawned.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Completes the handshake with these tools.
    Serve(Vec<&'static str>),
    /// Speaks the legacy protocol.
    ServeLegacy(Vec<&'static str>),
    /// Fails to start at all.
    FailSpawn,
    /// Never answers the handshake.
    Hang,
    /// Exits before answering.
    ExitEarly,
}

pub struct FakeProcess {
    pub name: String,
    pub pid: u32,
    behavior: Behavior,
    pub exited: AtomicBool,
    pub healthy: AtomicBool,
    pub shutdowns: AtomicU32,
}

impl FakeProcess {
    /// Simulate the process dying on its own.
    pub fn crash(&self) {
        self.exited.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    async fn handshake(&self) -> McpzResult<Handshake> {
        let (version, tools) = match &self.behavior {
            Behavior::Serve(tools) => ("2025-06-18", tools),
            Behavior::ServeLegacy(tools) => ("2024-11-05", tools),
            Behavior::Hang => return std::future::pending().await,
            Behavior::ExitEarly => {
                self.crash();
                return Err(McpzError::Protocol("stdout closed".into()));
            }
            Behavior::FailSpawn => unreachable!("never spawned"),
        };
        Ok(Handshake {
            protocol_version: version.into(),
            tools: tools
                .iter()
                .map(|t| ToolDefinition::new(*t, format!("{t} tool")))
                .collect(),
        })
    }

    async fn health_check(&self) -> McpzResult<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpzError::Protocol("timed out".into()))
        }
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> McpzResult<McpToolResult> {
        Ok(McpToolResult::text(
            format!("{}:{tool}:{arguments}", self.name),
            false,
        ))
    }

    async fn try_exited(&self) -> McpzResult<bool> {
        Ok(self.exited.load(Ordering::SeqCst))
    }

    async fn shutdown(&self, _grace: Duration) -> McpzResult<bool> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeSpawner {
    behaviors: HashMap<String, Behavior>,
    next_pid: AtomicU32,
    pub spawned: Mutex<Vec<Arc<FakeProcess>>>,
}

impl FakeSpawner {
    pub fn new(behaviors: &[(&str, Behavior)]) -> Self {
        Self {
            behaviors: behaviors
                .iter()
                .map(|(name, b)| ((*name).to_string(), b.clone()))
                .collect(),
            next_pid: AtomicU32::new(40_000),
            spawned: Mutex::new(Vec::new()),
        }
    }

    pub fn process(&self, name: &str) -> Arc<FakeProcess> {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .unwrap()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, spec: &ServerSpec) -> McpzResult<Arc<dyn ServerProcess>> {
        let behavior = self
            .behaviors
            .get(&spec.name)
            .cloned()
            .unwrap_or(Behavior::Serve(Vec::new()));
        if matches!(behavior, Behavior::FailSpawn) {
            return Err(McpzError::spawn_failed(&spec.name, "No such file or directory"));
        }
        let process = Arc::new(FakeProcess {
            name: spec.name.clone(),
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            behavior,
            exited: AtomicBool::new(false),
            healthy: AtomicBool::new(true),
            shutdowns: AtomicU32::new(0),
        });
        self.spawned.lock().unwrap().push(Arc::clone(&process));
        Ok(process)
    }
}

/// Process table answering from a fixed map. Unlisted pids are `Gone`.
#[derive(Default)]
pub struct FakeTable {
    pub liveness: Mutex<HashMap<u32, Liveness>>,
    /// Pids that survive `kill`.
    pub unkillable: Mutex<HashSet<u32>>,
    /// Pids reported by `pid_exists`.
    pub running: Mutex<HashSet<u32>>,
    pub killed: Mutex<Vec<u32>>,
}

impl FakeTable {
    pub fn set(&self, pid: u32, liveness: Liveness) {
        self.liveness.lock().unwrap().insert(pid, liveness);
    }
}

impl ProcessTable for FakeTable {
    fn liveness(&self, record: &InstanceRecord) -> Liveness {
        record
            .pid
            .and_then(|pid| self.liveness.lock().unwrap().get(&pid).copied())
            .unwrap_or(Liveness::Gone)
    }

    fn pid_exists(&self, pid: u32) -> bool {
        self.running.lock().unwrap().contains(&pid)
    }

    fn kill(&self, pid: u32) -> McpzResult<bool> {
        self.killed.lock().unwrap().push(pid);
        if !self.unkillable.lock().unwrap().contains(&pid) {
            self.set(pid, Liveness::Gone);
        }
        Ok(true)
    }
}

/// Short timings so failure paths finish quickly.
pub fn fast_options() -> ManagerOptions {
    ManagerOptions {
        handshake_timeout: Duration::from_millis(200),
        handshake_attempts: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        health_interval: Duration::ZERO,
        health_attempts: 2,
        stop_grace: Duration::from_millis(200),
        max_parallel: 2,
        exit_poll: Duration::from_millis(10),
        stop_poll: Duration::from_millis(10),
    }
}

pub fn plan(specs: Vec<ServerSpec>) -> ResolvedRunPlan {
    ResolvedRunPlan {
        servers: specs,
        tool_filter: None,
        skill_tools: Vec::new(),
        collisions: Vec::new(),
    }
}

pub fn specs(names: &[&str]) -> Vec<ServerSpec> {
    names.iter().map(|n| ServerSpec::new(*n, "fake-server")).collect()
}

/// Poll `store` until the record `id` satisfies `check`, for up to two
/// seconds.
pub async fn wait_for(
    store: &dyn InstanceStore,
    id: &str,
    check: impl Fn(Option<&InstanceRecord>) -> bool,
) -> bool {
    for _ in 0..200 {
        let record = store.get(id).await.unwrap();
        if check(record.as_ref()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
