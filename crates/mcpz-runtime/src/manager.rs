//! Instance manager: launches the servers of a run plan, supervises them,
//! and stops and reclaims instances, including ones left behind by an
//! earlier controller.

use crate::handle::{LaunchFailure, RunHandle, RunningInstance};
use crate::instance::{InstanceRecord, InstanceStatus};
use crate::process::{Handshake, Liveness, ProcessSpawner, ProcessTable, ServerProcess};
use crate::registry::InstanceStore;
use crate::resolver::ResolvedRunPlan;
use futures_util::stream::{FuturesUnordered, StreamExt};
use mcpz_core::{McpzError, McpzResult, ServerSpec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tunables for launching and supervising instances.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Bound on one handshake attempt.
    pub handshake_timeout: Duration,
    /// Handshake attempts before a server counts as failed.
    pub handshake_attempts: u32,
    /// First retry delay; doubles per retry up to `max_backoff`.
    pub initial_backoff: Duration,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
    /// Period between health probes. Zero disables probing.
    pub health_interval: Duration,
    /// Consecutive failed probes before an instance is `unreachable`.
    pub health_attempts: u32,
    /// How long a stopping process gets before it is killed.
    pub stop_grace: Duration,
    /// Servers started concurrently within one launch.
    pub max_parallel: usize,
    /// How often supervisors check for process exit.
    pub exit_poll: Duration,
    /// How often a killed foreign process is re-inspected.
    pub stop_poll: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            handshake_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            health_attempts: 3,
            stop_grace: Duration::from_secs(5),
            max_parallel: 4,
            exit_poll: Duration::from_millis(500),
            stop_poll: Duration::from_millis(100),
        }
    }
}

/// A process this controller spawned and still holds.
struct Owned {
    process: Arc<dyn ServerProcess>,
    supervisor: CancellationToken,
}

type OwnedMap = Arc<Mutex<HashMap<String, Owned>>>;

/// Starts, supervises and tears down one process per resolved server.
///
/// Every status change is written to the [`InstanceStore`] so that a later
/// controller can find and reconcile what this one started.
pub struct InstanceManager {
    store: Arc<dyn InstanceStore>,
    spawner: Arc<dyn ProcessSpawner>,
    table: Arc<dyn ProcessTable>,
    options: ManagerOptions,
    owner_pid: u32,
    owned: OwnedMap,
}

impl InstanceManager {
    /// A manager recording instances as owned by the current process.
    pub fn new(
        store: Arc<dyn InstanceStore>,
        spawner: Arc<dyn ProcessSpawner>,
        table: Arc<dyn ProcessTable>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            store,
            spawner,
            table,
            options,
            owner_pid: std::process::id(),
            owned: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record instances as owned by `pid` instead of the current process.
    pub fn with_owner_pid(mut self, pid: u32) -> Self {
        self.owner_pid = pid;
        self
    }

    /// Pid recorded as the owner of new instances.
    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    /// The tunables in use.
    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// Ids of the instances this manager spawned and has not stopped.
    pub async fn owned_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.owned.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Launch every server of `plan`.
    ///
    /// Servers start in plan order, at most `max_parallel` at a time, and
    /// complete in any order. Failures are collected next to the instances
    /// that came up; only when every server fails is the first failure
    /// returned as the error. Cancelling `cancel` stops whatever this launch
    /// already spawned, removes its records and returns `Cancelled`.
    pub async fn launch(
        &self,
        plan: &ResolvedRunPlan,
        cancel: &CancellationToken,
    ) -> McpzResult<RunHandle> {
        if plan.servers.is_empty() {
            return Err(McpzError::EmptyResolution);
        }
        info!(servers = plan.servers.len(), "Launching run plan");

        let semaphore = Semaphore::new(self.options.max_parallel.max(1));
        let aborted = AtomicBool::new(false);
        let launched: Mutex<Vec<String>> = Mutex::new(Vec::new());

        let mut pending = FuturesUnordered::new();
        for (index, spec) in plan.servers.iter().enumerate() {
            let semaphore = &semaphore;
            let aborted = &aborted;
            let launched = &launched;
            pending.push(async move {
                let result = self.launch_one(spec, semaphore, aborted, launched).await;
                (index, spec.name.clone(), result)
            });
        }

        let mut outcomes = Vec::with_capacity(plan.servers.len());
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = pending.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }
        drop(pending);

        if cancelled {
            warn!("Launch cancelled, stopping spawned servers");
            let ids = std::mem::take(&mut *launched.lock().await);
            self.discard(&ids).await;
            return Err(McpzError::Cancelled);
        }

        outcomes.sort_by_key(|(index, _, _)| *index);
        let mut handle = RunHandle::default();
        for (_, server, result) in outcomes {
            match result {
                Ok(instance) => handle.instances.push(instance),
                Err(error) => {
                    warn!(server = %server, error = %error, "Server failed to launch");
                    handle.failures.push(LaunchFailure { server, error });
                }
            }
        }

        if handle.instances.is_empty() {
            if let Some(first) = std::mem::take(&mut handle.failures).into_iter().next() {
                error!(server = %first.server, "Every server in the plan failed to launch");
                return Err(first.error);
            }
        }

        info!(
            running = handle.instances.len(),
            failed = handle.failures.len(),
            "Run plan launched"
        );
        Ok(handle)
    }

    async fn launch_one(
        &self,
        spec: &ServerSpec,
        semaphore: &Semaphore,
        aborted: &AtomicBool,
        launched: &Mutex<Vec<String>>,
    ) -> McpzResult<RunningInstance> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| McpzError::Cancelled)?;
        if aborted.load(Ordering::SeqCst) {
            return Err(McpzError::spawn_failed(
                &spec.name,
                "launch aborted after an instance registry failure",
            ));
        }
        if spec.command.trim().is_empty() {
            return Err(McpzError::spawn_failed(&spec.name, "empty command"));
        }
        if let Some(port) = spec.port {
            check_port(&spec.name, port).await?;
        }

        let process = self.spawner.spawn(spec).await?;
        let record = InstanceRecord::starting(&spec.name, process.pid(), self.owner_pid);
        let id = record.id.clone();
        debug!(server = %spec.name, instance = %id, pid = ?record.pid, "Server spawned");

        // `launched` first: a launch dropped before the insert below still
        // drops `process`, and kill-on-drop reaps it
        launched.lock().await.push(id.clone());
        let supervisor = CancellationToken::new();
        self.owned.lock().await.insert(
            id.clone(),
            Owned {
                process: Arc::clone(&process),
                supervisor: supervisor.clone(),
            },
        );

        if let Err(e) = self.store.put(&record).await {
            aborted.store(true, Ordering::SeqCst);
            self.release(&id, &process).await;
            return Err(e);
        }

        let handshake = match self.handshake(spec, process.as_ref()).await {
            Ok(handshake) => handshake,
            Err(e) => {
                self.release(&id, &process).await;
                self.purge(&id).await;
                return Err(e);
            }
        };

        let record = match self.store.set_status(&id, InstanceStatus::Running).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.release(&id, &process).await;
                return Err(McpzError::NotFound(id));
            }
            Err(e) => {
                aborted.store(true, Ordering::SeqCst);
                self.release(&id, &process).await;
                return Err(e);
            }
        };

        info!(
            server = %spec.name,
            instance = %id,
            pid = ?record.pid,
            tools = handshake.tools.len(),
            protocol = %handshake.protocol_version,
            "Server running"
        );
        self.supervise(&record, Arc::clone(&process), supervisor);

        Ok(RunningInstance {
            dialect: handshake.dialect(),
            tools: handshake.tools,
            record,
            process,
        })
    }

    /// Handshake with bounded retries. A process that exits stops the
    /// retries early.
    async fn handshake(
        &self,
        spec: &ServerSpec,
        process: &dyn ServerProcess,
    ) -> McpzResult<Handshake> {
        let attempts = self.options.handshake_attempts.max(1);
        let mut delay = self.options.initial_backoff;
        let mut last = String::new();

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.options.handshake_timeout, process.handshake()).await {
                Ok(Ok(handshake)) => return Ok(handshake),
                Ok(Err(e)) => last = e.to_string(),
                Err(_) => {
                    last = format!(
                        "no handshake within {}ms",
                        self.options.handshake_timeout.as_millis()
                    );
                }
            }

            if process.try_exited().await.unwrap_or(false) {
                return Err(McpzError::spawn_failed(
                    &spec.name,
                    format!("process exited before handshake: {last}"),
                ));
            }
            warn!(
                server = %spec.name,
                attempt,
                max_attempts = attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %last,
                "Handshake failed, retrying..."
            );
            if attempt < attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(self.options.max_backoff);
            }
        }

        Err(McpzError::spawn_failed(
            &spec.name,
            format!("handshake failed after {attempts} attempts: {last}"),
        ))
    }

    /// Watch a running instance until it exits or is stopped.
    fn supervise(
        &self,
        record: &InstanceRecord,
        process: Arc<dyn ServerProcess>,
        token: CancellationToken,
    ) {
        let store = Arc::clone(&self.store);
        let options = self.options.clone();
        let id = record.id.clone();
        let server = record.server_name.clone();

        tokio::spawn(async move {
            let mut exit_timer =
                tokio::time::interval(options.exit_poll.max(Duration::from_millis(1)));
            let probing = !options.health_interval.is_zero();
            let mut health_timer =
                tokio::time::interval(options.health_interval.max(Duration::from_millis(1)));
            health_timer.reset();
            let mut unreachable = false;

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = exit_timer.tick() => {
                        if process.try_exited().await.unwrap_or(false) {
                            info!(server = %server, instance = %id, "Server exited");
                            set_status(store.as_ref(), &id, InstanceStatus::Exited).await;
                            break;
                        }
                    }
                    _ = health_timer.tick(), if probing && !unreachable => {
                        if !probe(process.as_ref(), &options).await {
                            if process.try_exited().await.unwrap_or(false) {
                                set_status(store.as_ref(), &id, InstanceStatus::Exited).await;
                                break;
                            }
                            error!(server = %server, instance = %id, "Server stopped responding");
                            set_status(store.as_ref(), &id, InstanceStatus::Unreachable).await;
                            unreachable = true;
                        }
                    }
                }
            }
            debug!(server = %server, instance = %id, "Supervisor finished");
        });
    }

    /// Every persisted instance, oldest first.
    pub async fn list(&self) -> McpzResult<Vec<InstanceRecord>> {
        self.store.list().await
    }

    /// Stop one instance and purge its record.
    ///
    /// Instances this manager spawned are shut down gracefully and killed
    /// after the grace period. Instances from another controller are killed
    /// by pid when the pid still verifiably belongs to them; if that cannot
    /// be confirmed, or the process survives the grace period, the record is
    /// kept as `unreachable` and `StopTimeout` is returned.
    pub async fn stop(&self, id: &str) -> McpzResult<()> {
        let record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| McpzError::NotFound(id.to_string()))?;

        let owned = self.owned.lock().await.remove(id);
        if let Some(owned) = owned {
            owned.supervisor.cancel();
            let graceful = owned.process.shutdown(self.options.stop_grace).await?;
            info!(server = %record.server_name, instance = %id, graceful, "Instance stopped");
            self.store.set_status(id, InstanceStatus::Exited).await?;
            self.store.remove(id).await?;
            return Ok(());
        }

        match self.table.liveness(&record) {
            Liveness::Gone => {
                debug!(instance = %id, "Instance already gone");
            }
            Liveness::Unknown => {
                warn!(instance = %id, pid = ?record.pid, "Cannot confirm instance process, not killing");
                self.store.set_status(id, InstanceStatus::Unreachable).await?;
                return Err(McpzError::StopTimeout(id.to_string()));
            }
            Liveness::Alive => {
                if let Some(pid) = record.pid {
                    self.table.kill(pid)?;
                }
                if !self.wait_gone(&record).await {
                    warn!(instance = %id, pid = ?record.pid, "Instance survived kill");
                    self.store.set_status(id, InstanceStatus::Unreachable).await?;
                    return Err(McpzError::StopTimeout(id.to_string()));
                }
                info!(server = %record.server_name, instance = %id, "Foreign instance killed");
            }
        }
        self.store.set_status(id, InstanceStatus::Exited).await?;
        self.store.remove(id).await?;
        Ok(())
    }

    async fn wait_gone(&self, record: &InstanceRecord) -> bool {
        let deadline = Instant::now() + self.options.stop_grace;
        loop {
            if self.table.liveness(record) == Liveness::Gone {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.options.stop_poll).await;
        }
    }

    /// Stop every instance this manager spawned. The first error is
    /// returned after all stops were attempted.
    pub async fn stop_all(&self) -> McpzResult<()> {
        let mut first_error = None;
        for id in self.owned_ids().await {
            if let Err(e) = self.stop(&id).await {
                warn!(instance = %id, error = %e, "Failed to stop instance");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Sweep the registry: purge records whose process is verifiably gone,
    /// mark unconfirmable ones `unreachable`, and return what remains.
    ///
    /// Safe to call repeatedly; a second sweep changes nothing the first did
    /// not. Instances this manager supervises are left alone.
    pub async fn reconcile(&self) -> McpzResult<Vec<InstanceRecord>> {
        let owned: Vec<String> = self.owned.lock().await.keys().cloned().collect();

        for record in self.store.list().await? {
            if owned.contains(&record.id) {
                continue;
            }
            match self.table.liveness(&record) {
                Liveness::Gone => {
                    info!(server = %record.server_name, instance = %record.id, "Reclaiming stale instance");
                    if record.status.can_transition_to(InstanceStatus::Exited) {
                        self.store.set_status(&record.id, InstanceStatus::Exited).await?;
                    }
                    self.store.remove(&record.id).await?;
                }
                Liveness::Unknown => {
                    if record.status.can_transition_to(InstanceStatus::Unreachable) {
                        warn!(instance = %record.id, pid = ?record.pid, "Instance liveness unknown");
                        self.store
                            .set_status(&record.id, InstanceStatus::Unreachable)
                            .await?;
                    }
                }
                Liveness::Alive => {
                    let orphaned = record.status == InstanceStatus::Starting
                        && record.owner_pid != self.owner_pid
                        && !self.table.pid_exists(record.owner_pid);
                    if orphaned {
                        warn!(instance = %record.id, owner = record.owner_pid, "Instance orphaned during startup");
                        self.store
                            .set_status(&record.id, InstanceStatus::Unreachable)
                            .await?;
                    }
                }
            }
        }
        self.store.list().await
    }

    /// Shut down processes of a cancelled launch and drop their records.
    async fn discard(&self, ids: &[String]) {
        for id in ids {
            let owned = self.owned.lock().await.remove(id);
            if let Some(owned) = owned {
                owned.supervisor.cancel();
                if let Err(e) = owned.process.shutdown(self.options.stop_grace).await {
                    warn!(instance = %id, error = %e, "Failed to shut down cancelled instance");
                }
            }
            self.purge(id).await;
        }
    }

    /// Shut down a process that never became `running`.
    async fn release(&self, id: &str, process: &Arc<dyn ServerProcess>) {
        if let Some(owned) = self.owned.lock().await.remove(id) {
            owned.supervisor.cancel();
        }
        if let Err(e) = process.shutdown(self.options.stop_grace).await {
            warn!(instance = %id, error = %e, "Failed to shut down server");
        }
    }

    /// Mark a record exited and remove it, logging failures.
    async fn purge(&self, id: &str) {
        set_status(self.store.as_ref(), id, InstanceStatus::Exited).await;
        if let Err(e) = self.store.remove(id).await {
            warn!(instance = %id, error = %e, "Failed to remove instance record");
        }
    }
}

async fn set_status(store: &dyn InstanceStore, id: &str, status: InstanceStatus) {
    if let Err(e) = store.set_status(id, status).await {
        warn!(instance = %id, status = %status, error = %e, "Failed to persist instance status");
    }
}

/// One health probe with bounded retries. Returns whether the process
/// answered.
async fn probe(process: &dyn ServerProcess, options: &ManagerOptions) -> bool {
    let attempts = options.health_attempts.max(1);
    let mut delay = options.initial_backoff;
    for attempt in 1..=attempts {
        match tokio::time::timeout(options.handshake_timeout, process.health_check()).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => warn!(attempt, error = %e, "Health check failed"),
            Err(_) => warn!(attempt, "Health check timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(options.max_backoff);
        }
    }
    false
}

/// Fail with `PortInUse` when the loopback port is already bound.
async fn check_port(server: &str, port: u16) -> McpzResult<()> {
    match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => Err(McpzError::PortInUse {
            server: server.to_string(),
            port,
        }),
        Err(e) => Err(McpzError::spawn_failed(server, format!("port {port}: {e}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_port_detects_bound_port() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = check_port("web", port).await.unwrap_err();
        assert!(matches!(err, McpzError::PortInUse { port: p, .. } if p == port));
        drop(listener);
        check_port("web", port).await.unwrap();
    }

    #[test]
    fn test_default_options() {
        let options = ManagerOptions::default();
        assert_eq!(options.handshake_timeout, Duration::from_secs(10));
        assert_eq!(options.handshake_attempts, 3);
        assert_eq!(options.max_parallel, 4);
        assert_eq!(options.stop_grace, Duration::from_secs(5));
    }
}
