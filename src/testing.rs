//! Testing utilities for harness tests
//!
//! `FakeCluster` stands in for the orchestration platform, `MemoryStore` for
//! the cluster's data, and `SimulatedProcessRegistry` runs the real write
//! loop as a tokio task instead of an OS process. Together they let every
//! harness operation run in-process.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::config::HarnessConfig;
use crate::context::ClusterContext;
use crate::error::{HarnessError, Result};
use crate::orchestrator::{
    ActionResult, ApplicationStatus, ClusterStatus, ExecOutput, Orchestrator, StorageInstance,
    UnitStatus,
};
use crate::process::{ProcessId, ProcessInfo, ProcessRegistry};
use crate::store::{MemoryConnector, MemoryStore};
use crate::writer::{write_sequence, WriterConfig};

/// Log of a member that re-used its volume and caught up from the primary
pub const INCREMENTAL_SYNC_TRACE: &[&str] = &[
    r#"{"t":{"$date":"2022-06-01T10:00:00.000+00:00"},"s":"I","c":"CONTROL","id":21951,"ctx":"initandlisten","msg":"Options set by command line"}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:01.000+00:00"},"s":"I","c":"REPL","id":21320,"ctx":"initandlisten","msg":"Updated term","attr":{"term":4}}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:02.000+00:00"},"s":"I","c":"REPL","id":21799,"ctx":"BackgroundSync","msg":"Sync source candidate chosen","attr":{"syncSource":"10.0.0.2:27017"}}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:02.100+00:00"},"s":"I","c":"REPL","id":21088,"ctx":"BackgroundSync","msg":"Changed sync source","attr":{"oldSyncSource":"empty","newSyncSource":"10.0.0.2:27017"}}"#,
];

/// Log of a member that threw its data away and cloned everything
pub const FULL_RESYNC_TRACE: &[&str] = &[
    r#"{"t":{"$date":"2022-06-01T10:00:00.000+00:00"},"s":"I","c":"CONTROL","id":21951,"ctx":"initandlisten","msg":"Options set by command line"}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:01.000+00:00"},"s":"I","c":"INITSYNC","id":21164,"ctx":"ReplCoordExtern-0","msg":"Starting initial sync attempt","attr":{"retriesLeft":10}}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:03.000+00:00"},"s":"I","c":"INITSYNC","id":21183,"ctx":"ReplCoordExtern-1","msg":"Finished cloning data. Beginning oplog replay"}"#,
    r#"{"t":{"$date":"2022-06-01T10:00:04.000+00:00"},"s":"I","c":"INITSYNC","id":21192,"ctx":"ReplCoordExtern-1","msg":"Initial sync done","attr":{"durationSeconds":3}}"#,
];

fn trace(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|l| l.to_string()).collect()
}

/// Config with short timeouts and polls suited to in-process tests
pub fn fast_config() -> HarnessConfig {
    HarnessConfig::default()
        .with_stop_timeout(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(5))
        .with_restart_timeout(Duration::from_secs(5))
        .with_idle_timeout(Duration::from_secs(5))
}

#[derive(Debug, Default)]
struct FakeApplication {
    charm: String,
    units: Vec<UnitStatus>,
    next_unit: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    applications: BTreeMap<String, FakeApplication>,
    storage: Vec<StorageInstance>,
    pool: String,
    password: Option<String>,
    fail_actions: bool,
    actions_run: Vec<(String, String)>,
    execs: Vec<(String, String)>,
    restart_polls: u32,
    pending_down_polls: u32,
    lingering_polls: u32,
    pending_lingering_polls: u32,
    daemon_pid: u32,
}

/// In-memory orchestration platform
///
/// Killing the daemon (`pkill` via `exec`) makes the shared store
/// unavailable; it comes back after a configurable number of `pgrep` polls,
/// like a service manager restarting the daemon.
pub struct FakeCluster {
    state: Mutex<FakeState>,
    store: MemoryStore,
}

impl FakeCluster {
    pub fn new(store: MemoryStore) -> Self {
        FakeCluster {
            state: Mutex::new(FakeState {
                pool: "lxd".to_string(),
                password: Some("fake-admin-password".to_string()),
                restart_polls: 2,
                daemon_pid: 4000,
                ..FakeState::default()
            }),
            store,
        }
    }

    /// Deploy `app` with `units` settled units at 10.0.<app index>.<unit + 1>
    pub fn deploy(&self, app: &str, charm: &str, units: usize) {
        let mut state = self.state.lock();
        state.applications.insert(
            app.to_string(),
            FakeApplication {
                charm: charm.to_string(),
                ..FakeApplication::default()
            },
        );
        for _ in 0..units {
            Self::add_unit_locked(&mut state, app, None);
        }
    }

    /// Storage pool reported for every storage instance
    pub fn set_storage_pool(&self, pool: &str) {
        let mut state = self.state.lock();
        state.pool = pool.to_string();
        for instance in state.storage.iter_mut() {
            instance.pool = Some(pool.to_string());
        }
    }

    /// `None` makes the password action succeed without a password
    pub fn set_password(&self, password: Option<&str>) {
        self.state.lock().password = password.map(str::to_string);
    }

    /// Make every action report failure
    pub fn fail_actions(&self) {
        self.state.lock().fail_actions = true;
    }

    /// Number of failing `pgrep` polls after a kill
    pub fn set_restart_polls(&self, polls: u32) {
        self.state.lock().restart_polls = polls;
    }

    /// Number of `pgrep` polls after a kill that still report the killed
    /// daemon's PID
    pub fn set_lingering_polls(&self, polls: u32) {
        self.state.lock().lingering_polls = polls;
    }

    /// PID the daemon currently runs under; changes on every restart
    pub fn daemon_pid(&self) -> u32 {
        self.state.lock().daemon_pid
    }

    /// Drop a unit's public address, as for a unit still provisioning
    pub fn clear_address(&self, unit: &str) {
        let mut state = self.state.lock();
        for app in state.applications.values_mut() {
            for u in app.units.iter_mut().filter(|u| u.name == unit) {
                u.public_address = None;
            }
        }
    }

    /// `(unit, action)` pairs run so far
    pub fn actions_run(&self) -> Vec<(String, String)> {
        self.state.lock().actions_run.clone()
    }

    /// `(unit, command)` pairs executed so far
    pub fn execs(&self) -> Vec<(String, String)> {
        self.state.lock().execs.clone()
    }

    fn add_unit_locked(state: &mut FakeState, app: &str, attach_storage: Option<&str>) -> String {
        let app_index = state
            .applications
            .keys()
            .position(|name| name == app)
            .unwrap_or(0);
        let pool = state.pool.clone();
        let Some(application) = state.applications.get_mut(app) else {
            return String::new();
        };

        let number = application.next_unit;
        application.next_unit += 1;
        let name = format!("{}/{}", app, number);
        application.units.push(UnitStatus {
            name: name.clone(),
            public_address: Some(format!("10.0.{}.{}", app_index, number + 1)),
            workload_status: "active".to_string(),
            agent_status: "idle".to_string(),
        });

        let attached = attach_storage.and_then(|id| state.storage.iter().position(|s| s.id == id));
        match attached {
            Some(index) => state.storage[index].unit = Some(name.clone()),
            None => state.storage.push(StorageInstance {
                id: format!("{}/{}", app, number),
                unit: Some(name.clone()),
                pool: Some(pool),
            }),
        }
        name
    }
}

#[async_trait]
impl Orchestrator for FakeCluster {
    async fn status(&self) -> Result<ClusterStatus> {
        let state = self.state.lock();
        Ok(ClusterStatus {
            applications: state
                .applications
                .iter()
                .map(|(name, app)| ApplicationStatus {
                    name: name.clone(),
                    charm: app.charm.clone(),
                    units: app.units.clone(),
                })
                .collect(),
        })
    }

    async fn run_action(&self, unit: &str, action: &str) -> Result<ActionResult> {
        let mut state = self.state.lock();
        state.actions_run.push((unit.to_string(), action.to_string()));

        if state.fail_actions {
            return Ok(ActionResult {
                status: "failed".to_string(),
                results: BTreeMap::new(),
            });
        }

        let mut results = BTreeMap::new();
        if let Some(password) = &state.password {
            results.insert("admin-password".to_string(), password.clone());
        }
        Ok(ActionResult {
            status: "completed".to_string(),
            results,
        })
    }

    async fn add_unit(&self, app: &str, count: usize, attach_storage: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if !state.applications.contains_key(app) {
            return Err(HarnessError::Orchestrator(format!("application {} not found", app)));
        }
        for _ in 0..count {
            Self::add_unit_locked(&mut state, app, attach_storage);
        }

        // The newest member's log decides what reused_storage sees
        let log = if attach_storage.is_some() {
            trace(INCREMENTAL_SYNC_TRACE)
        } else {
            trace(FULL_RESYNC_TRACE)
        };
        self.store.set_log(log);
        Ok(())
    }

    async fn destroy_unit(&self, unit: &str) -> Result<()> {
        let mut state = self.state.lock();
        let mut found = false;
        for app in state.applications.values_mut() {
            let before = app.units.len();
            app.units.retain(|u| u.name != unit);
            found |= app.units.len() != before;
        }
        if !found {
            return Err(HarnessError::Orchestrator(format!("unit {} not found", unit)));
        }
        for instance in state.storage.iter_mut().filter(|s| s.unit.as_deref() == Some(unit)) {
            instance.unit = None;
        }
        Ok(())
    }

    async fn storage(&self) -> Result<Vec<StorageInstance>> {
        Ok(self.state.lock().storage.clone())
    }

    async fn exec(&self, unit: &str, command: &str) -> Result<ExecOutput> {
        let mut state = self.state.lock();
        state.execs.push((unit.to_string(), command.to_string()));

        let mut stdout = String::new();
        let success = if command.contains("pkill") {
            self.store.set_available(false);
            state.pending_lingering_polls = state.lingering_polls;
            state.pending_down_polls = state.restart_polls;
            true
        } else if command.contains("pgrep") {
            if state.pending_lingering_polls > 0 {
                state.pending_lingering_polls -= 1;
                stdout = format!("{}\n", state.daemon_pid);
                true
            } else if state.pending_down_polls > 0 {
                state.pending_down_polls -= 1;
                false
            } else {
                if !self.store.is_available() {
                    state.daemon_pid += 1;
                    self.store.set_available(true);
                }
                stdout = format!("{}\n", state.daemon_pid);
                true
            }
        } else {
            true
        };

        Ok(ExecOutput {
            success,
            stdout,
            ..ExecOutput::default()
        })
    }
}

struct SimulatedProcess {
    command_line: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct RegistryState {
    next_pid: u32,
    processes: BTreeMap<u32, SimulatedProcess>,
    launches: Vec<Vec<String>>,
    unkillable: bool,
}

/// Process registry whose "processes" are tokio tasks running the write loop
/// against a [`MemoryStore`]
pub struct SimulatedProcessRegistry {
    store: MemoryStore,
    collection: String,
    pace: Duration,
    state: Mutex<RegistryState>,
}

impl SimulatedProcessRegistry {
    pub fn new(store: MemoryStore, collection: impl Into<String>) -> Self {
        SimulatedProcessRegistry {
            store,
            collection: collection.into(),
            pace: Duration::from_millis(1),
            state: Mutex::new(RegistryState {
                next_pid: 1000,
                ..RegistryState::default()
            }),
        }
    }

    /// Argument lists of every launch so far
    pub fn launches(&self) -> Vec<Vec<String>> {
        self.state.lock().launches.clone()
    }

    /// Ignore SIGKILL, as for a process stuck in uninterruptible sleep
    pub fn set_unkillable(&self, unkillable: bool) {
        self.state.lock().unkillable = unkillable;
    }

    /// Register a process that is not a writer, to check signature matching
    pub fn spawn_bystander(&self, command_line: &str) -> ProcessId {
        let handle = tokio::spawn(futures::future::pending::<()>());
        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.processes.insert(
            pid,
            SimulatedProcess {
                command_line: command_line.to_string(),
                handle,
            },
        );
        ProcessId(pid)
    }
}

#[async_trait]
impl ProcessRegistry for SimulatedProcessRegistry {
    async fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessId> {
        let starting_number: i64 = args
            .get(1)
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| HarnessError::ProcessControl(format!("bad writer arguments: {:?}", args)))?;

        let store = self.store.clone();
        let config = WriterConfig::new(self.collection.clone(), starting_number)
            .with_pace(self.pace)
            .with_retry_delay(self.pace);
        let handle = tokio::spawn(async move {
            write_sequence(&store, &config).await;
        });

        let command_line = std::iter::once(program.display().to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let mut state = self.state.lock();
        let pid = state.next_pid;
        state.next_pid += 1;
        state.launches.push(args.to_vec());
        state
            .processes
            .insert(pid, SimulatedProcess { command_line, handle });
        Ok(ProcessId(pid))
    }

    async fn find(&self, signature: &str) -> Result<Vec<ProcessInfo>> {
        let mut state = self.state.lock();
        state.processes.retain(|_, p| !p.handle.is_finished());
        Ok(state
            .processes
            .iter()
            .filter(|(_, p)| p.command_line.contains(signature))
            .map(|(pid, p)| ProcessInfo {
                pid: ProcessId(*pid),
                command_line: p.command_line.clone(),
            })
            .collect())
    }

    async fn kill(&self, pid: ProcessId) -> Result<()> {
        let state = self.state.lock();
        if state.unkillable {
            return Ok(());
        }
        if let Some(process) = state.processes.get(&pid.0) {
            process.handle.abort();
        }
        Ok(())
    }
}

/// A context over a fake cluster with one three-unit `mongodb` application
pub struct TestHarness {
    pub ctx: ClusterContext,
    pub cluster: Arc<FakeCluster>,
    pub store: MemoryStore,
    pub processes: Arc<SimulatedProcessRegistry>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let store = MemoryStore::new();
        let cluster = Arc::new(FakeCluster::new(store.clone()));
        cluster.deploy("mongodb", "local:focal/mongodb-6", 3);
        Self::over(config, cluster, store)
    }

    /// Context over an already populated cluster
    pub fn over(config: HarnessConfig, cluster: Arc<FakeCluster>, store: MemoryStore) -> Self {
        let processes = Arc::new(SimulatedProcessRegistry::new(
            store.clone(),
            config.writes_collection.clone(),
        ));
        let ctx = ClusterContext::new(
            config,
            cluster.clone(),
            Arc::new(MemoryConnector::new(store.clone())),
            processes.clone(),
        );
        TestHarness {
            ctx,
            cluster,
            store,
            processes,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
