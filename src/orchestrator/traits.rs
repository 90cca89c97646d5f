//! Orchestration platform abstraction

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{HarnessError, Result};

/// Snapshot of deployed applications and their units
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Applications ordered by name
    pub applications: Vec<ApplicationStatus>,
}

impl ClusterStatus {
    /// Look up an application by name
    pub fn application(&self, name: &str) -> Option<&ApplicationStatus> {
        self.applications.iter().find(|app| app.name == name)
    }
}

/// One deployed application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationStatus {
    pub name: String,
    /// Deployed-software label, e.g. `local:focal/mongodb-6` or `mongodb`
    pub charm: String,
    /// Units ordered by unit number
    pub units: Vec<UnitStatus>,
}

/// One unit of an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Unit name, e.g. `mongodb/0`
    pub name: String,
    pub public_address: Option<String>,
    pub workload_status: String,
    pub agent_status: String,
}

impl UnitStatus {
    /// Unit number parsed from the name (`mongodb/3` -> 3)
    pub fn number(&self) -> Option<u64> {
        self.name.rsplit('/').next()?.parse().ok()
    }

    /// Workload reports active and the agent has nothing left to do
    pub fn is_settled(&self) -> bool {
        self.workload_status == "active" && self.agent_status == "idle"
    }
}

/// Outcome of an action run on a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionResult {
    /// Action status, e.g. "completed" or "failed"
    pub status: String,
    /// String-valued result fields
    pub results: BTreeMap<String, String>,
}

impl ActionResult {
    pub fn completed(&self) -> bool {
        self.status == "completed"
    }
}

/// A storage instance known to the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInstance {
    /// Storage id, e.g. `mongodb/0`
    pub id: String,
    /// Unit currently attached, if any
    pub unit: Option<String>,
    /// Backing pool, e.g. `rootfs`, `lxd`, `ebs`
    pub pool: Option<String>,
}

/// Output of a command executed on a unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Orchestration platform operations the harness consumes
///
/// Implementations talk to the live platform. Every call reflects current
/// state; nothing is cached between calls.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Current application/unit topology
    async fn status(&self) -> Result<ClusterStatus>;

    /// Run a named action on a unit and wait for its result
    async fn run_action(&self, unit: &str, action: &str) -> Result<ActionResult>;

    /// Add `count` units to an application, optionally attaching existing storage
    async fn add_unit(&self, app: &str, count: usize, attach_storage: Option<&str>) -> Result<()>;

    /// Remove a unit, detaching (not destroying) persistent storage
    async fn destroy_unit(&self, unit: &str) -> Result<()>;

    /// All storage instances in the model
    async fn storage(&self) -> Result<Vec<StorageInstance>>;

    /// Execute a shell command on a unit's machine
    async fn exec(&self, unit: &str, command: &str) -> Result<ExecOutput>;

    /// Wait until every unit of `app` is settled, and optionally until it has
    /// exactly `exact_units` units
    async fn wait_for_idle(
        &self,
        app: &str,
        exact_units: Option<usize>,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let status = self.status().await?;
            if let Some(application) = status.application(app) {
                let count_ok = exact_units.map_or(true, |n| application.units.len() == n);
                let settled = !application.units.is_empty()
                    && application.units.iter().all(UnitStatus::is_settled);
                if count_ok && settled {
                    info!(app, units = application.units.len(), "application settled");
                    return Ok(());
                }
                debug!(app, units = application.units.len(), count_ok, settled, "waiting for idle");
            }

            if Instant::now() >= deadline {
                return Err(HarnessError::Orchestrator(format!(
                    "application {} did not settle within {:?}",
                    app, timeout
                )));
            }
            sleep(poll_interval).await;
        }
    }
}
