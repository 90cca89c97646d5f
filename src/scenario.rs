//! Disruption scenarios
//!
//! A disruption run moves through
//! `Idle -> WorkloadRunning -> (disruption) -> WorkloadRunning -> StoppedAndVerified -> Cleared`.
//! Cleanup may happen from any phase. A failed verification is reported
//! once and never retried.

use std::fmt;

use rand::seq::IndexedRandom;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::cleanup;
use crate::context::ClusterContext;
use crate::error::{HarnessError, Result};
use crate::topology;
use crate::verifier::{self, VerificationResult};
use crate::workload;

/// Phase of a disruption run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WorkloadRunning,
    StoppedAndVerified,
    Cleared,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::WorkloadRunning => "workload-running",
            Phase::StoppedAndVerified => "stopped-and-verified",
            Phase::Cleared => "cleared",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of one run and rejects illegal transitions
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    current: Phase,
    history: Vec<Phase>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        PhaseTracker {
            current: Phase::Idle,
            history: vec![Phase::Idle],
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    /// Every phase entered so far, starting with `Idle`
    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    fn allowed(from: Phase, to: Phase) -> bool {
        matches!(
            (from, to),
            (Phase::Idle, Phase::WorkloadRunning)
                | (Phase::WorkloadRunning, Phase::WorkloadRunning)
                | (Phase::WorkloadRunning, Phase::StoppedAndVerified)
                | (_, Phase::Cleared)
        )
    }

    pub fn advance(&mut self, to: Phase) -> Result<()> {
        if !Self::allowed(self.current, to) {
            return Err(HarnessError::Scenario(format!(
                "illegal transition {} -> {}",
                self.current, to
            )));
        }
        self.current = to;
        self.history.push(to);
        Ok(())
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// What the kill/restart scenario observed
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    /// Unit whose daemon was killed
    pub disrupted_unit: String,
    /// Last number seen before the disruption
    pub number_before_disruption: i64,
    pub verification: VerificationResult,
    pub phases: Vec<Phase>,
}

/// `-f` pattern matching `process` but not the command line carrying the
/// pattern itself (`/usr/bin/mongod` -> `'[/]usr/bin/mongod'`)
fn self_excluding_pattern(process: &str) -> String {
    let mut chars = process.chars();
    match chars.next() {
        Some(first) => format!("'[{}]{}'", first, chars.as_str()),
        None => String::new(),
    }
}

/// SIGKILL the data-store daemon on `unit`
pub async fn kill_daemon(ctx: &ClusterContext, unit: &str) -> Result<()> {
    let pattern = self_excluding_pattern(&ctx.config().daemon_process);
    let command = format!("sudo pkill -9 -f {}", pattern);
    let output = ctx.orchestrator().exec(unit, &command).await?;
    if !output.success {
        return Err(HarnessError::Scenario(format!(
            "no {} process killed on {}: {}",
            ctx.config().daemon_process,
            unit,
            output.stderr.trim()
        )));
    }
    info!(unit, process = %ctx.config().daemon_process, "killed daemon");
    Ok(())
}

/// PIDs of the data-store daemon on `unit`; empty when none is running
pub async fn daemon_pids(ctx: &ClusterContext, unit: &str) -> Result<Vec<u32>> {
    let command = format!("pgrep -f {}", self_excluding_pattern(&ctx.config().daemon_process));
    let output = ctx.orchestrator().exec(unit, &command).await?;
    if !output.success {
        return Ok(Vec::new());
    }
    Ok(output
        .stdout
        .split_whitespace()
        .filter_map(|pid| pid.parse().ok())
        .collect())
}

/// Wait until the service manager has restarted the daemon on `unit`.
///
/// A killed daemon can linger in the process table for a moment, so only a
/// PID outside `previous` counts as a restart.
pub async fn wait_for_daemon_restart(
    ctx: &ClusterContext,
    unit: &str,
    previous: &[u32],
) -> Result<u32> {
    let config = ctx.config();
    let deadline = Instant::now() + config.restart_timeout;

    loop {
        let pids = daemon_pids(ctx, unit).await?;
        if let Some(pid) = pids.iter().copied().find(|pid| !previous.contains(pid)) {
            info!(unit, pid, "daemon running again");
            return Ok(pid);
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::Scenario(format!(
                "{} on {} not restarted within {:?}",
                config.daemon_process, unit, config.restart_timeout
            )));
        }
        sleep(config.poll_interval).await;
    }
}

/// Wait until a record numbered above `floor` is visible
pub async fn wait_for_writes_beyond(ctx: &ClusterContext, floor: i64) -> Result<i64> {
    let config = ctx.config();
    let deadline = Instant::now() + config.restart_timeout;

    loop {
        // The cluster may still be electing a primary; keep polling through errors
        match verifier::last_written(ctx).await {
            Ok(Some(record)) if record.number > floor => return Ok(record.number),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "last written not readable yet"),
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::Scenario(format!(
                "no write beyond {} within {:?}",
                floor, config.restart_timeout
            )));
        }
        sleep(config.poll_interval).await;
    }
}

/// Start writes at 1, kill the daemon on a random unit, wait for it to
/// restart itself, then stop and check that nothing was lost.
///
/// Returns `ConsistencyMismatch` when the count and the last number disagree.
pub async fn kill_and_verify(ctx: &ClusterContext) -> Result<ScenarioReport> {
    const STARTING_NUMBER: i64 = 1;

    let mut phases = PhaseTracker::new();
    let identity = topology::resolve_identity(ctx).await?.ok_or_else(|| {
        HarnessError::TopologyResolution(format!(
            "no application running {}",
            ctx.config().family_marker
        ))
    })?;

    phases.advance(Phase::WorkloadRunning)?;
    let tracker = &mut phases;
    let outcome = cleanup::with_continuous_writes(ctx, STARTING_NUMBER, move || async move {
        let before = wait_for_writes_beyond(ctx, STARTING_NUMBER - 1).await?;

        let status = ctx.orchestrator().status().await?;
        let units: Vec<String> = status
            .application(identity.as_str())
            .map(|app| app.units.iter().map(|u| u.name.clone()).collect())
            .unwrap_or_default();
        let unit = units
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| HarnessError::TopologyResolution(format!("{} has no units", identity)))?;

        let previous = daemon_pids(ctx, &unit).await?;
        kill_daemon(ctx, &unit).await?;
        wait_for_daemon_restart(ctx, &unit, &previous).await?;
        wait_for_writes_beyond(ctx, before).await?;
        tracker.advance(Phase::WorkloadRunning)?;

        workload::stop(ctx).await?;
        let verification = verifier::verify(ctx, STARTING_NUMBER).await?;
        tracker.advance(Phase::StoppedAndVerified)?;
        Ok((unit, before, verification))
    })
    .await;
    phases.advance(Phase::Cleared)?;

    let (disrupted_unit, number_before_disruption, verification) = outcome?;
    let verification = verification.ensure_consistent()?;
    Ok(ScenarioReport {
        disrupted_unit,
        number_before_disruption,
        verification,
        phases: phases.history().to_vec(),
    })
}
