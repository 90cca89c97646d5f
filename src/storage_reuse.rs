//! Storage re-use verification
//!
//! After a unit is destroyed and a new unit is attached to its detached
//! volume, the new member should catch up from the primary by replaying the
//! missing oplog tail. A full initial sync means the reattached data was
//! thrown away. The member's own server log tells the two apart.

use serde_json::Value;
use tracing::{info, warn};

use crate::context::ClusterContext;
use crate::error::{HarnessError, Result};
use crate::orchestrator::UnitStatus;
use crate::topology;

/// How a member brought itself up to date
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    /// Caught up from the primary on top of existing data
    Incremental,
    /// Discarded local data and copied everything from a sync source
    FullResync,
    /// The trace shows neither
    Undetermined,
}

const FULL_RESYNC_MARKERS: &[&str] = &["initial sync"];

const INCREMENTAL_MARKERS: &[&str] = &[
    "sync source candidate",
    "changed sync source",
    "choosing sync source",
    "oplog fetcher",
    "syncing from",
];

/// Log lines of one member, oldest first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncTrace {
    lines: Vec<String>,
}

/// Component and message of one log line
struct LogEntry {
    component: String,
    message: String,
}

impl LogEntry {
    /// Structured (JSON) lines carry `c` and `msg`; anything else is treated
    /// as free text with an unknown component
    fn parse(line: &str) -> LogEntry {
        match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => LogEntry {
                component: value["c"].as_str().unwrap_or_default().to_string(),
                message: value["msg"].as_str().unwrap_or_default().to_lowercase(),
            },
            _ => LogEntry {
                component: String::new(),
                message: line.to_lowercase(),
            },
        }
    }

    fn shows_full_resync(&self) -> bool {
        self.component == "INITSYNC"
            || FULL_RESYNC_MARKERS.iter().any(|m| self.message.contains(m))
    }

    fn shows_catch_up(&self) -> bool {
        (self.component.is_empty() || self.component == "REPL")
            && INCREMENTAL_MARKERS.iter().any(|m| self.message.contains(m))
    }
}

impl SyncTrace {
    pub fn new(lines: Vec<String>) -> Self {
        SyncTrace { lines }
    }

    /// Build a trace from newline-separated log text
    pub fn from_text(text: &str) -> Self {
        SyncTrace::new(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Any initial-sync evidence wins over catch-up evidence
    pub fn classify(&self) -> SyncKind {
        let entries: Vec<LogEntry> = self.lines.iter().map(|l| LogEntry::parse(l)).collect();

        if entries.iter().any(LogEntry::shows_full_resync) {
            SyncKind::FullResync
        } else if entries.iter().any(LogEntry::shows_catch_up) {
            SyncKind::Incremental
        } else {
            SyncKind::Undetermined
        }
    }
}

/// Whether the member at `address` caught up incrementally.
///
/// Connects directly to that member with the cluster's admin credential and
/// inspects its log once.
pub async fn reused_storage(ctx: &ClusterContext, address: &str) -> Result<bool> {
    let descriptor = topology::resolve_descriptor(ctx).await?.direct(address);
    let store = ctx.open(&descriptor).await?;
    let trace = SyncTrace::new(store.log_lines().await?);
    let kind = trace.classify();

    info!(address, lines = trace.len(), ?kind, "inspected member sync trace");
    Ok(kind == SyncKind::Incremental)
}

/// Pool backing the application's storage, e.g. `rootfs`
pub async fn storage_type(ctx: &ClusterContext, app: &str) -> Result<Option<String>> {
    let prefix = format!("{}/", app);
    let storage = ctx.orchestrator().storage().await?;
    Ok(storage
        .into_iter()
        .filter(|s| s.unit.as_deref().is_some_and(|u| u.starts_with(&prefix)))
        .find_map(|s| s.pool))
}

/// Storage id attached to `unit`
pub async fn storage_id(ctx: &ClusterContext, unit: &str) -> Result<String> {
    ctx.orchestrator()
        .storage()
        .await?
        .into_iter()
        .find(|s| s.unit.as_deref() == Some(unit))
        .map(|s| s.id)
        .ok_or_else(|| HarnessError::TopologyResolution(format!("no storage attached to {}", unit)))
}

/// Add one unit to `app` attached to `storage_id` and return the new unit
pub async fn add_unit_with_storage(
    ctx: &ClusterContext,
    app: &str,
    storage_id: &str,
) -> Result<UnitStatus> {
    let config = ctx.config();
    let before = unit_names(ctx, app).await?;

    ctx.orchestrator()
        .add_unit(app, 1, Some(storage_id))
        .await?;
    ctx.orchestrator()
        .wait_for_idle(app, Some(before.len() + 1), config.idle_timeout, config.poll_interval)
        .await?;

    let status = ctx.orchestrator().status().await?;
    status
        .application(app)
        .and_then(|a| a.units.iter().find(|u| !before.contains(&u.name)))
        .cloned()
        .ok_or_else(|| {
            HarnessError::TopologyResolution(format!("no new unit appeared in {}", app))
        })
}

async fn unit_names(ctx: &ClusterContext, app: &str) -> Result<Vec<String>> {
    let status = ctx.orchestrator().status().await?;
    let app_status = status.application(app).ok_or_else(|| {
        HarnessError::TopologyResolution(format!("application {} not deployed", app))
    })?;
    Ok(app_status.units.iter().map(|u| u.name.clone()).collect())
}

/// Result of the storage re-use scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageReuseOutcome {
    /// Precondition not met (e.g. rootfs storage cannot be re-attached)
    Skipped { reason: String },
    Completed {
        removed_unit: String,
        new_unit: String,
        storage_id: String,
        reused: bool,
    },
}

/// Units kept so that removing one never loses the data set
const MIN_UNITS: usize = 2;

/// Destroy a unit, re-attach its storage to a new unit and check the new
/// member re-used it.
pub async fn run_storage_reuse_scenario(ctx: &ClusterContext) -> Result<StorageReuseOutcome> {
    let config = ctx.config();
    let app = topology::resolve_identity(ctx).await?.ok_or_else(|| {
        HarnessError::TopologyResolution(format!("no application running {}", config.family_marker))
    })?;
    let app = app.as_str();

    if storage_type(ctx, app).await?.as_deref() == Some("rootfs") {
        return Ok(StorageReuseOutcome::Skipped {
            reason: "storage re-use needs persistent storage, not rootfs".to_string(),
        });
    }

    // Removing the only replica would lose the data set
    let present = unit_names(ctx, app).await?.len();
    if present < MIN_UNITS {
        ctx.orchestrator()
            .add_unit(app, MIN_UNITS - present, None)
            .await?;
        ctx.orchestrator()
            .wait_for_idle(app, Some(MIN_UNITS), config.idle_timeout, config.poll_interval)
            .await?;
    }

    let units = unit_names(ctx, app).await?;
    let removed_unit = match units.as_slice() {
        [first, _, ..] => first.clone(),
        _ => {
            return Err(HarnessError::TopologyResolution(format!(
                "{} has {} unit(s), need at least {}",
                app,
                units.len(),
                MIN_UNITS
            )))
        }
    };
    let storage_id = storage_id(ctx, &removed_unit).await?;

    ctx.orchestrator().destroy_unit(&removed_unit).await?;
    ctx.orchestrator()
        .wait_for_idle(app, Some(units.len() - 1), config.idle_timeout, config.poll_interval)
        .await?;

    let new_unit = add_unit_with_storage(ctx, app, &storage_id).await?;
    let address = new_unit.public_address.clone().ok_or_else(|| {
        HarnessError::TopologyResolution(format!("{} has no public address", new_unit.name))
    })?;

    let reused = reused_storage(ctx, &address).await?;
    if !reused {
        warn!(unit = %new_unit.name, storage = %storage_id, "attached storage not re-used");
    }

    Ok(StorageReuseOutcome::Completed {
        removed_unit,
        new_unit: new_unit.name,
        storage_id,
        reused,
    })
}
