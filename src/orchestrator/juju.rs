//! `juju` CLI implementation of [`Orchestrator`]
//!
//! Every call shells out to the `juju` client and parses its JSON output.
//! Supports both the juju 3 `run` action syntax and the 2.9 `run-action --wait`
//! syntax; their result documents share the same per-unit shape.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::traits::{
    ActionResult, ApplicationStatus, ClusterStatus, ExecOutput, Orchestrator, StorageInstance,
    UnitStatus,
};
use crate::error::{HarnessError, Result};

/// `{"current": "..."}` status value
#[derive(Debug, Default, Deserialize)]
struct StatusValue {
    #[serde(default)]
    current: String,
}

/// Unit entry of `juju status --format=json`
#[derive(Debug, Deserialize)]
struct UnitEntry {
    #[serde(rename = "public-address")]
    public_address: Option<String>,
    #[serde(rename = "workload-status", default)]
    workload_status: StatusValue,
    #[serde(rename = "juju-status", default)]
    agent_status: StatusValue,
}

/// Application entry of `juju status --format=json`
#[derive(Debug, Deserialize)]
struct ApplicationEntry {
    #[serde(default)]
    charm: String,
    #[serde(default)]
    units: BTreeMap<String, UnitEntry>,
}

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(default)]
    applications: BTreeMap<String, ApplicationEntry>,
}

/// Per-unit entry of an action result document
#[derive(Debug, Deserialize)]
struct ActionEntry {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StorageAttachments {
    #[serde(default)]
    units: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StorageEntry {
    attachments: Option<StorageAttachments>,
}

#[derive(Debug, Deserialize)]
struct FilesystemEntry {
    storage: Option<String>,
    pool: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageDocument {
    #[serde(default)]
    storage: BTreeMap<String, StorageEntry>,
    #[serde(default)]
    filesystems: BTreeMap<String, FilesystemEntry>,
}

/// Parse `juju status --format=json` output
pub fn parse_status(json: &str) -> Result<ClusterStatus> {
    let doc: StatusDocument = serde_json::from_str(json)
        .map_err(|e| HarnessError::Orchestrator(format!("unreadable status output: {}", e)))?;

    let applications = doc
        .applications
        .into_iter()
        .map(|(name, app)| {
            let mut units: Vec<UnitStatus> = app
                .units
                .into_iter()
                .map(|(unit_name, unit)| UnitStatus {
                    name: unit_name,
                    public_address: unit.public_address,
                    workload_status: unit.workload_status.current,
                    agent_status: unit.agent_status.current,
                })
                .collect();
            // "mongodb/10" sorts before "mongodb/2" as a string
            units.sort_by_key(|u| u.number().unwrap_or(u64::MAX));
            ApplicationStatus {
                name,
                charm: app.charm,
                units,
            }
        })
        .collect();

    Ok(ClusterStatus { applications })
}

/// Parse the output of `juju run` / `juju run-action --wait` for a single unit
pub fn parse_action(json: &str) -> Result<ActionResult> {
    let doc: BTreeMap<String, ActionEntry> = serde_json::from_str(json)
        .map_err(|e| HarnessError::Orchestrator(format!("unreadable action output: {}", e)))?;

    let entry = doc
        .into_values()
        .next()
        .ok_or_else(|| HarnessError::Orchestrator("action output has no unit entry".to_string()))?;

    let results = entry
        .results
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::String(s) => Some((key, s)),
            serde_json::Value::Number(n) => Some((key, n.to_string())),
            serde_json::Value::Bool(b) => Some((key, b.to_string())),
            _ => None,
        })
        .collect();

    Ok(ActionResult {
        status: entry.status,
        results,
    })
}

/// Parse `juju storage --format=json` output
pub fn parse_storage(json: &str) -> Result<Vec<StorageInstance>> {
    let doc: StorageDocument = serde_json::from_str(json)
        .map_err(|e| HarnessError::Orchestrator(format!("unreadable storage output: {}", e)))?;

    let pools: BTreeMap<String, String> = doc
        .filesystems
        .into_values()
        .filter_map(|fs| Some((fs.storage?, fs.pool?)))
        .collect();

    Ok(doc
        .storage
        .into_iter()
        .map(|(id, entry)| StorageInstance {
            unit: entry
                .attachments
                .and_then(|a| a.units.into_keys().next()),
            pool: pools.get(&id).cloned(),
            id,
        })
        .collect())
}

/// Orchestrator backed by the `juju` command-line client
#[derive(Debug, Clone)]
pub struct JujuCli {
    binary: String,
    model: Option<String>,
    legacy_actions: bool,
}

impl JujuCli {
    /// Use `juju` from PATH against the current model
    pub fn new() -> Self {
        JujuCli {
            binary: "juju".to_string(),
            model: None,
            legacy_actions: false,
        }
    }

    /// Target a specific model instead of the current one
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Use the juju 2.9 `run-action --wait` syntax
    pub fn with_legacy_actions(mut self, legacy: bool) -> Self {
        self.legacy_actions = legacy;
        self
    }

    /// Build a juju command: `juju <subcommand> [-m model] <args...>`
    fn command(&self, subcommand: &str, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(subcommand);
        if let Some(model) = &self.model {
            cmd.args(["-m", model.as_str()]);
        }
        cmd.args(args);
        cmd
    }

    /// Run a juju command and return stdout, failing on a non-zero exit
    async fn run(&self, subcommand: &str, args: &[&str]) -> Result<String> {
        debug!(subcommand, ?args, "juju");
        let output = self
            .command(subcommand, args)
            .output()
            .await
            .map_err(|e| HarnessError::Orchestrator(format!("failed to run juju {}: {}", subcommand, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::Orchestrator(format!(
                "juju {} failed: {}",
                subcommand,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for JujuCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Orchestrator for JujuCli {
    async fn status(&self) -> Result<ClusterStatus> {
        let out = self.run("status", &["--format=json"]).await?;
        parse_status(&out)
    }

    async fn run_action(&self, unit: &str, action: &str) -> Result<ActionResult> {
        let out = if self.legacy_actions {
            self.run("run-action", &[unit, action, "--wait", "--format=json"])
                .await?
        } else {
            self.run("run", &[unit, action, "--format=json"]).await?
        };
        parse_action(&out)
    }

    async fn add_unit(&self, app: &str, count: usize, attach_storage: Option<&str>) -> Result<()> {
        let count = count.to_string();
        let mut args = vec![app, "-n", count.as_str()];
        if let Some(storage) = attach_storage {
            args.extend(["--attach-storage", storage]);
        }
        self.run("add-unit", &args).await?;
        info!(app, count = %count, attach_storage, "added unit");
        Ok(())
    }

    async fn destroy_unit(&self, unit: &str) -> Result<()> {
        self.run("remove-unit", &[unit]).await?;
        info!(unit, "removed unit");
        Ok(())
    }

    async fn storage(&self) -> Result<Vec<StorageInstance>> {
        let out = self.run("storage", &["--format=json"]).await?;
        parse_storage(&out)
    }

    async fn exec(&self, unit: &str, command: &str) -> Result<ExecOutput> {
        let output = self
            .command("ssh", &[unit, "--", command])
            .output()
            .await
            .map_err(|e| HarnessError::Orchestrator(format!("failed to run juju ssh: {}", e)))?;

        Ok(ExecOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
