//! Self-healing service unit generation
//!
//! The data-store daemon must be restarted by systemd when it dies, otherwise
//! a "stopped" workload could hide a silently crashed daemon. The upstream
//! unit file is parsed into sections, a typed [`RestartPolicy`] is applied
//! and a complete unit is rendered to the override path, which systemd reads
//! in preference to the upstream one.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::info;

use crate::error::{HarnessError, Result};

/// Unit file shipped by the package
pub const UPSTREAM_UNIT_PATH: &str = "/lib/systemd/system/mongod.service";
/// Override location, read before the upstream path
pub const OVERRIDE_UNIT_PATH: &str = "/etc/systemd/system/mongod.service";

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('#') || trimmed.starts_with(';')
}

/// One logical line inside a section
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitLine {
    Directive { key: String, value: String },
    /// Comment or blank line, kept verbatim
    Verbatim(String),
}

/// `[Name]` plus its lines
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitSection {
    pub name: String,
    pub lines: Vec<UnitLine>,
}

impl UnitSection {
    fn new(name: impl Into<String>) -> Self {
        UnitSection {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            UnitLine::Directive { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Set `key` to `value`, replacing every existing occurrence with one
    /// line at the position of the first
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let first = self
            .lines
            .iter()
            .position(|l| matches!(l, UnitLine::Directive { key: k, .. } if k == key));

        match first {
            Some(index) => {
                self.lines[index] = UnitLine::Directive {
                    key: key.to_string(),
                    value,
                };
                let mut seen = 0;
                self.lines.retain(|l| match l {
                    UnitLine::Directive { key: k, .. } if k == key => {
                        seen += 1;
                        seen == 1
                    }
                    _ => true,
                });
            }
            None => {
                // After the last directive, ahead of trailing blank lines
                let at = self
                    .lines
                    .iter()
                    .rposition(|l| matches!(l, UnitLine::Directive { .. }))
                    .map_or(0, |i| i + 1);
                self.lines.insert(
                    at,
                    UnitLine::Directive {
                        key: key.to_string(),
                        value,
                    },
                );
            }
        }
    }
}

/// A parsed systemd unit file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnitFile {
    /// Lines before the first section header
    pub preamble: Vec<String>,
    pub sections: Vec<UnitSection>,
}

impl UnitFile {
    /// Lines ending in `\` continue onto the next one; a continued
    /// directive keeps its line breaks in `value` and renders as written.
    pub fn parse(text: &str) -> Self {
        let mut unit = UnitFile::default();
        let mut pending: Option<String> = None;

        for raw in text.lines() {
            let logical = match pending.take() {
                Some(mut joined) => {
                    joined.push('\n');
                    joined.push_str(raw);
                    joined
                }
                None => raw.to_string(),
            };

            if raw.trim_end().ends_with('\\') && !is_comment(&logical) {
                pending = Some(logical);
                continue;
            }
            unit.push_logical(logical);
        }
        if let Some(rest) = pending {
            unit.push_logical(rest);
        }
        unit
    }

    fn push_logical(&mut self, logical: String) {
        let trimmed = logical.trim();
        if !logical.contains('\n') && trimmed.starts_with('[') && trimmed.ends_with(']') {
            self.sections
                .push(UnitSection::new(&trimmed[1..trimmed.len() - 1]));
            return;
        }

        let line = match trimmed.split_once('=') {
            Some((key, value)) if !is_comment(trimmed) && !key.contains('\n') => {
                UnitLine::Directive {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                }
            }
            _ => UnitLine::Verbatim(logical.clone()),
        };

        match self.sections.last_mut() {
            Some(section) => section.lines.push(line),
            None => self.preamble.push(logical),
        }
    }

    pub fn section(&self, name: &str) -> Option<&UnitSection> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Section by name, appended if missing
    pub fn section_mut(&mut self, name: &str) -> &mut UnitSection {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(UnitSection::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.preamble {
            out.push_str(line);
            out.push('\n');
        }
        for section in &self.sections {
            out.push_str(&format!("[{}]\n", section.name));
            for line in &section.lines {
                match line {
                    UnitLine::Directive { key, value } => {
                        out.push_str(&format!("{}={}\n", key, value))
                    }
                    UnitLine::Verbatim(text) => {
                        out.push_str(text);
                        out.push('\n');
                    }
                }
            }
        }
        out
    }
}

/// systemd `Restart=` setting
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartMode {
    No,
    Always,
    OnFailure,
    OnAbnormal,
}

impl fmt::Display for RestartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestartMode::No => "no",
            RestartMode::Always => "always",
            RestartMode::OnFailure => "on-failure",
            RestartMode::OnAbnormal => "on-abnormal",
        })
    }
}

/// Restart behaviour and the limits that stop a crash loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart: RestartMode,
    /// Delay before each restart (default: 5s)
    pub restart_delay: Duration,
    /// Window for counting restarts (default: 500s)
    pub start_limit_interval: Duration,
    /// Restarts allowed within the window (default: 5)
    pub start_limit_burst: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            restart: RestartMode::Always,
            restart_delay: Duration::from_secs(5),
            start_limit_interval: Duration::from_secs(500),
            start_limit_burst: 5,
        }
    }
}

impl RestartPolicy {
    /// Write the policy into `[Unit]` and `[Service]`
    pub fn apply(&self, unit: &mut UnitFile) {
        let unit_section = unit.section_mut("Unit");
        unit_section.set(
            "StartLimitIntervalSec",
            self.start_limit_interval.as_secs().to_string(),
        );
        unit_section.set("StartLimitBurst", self.start_limit_burst.to_string());

        let service = unit.section_mut("Service");
        service.set("Restart", self.restart.to_string());
        service.set("RestartSec", format!("{}s", self.restart_delay.as_secs()));
    }
}

/// Render the upstream unit with `policy` applied
pub fn render_self_healing(upstream: &str, policy: &RestartPolicy) -> String {
    let mut unit = UnitFile::parse(upstream);
    policy.apply(&mut unit);
    unit.render()
}

/// Write the self-healing unit to `output` and optionally reload systemd
pub async fn install(
    upstream: &Path,
    output: &Path,
    policy: &RestartPolicy,
    reload: bool,
) -> Result<()> {
    let text = tokio::fs::read_to_string(upstream).await?;
    tokio::fs::write(output, render_self_healing(&text, policy)).await?;
    info!(upstream = %upstream.display(), output = %output.display(), "wrote self-healing unit");

    if reload {
        daemon_reload().await?;
    }
    Ok(())
}

/// Changes to unit files only take effect after a reload
pub async fn daemon_reload() -> Result<()> {
    let output = Command::new("systemctl")
        .arg("daemon-reload")
        .output()
        .await
        .map_err(|e| HarnessError::ProcessControl(format!("failed to run systemctl: {}", e)))?;

    if !output.status.success() {
        return Err(HarnessError::ProcessControl(format!(
            "systemctl daemon-reload failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
