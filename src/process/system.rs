//! Process registry backed by the host's process table

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessStatus, Signal, System};
use tokio::process::Command;

use super::traits::{ProcessId, ProcessInfo, ProcessRegistry};
use crate::error::{HarnessError, Result};

/// Launches processes with tokio and inspects/signals them through `sysinfo`
pub struct SystemProcessRegistry {
    system: Mutex<System>,
    own_pid: u32,
}

impl SystemProcessRegistry {
    pub fn new() -> Self {
        SystemProcessRegistry {
            system: Mutex::new(System::new()),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SystemProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRegistry for SystemProcessRegistry {
    async fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessId> {
        // Dropping the child leaves it running; the runtime reaps it once it exits
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| {
                HarnessError::ProcessControl(format!("failed to launch {}: {}", program.display(), e))
            })?;

        child
            .id()
            .map(ProcessId)
            .ok_or_else(|| HarnessError::ProcessControl(format!("{} exited immediately", program.display())))
    }

    async fn find(&self, signature: &str) -> Result<Vec<ProcessInfo>> {
        let mut system = self.system.lock();
        system.refresh_processes();

        let mut found: Vec<ProcessInfo> = system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                // Linux lists every thread as a task sharing the command line
                pid.as_u32() != self.own_pid
                    && process.thread_kind().is_none()
                    && process.status() != ProcessStatus::Zombie
            })
            .filter_map(|(pid, process)| {
                let command_line = process.cmd().join(" ");
                command_line.contains(signature).then(|| ProcessInfo {
                    pid: ProcessId(pid.as_u32()),
                    command_line,
                })
            })
            .collect();
        found.sort_by_key(|p| p.pid);
        Ok(found)
    }

    async fn kill(&self, pid: ProcessId) -> Result<()> {
        let mut system = self.system.lock();
        let sys_pid = Pid::from_u32(pid.0);
        if !system.refresh_process(sys_pid) {
            return Ok(());
        }

        match system.process(sys_pid).map(|p| p.kill_with(Signal::Kill)) {
            None | Some(Some(true)) => Ok(()),
            Some(None) => Err(HarnessError::ProcessControl(
                "SIGKILL not supported on this platform".to_string(),
            )),
            Some(Some(false)) => {
                // Lost the race with the process exiting on its own
                if system.refresh_process(sys_pid) {
                    Err(HarnessError::ProcessControl(format!("failed to kill pid {}", pid.0)))
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_find_excludes_own_process() {
        let registry = SystemProcessRegistry::new();
        let own = std::process::id();
        // Our own command line contains the test binary name
        let name = std::env::args().next().unwrap_or_default();
        let found = registry.find(&name).await.unwrap();
        assert!(found.iter().all(|p| p.pid.0 != own));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_find_skips_threads() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _ = rx.recv();
        });

        let tasks: Vec<u32> = std::fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        assert!(tasks.len() > 1);

        let registry = SystemProcessRegistry::new();
        let name = std::env::args().next().unwrap_or_default();
        let found = registry.find(&name).await.unwrap();
        assert!(found.iter().all(|p| !tasks.contains(&p.pid.0)), "{:?}", found);

        tx.send(()).unwrap();
        worker.join().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_counts_processes() {
        let registry = SystemProcessRegistry::new();
        let marker = format!("ha-harness-terminate-{}", std::process::id());
        let args = ["-c".to_string(), "sleep 5; true".to_string(), marker.clone()];
        registry.launch(Path::new("sh"), &args).await.unwrap();

        let killed = registry
            .terminate_matching(&marker, Duration::from_secs(5), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(killed, 1);
        assert!(registry.find(&marker).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kill_missing_pid_is_ok() {
        let registry = SystemProcessRegistry::new();
        registry.kill(ProcessId(u32::MAX - 1)).await.unwrap();
    }
}
