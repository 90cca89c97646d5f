//! Process registry abstraction
//!
//! The harness never keeps a handle on the generator it launched. It finds
//! the process again by a command-line signature, which also catches a
//! generator left behind by a previous, crashed harness run.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// Operating-system process identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

/// A live process as seen in the process table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    /// Full command line, arguments separated by spaces
    pub command_line: String,
}

/// Launch and signal processes on the test host
#[async_trait]
pub trait ProcessRegistry: Send + Sync {
    /// Start `program` detached with positional `args`; returns without waiting
    async fn launch(&self, program: &Path, args: &[String]) -> Result<ProcessId>;

    /// Live processes whose command line contains `signature`, excluding the caller
    async fn find(&self, signature: &str) -> Result<Vec<ProcessInfo>>;

    /// Send SIGKILL. A process that is already gone is not an error.
    async fn kill(&self, pid: ProcessId) -> Result<()>;

    /// Kill every process matching `signature` and wait until none is left.
    ///
    /// Returns how many processes were signalled; zero when nothing was running.
    async fn terminate_matching(
        &self,
        signature: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<usize> {
        let targets = self.find(signature).await?;
        let mut failures = self.kill_all(&targets).await;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = self.find(signature).await?;
            if remaining.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                let mut message = format!(
                    "{} process(es) matching {:?} still alive after {:?}",
                    remaining.len(),
                    signature,
                    timeout
                );
                if !failures.is_empty() {
                    message.push_str(&format!(" ({})", failures.join("; ")));
                }
                return Err(HarnessError::ProcessControl(message));
            }
            // Retry stragglers, e.g. a generator forked between find and kill
            failures = self.kill_all(&remaining).await;
            sleep(poll_interval).await;
        }

        if !targets.is_empty() {
            info!(count = targets.len(), signature, "terminated processes");
        }
        Ok(targets.len())
    }

    /// SIGKILL each process, carrying on past failures. Returns one message
    /// per failed kill.
    async fn kill_all(&self, targets: &[ProcessInfo]) -> Vec<String> {
        let mut failures = Vec::new();
        for process in targets {
            debug!(pid = process.pid.0, "sending SIGKILL");
            if let Err(e) = self.kill(process.pid).await {
                warn!(pid = process.pid.0, error = %e, "SIGKILL failed");
                failures.push(format!("pid {}: {}", process.pid.0, e));
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;

    /// Registry whose kill of pid 1 fails a set number of times
    struct StubbornFirst {
        alive: Mutex<BTreeSet<u32>>,
        failures_left: Mutex<u32>,
    }

    impl StubbornFirst {
        fn new(failures: u32) -> Self {
            StubbornFirst {
                alive: Mutex::new([1, 2, 3].into_iter().collect()),
                failures_left: Mutex::new(failures),
            }
        }
    }

    #[async_trait]
    impl ProcessRegistry for StubbornFirst {
        async fn launch(&self, _program: &Path, _args: &[String]) -> Result<ProcessId> {
            unreachable!()
        }

        async fn find(&self, _signature: &str) -> Result<Vec<ProcessInfo>> {
            Ok(self
                .alive
                .lock()
                .iter()
                .map(|pid| ProcessInfo {
                    pid: ProcessId(*pid),
                    command_line: format!("writer {}", pid),
                })
                .collect())
        }

        async fn kill(&self, pid: ProcessId) -> Result<()> {
            if pid.0 == 1 {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left = left.saturating_sub(1);
                    return Err(HarnessError::ProcessControl("permission denied".to_string()));
                }
            }
            self.alive.lock().remove(&pid.0);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_kill_does_not_spare_the_rest() {
        let registry = StubbornFirst::new(1);
        let killed = registry
            .terminate_matching("writer", Duration::from_secs(1), Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(killed, 3);
        assert!(registry.alive.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unkillable_process_reports_failure() {
        let registry = StubbornFirst::new(u32::MAX);
        let err = registry
            .terminate_matching("writer", Duration::from_millis(20), Duration::from_millis(1))
            .await
            .unwrap_err();

        assert!(matches!(&err, HarnessError::ProcessControl(m) if m.contains("permission denied")));
        assert_eq!(*registry.alive.lock(), BTreeSet::from([1]));
    }
}
