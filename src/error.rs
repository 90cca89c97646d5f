//! Error taxonomy for the harness
//!
//! Resolution failures (topology, auth, connectivity) are fatal to the calling
//! test and never retried. `ConsistencyMismatch` is the failure signal of the
//! system under test, not a harness bug.

use thiserror::Error;

/// Errors surfaced by harness operations
#[derive(Debug, Error)]
pub enum HarnessError {
    /// No credential could be obtained from the cluster
    #[error("admin credential unavailable: {0}")]
    AuthResolution(String),

    /// No matching cluster, unit or host was found
    #[error("topology resolution failed: {0}")]
    TopologyResolution(String),

    /// None of the hosts could be reached, or a store operation failed in transit
    #[error("cannot reach cluster: {0}")]
    Connectivity(String),

    /// Highest acknowledged sequence number disagrees with the persisted count
    #[error(
        "consistency mismatch: last written number {last:?} (starting at {starting}) but {count} records persisted"
    )]
    ConsistencyMismatch {
        last: Option<i64>,
        count: u64,
        starting: i64,
    },

    /// Launching or terminating the write generator failed
    #[error("process control failed: {0}")]
    ProcessControl(String),

    /// The orchestration platform rejected a command or returned unreadable output
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    /// A scenario was driven through an illegal phase transition or timed out
    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Whether this error is the expected failure signal of the cluster under test
    pub fn is_consistency_mismatch(&self) -> bool {
        matches!(self, HarnessError::ConsistencyMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
