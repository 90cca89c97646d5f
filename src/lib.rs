//! Failure-injection harness for a replicated MongoDB cluster deployed with Juju
//!
//! Runs a continuous write workload against the cluster, disrupts it, and
//! checks afterwards that every acknowledged write survived.

pub mod cleanup;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod scenario;
pub mod service_unit;
pub mod storage_reuse;
pub mod store;
pub mod topology;
pub mod verifier;
pub mod workload;
pub mod writer;

/// Testing utilities for integration tests.
pub mod testing;

pub use config::HarnessConfig;
pub use context::ClusterContext;
pub use error::{HarnessError, Result};
