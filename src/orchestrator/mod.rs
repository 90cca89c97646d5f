//! Orchestration platform boundary
//!
//! - `Orchestrator`: what the harness needs from the platform
//! - `JujuCli`: implementation driving the `juju` client

pub mod juju;
pub mod traits;

pub use juju::JujuCli;
pub use traits::{
    ActionResult, ApplicationStatus, ClusterStatus, ExecOutput, Orchestrator, StorageInstance,
    UnitStatus,
};
