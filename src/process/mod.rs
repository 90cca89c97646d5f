//! Process control boundary
//!
//! - `ProcessRegistry`: launch, locate-by-signature, SIGKILL
//! - `SystemProcessRegistry`: implementation over the host process table

pub mod system;
pub mod traits;

pub use system::SystemProcessRegistry;
pub use traits::{ProcessId, ProcessInfo, ProcessRegistry};
