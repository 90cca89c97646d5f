//! Workload process control
//!
//! Starts the external write generator and stops it by signature. At most one
//! generator should run per host; starting a second one without stopping the
//! first gives two writers with overlapping numbers, which this module does
//! not guard against.

use tracing::info;

use crate::context::ClusterContext;
use crate::error::Result;
use crate::process::ProcessId;
use crate::store::WriteRecord;
use crate::topology::ConnectionDescriptor;
use crate::verifier;

/// Launch the generator with `[uri, starting_number]` and return immediately.
///
/// Does not wait for the first write; callers poll if they need one.
pub async fn start(
    ctx: &ClusterContext,
    descriptor: &ConnectionDescriptor,
    starting_number: i64,
) -> Result<ProcessId> {
    let config = ctx.config();
    let args = [descriptor.uri(), starting_number.to_string()];
    let pid = ctx
        .processes()
        .launch(&config.writer_program, &args)
        .await?;

    info!(
        pid = pid.0,
        starting_number,
        hosts = %descriptor.hosts().join(","),
        "started continuous writes"
    );
    Ok(pid)
}

/// SIGKILL every running generator and wait for it to exit.
///
/// Returns the number of processes terminated; zero is not an error.
pub async fn terminate(ctx: &ClusterContext) -> Result<usize> {
    let config = ctx.config();
    ctx.processes()
        .terminate_matching(
            &config.writer_signature,
            config.stop_timeout,
            config.poll_interval,
        )
        .await
}

/// Stop the generator, then return the highest-numbered persisted record.
///
/// Safe to call with no generator running. `None` covers both "nothing was
/// ever written" and "no record found".
pub async fn stop(ctx: &ClusterContext) -> Result<Option<WriteRecord>> {
    let terminated = terminate(ctx).await?;
    let last = verifier::last_written(ctx).await?;
    info!(
        terminated,
        last_number = last.as_ref().map(|r| r.number),
        "stopped continuous writes"
    );
    Ok(last)
}
