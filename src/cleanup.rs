//! Cleanup between test runs
//!
//! `clear` stops the generator and drops the workload collections.
//! `with_continuous_writes` brackets a test body with start and clear so the
//! cluster is reset on every exit path, panics included.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{info, warn};

use crate::context::ClusterContext;
use crate::error::Result;
use crate::topology;
use crate::workload;

/// Stop any running generator, then drop the workload collections.
///
/// Every step is attempted even when an earlier one fails. A termination
/// failure is returned first, then the first failed drop. Clearing an
/// already clean cluster is a no-op.
pub async fn clear(ctx: &ClusterContext) -> Result<()> {
    let stopped = workload::terminate(ctx).await;
    if let Err(e) = &stopped {
        warn!(error = %e, "could not stop continuous writes, dropping collections anyway");
    }

    let store = ctx.connect().await?;
    let mut dropped = Ok(());
    for collection in ctx.config().workload_collections() {
        if let Err(e) = store.drop_collection(collection).await {
            warn!(collection, error = %e, "could not drop collection");
            if dropped.is_ok() {
                dropped = Err(e);
            }
        }
    }
    if dropped.is_ok() {
        info!(database = %ctx.config().database, "cleared workload collections");
    }

    stopped?;
    dropped
}

/// Start continuous writes at `starting_number`, run `body`, then `clear`.
///
/// `clear` runs whether `body` succeeds, fails or panics. A panic is resumed
/// after cleanup. An error from `body` takes precedence over a cleanup error.
pub async fn with_continuous_writes<F, Fut, T>(
    ctx: &ClusterContext,
    starting_number: i64,
    body: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = async {
        let descriptor = topology::resolve_descriptor(ctx).await?;
        workload::start(ctx, &descriptor, starting_number).await
    }
    .await;

    if let Err(e) = started {
        if let Err(cleanup) = clear(ctx).await {
            warn!(error = %cleanup, "cleanup after failed start also failed");
        }
        return Err(e);
    }

    let outcome = AssertUnwindSafe(body()).catch_unwind().await;
    let cleared = clear(ctx).await;

    match outcome {
        Err(panic) => {
            if let Err(cleanup) = &cleared {
                warn!(error = %cleanup, "cleanup after panicking body failed");
            }
            std::panic::resume_unwind(panic)
        }
        Ok(Err(e)) => {
            if let Err(cleanup) = cleared {
                warn!(error = %cleanup, "cleanup after failed body also failed");
            }
            Err(e)
        }
        Ok(Ok(value)) => cleared.map(|_| value),
    }
}
