//! Swap & drop: short-lock relation swap, then workspace teardown, plus
//! the optional post-swap ANALYZE.

use std::time::Duration;

use tracing::warn;

use crate::companion;
use crate::error::Result;
use crate::job::TableJob;
use crate::lock::acquire_exclusive_lock;
use crate::session::{IsolationLevel, SessionPair};

pub struct SwapOptions {
    pub wait_timeout: Duration,
    pub server_supports_terminate: bool,
}

/// Acquires a second brief exclusive lock, performs a final drain,
/// atomically swaps the target and shadow, commits, then drops the
/// workspace in a fresh transaction. The caller disarms the cleanup
/// guard only after this returns `Ok`.
pub async fn swap_and_drop(sessions: &mut SessionPair, job: &TableJob, opts: &SwapOptions) -> Result<()> {
    acquire_exclusive_lock(
        sessions,
        job.target_oid,
        &job.lock_table,
        opts.wait_timeout,
        opts.server_supports_terminate,
    )
    .await?;

    companion::apply_log(sessions.primary.client(), job, 0).await?;
    companion::swap(sessions.primary.client(), job.target_oid).await?;
    sessions.primary.commit().await?;

    sessions.primary.begin(IsolationLevel::ReadCommitted).await?;
    companion::drop_workspace(sessions.primary.client(), job.target_oid).await?;
    sessions.primary.commit().await?;

    Ok(())
}

/// Optional post-swap ANALYZE. A separate transaction; its failure does
/// not undo the swap, so errors are logged, not propagated.
pub async fn analyze(sessions: &mut SessionPair, job: &TableJob) {
    let result = async {
        sessions.primary.begin(IsolationLevel::ReadCommitted).await?;
        sessions
            .primary
            .client()
            .batch_execute(&format!("ANALYZE {}", job.target_name))
            .await?;
        sessions.primary.commit().await
    }
    .await;

    if let Err(err) = result {
        warn!(table = %job.target_name, %err, "post-swap ANALYZE failed; table is already swapped");
        sessions.primary.rollback().await.ok();
    }
}
