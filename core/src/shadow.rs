//! Shadow builder: creates the log table, trigger, shadow table, and
//! indexes for one target, then holds the SERIALIZABLE copy transaction
//! open long enough to capture the snapshot vxid that the drainer later
//! waits on.

use std::time::Duration;

use tracing::warn;

use crate::cleanup::CleanupGuard;
use crate::companion;
use crate::error::{ReorgError, Result};
use crate::job::TableJob;
use crate::lock::acquire_exclusive_lock;
use crate::session::{IsolationLevel, SessionPair};

/// Everything the drainer and the swap step need once the shadow has
/// been built and the copy transaction is still open: the virtual
/// transaction ids concurrent with the copy's snapshot.
pub struct ShadowBuildResult {
    pub snapshot_vxids: Vec<String>,
}

pub struct ShadowBuildOptions {
    pub wait_timeout: Duration,
    pub server_supports_terminate: bool,
    /// True for vacuum-full mode (`--no-order`): disables
    /// `synchronize_seqscans` during the copy and does not require a
    /// clustering key.
    pub vacuum_full: bool,
}

/// Builds the workspace for `job` and leaves the primary session sitting
/// inside the still-open SERIALIZABLE copy transaction (its `create_table`
/// has already executed, see below). Returns the snapshot vxid list
/// the drainer must wait out.
///
/// Arms `guard` immediately after the step-5 commit, before the copy
/// transaction begins: from that point the log table and trigger are
/// live on the target, so any later failure in this function (or in the
/// caller) must still run teardown rather than leaving them orphaned.
pub async fn build_shadow(
    sessions: &mut SessionPair,
    job: &TableJob,
    opts: &ShadowBuildOptions,
    guard: &CleanupGuard,
) -> Result<ShadowBuildResult> {
    // 1. Acquire brief exclusive lock on target.
    acquire_exclusive_lock(
        sessions,
        job.target_oid,
        &job.lock_table,
        opts.wait_timeout,
        opts.server_supports_terminate,
    )
    .await?;

    // 2. conflicted_triggers check, inside the lock's still-open transaction.
    let conflicts = companion::conflicted_triggers(sessions.primary.client(), job.target_oid).await?;
    if let Some(trigger) = conflicts.first() {
        sessions.primary.rollback().await.ok();
        return Err(ReorgError::Precondition {
            table: job.target_name.clone(),
            reason: format!("trigger {trigger} conflicted for {}", job.target_name),
        });
    }

    // 3. create_pktype, create_log, create_trigger, enable_trigger.
    sessions.primary.client().batch_execute(&job.create_pktype).await?;
    sessions.primary.client().batch_execute(&job.create_log).await?;
    sessions.primary.client().batch_execute(&job.create_trigger).await?;
    sessions.primary.client().batch_execute(&job.enable_trigger).await?;

    // 4. Disable autovacuum on the log table.
    companion::disable_autovacuum(sessions.primary.client(), &job.log_table_name()).await?;

    // 5. Commit, then arm the cleanup guard: the log table and trigger
    // are now live on the target, so from here on a failure must still
    // drop them.
    sessions.primary.commit().await?;
    guard.arm(job.target_oid);

    // 6. Begin SERIALIZABLE, tune work_mem, optionally disable
    // synchronize_seqscans for vacuum-full mode.
    sessions.primary.begin(IsolationLevel::Serializable).await?;
    sessions
        .primary
        .client()
        .batch_execute("SELECT set_config('work_mem', current_setting('maintenance_work_mem'), true)")
        .await?;
    if opts.vacuum_full {
        sessions
            .primary
            .client()
            .batch_execute("SET LOCAL synchronize_seqscans = off")
            .await?;
    }

    // 7. Capture the snapshot vxid.
    let snapshot_vxids = companion::snapshot_vxids(sessions.primary.client()).await?;

    // 8. Purge residual log entries from a prior aborted run before the
    // copy statement runs, so the copy's transactional view sees both the
    // base rows and an empty log.
    sessions.primary.client().batch_execute(&job.delete_log).await?;

    // 9. Execute the (already mode-finalized) create_table fragment.
    sessions.primary.client().batch_execute(&job.create_table).await?;

    // 10. Optional drop_columns.
    if let Some(drop_columns) = &job.drop_columns {
        sessions.primary.client().batch_execute(drop_columns).await?;
    }

    // 11. Disable autovacuum on the shadow table.
    companion::disable_autovacuum(sessions.primary.client(), &job.table_table_name()).await?;

    // 12. Commit.
    sessions.primary.commit().await?;

    Ok(ShadowBuildResult { snapshot_vxids })
}

/// Index-rebuild substep: rebuilds every valid index of the target,
/// sequentially, on the primary session in autocommit mode. A failure
/// rebuilding any one index aborts the whole table, unlike the analyze
/// step, whose failure is swallowed instead.
pub async fn rebuild_indexes(sessions: &mut SessionPair, job: &TableJob) -> Result<()> {
    let indexes = companion::target_indexes(sessions.primary.client(), job.target_oid).await?;
    for index in indexes {
        if !index.is_valid {
            warn!(index = %index.original_definition, "skipping invalid index");
            continue;
        }
        sessions.primary.client().batch_execute(&index.rebuild_sql).await?;
    }
    Ok(())
}
