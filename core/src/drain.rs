//! Log drainer: repeatedly applies captured changes to the shadow table
//! in bounded batches until convergence.

use std::time::Duration;

use tracing::info;

use crate::companion;
use crate::error::Result;
use crate::job::TableJob;
use crate::session::SessionPair;

/// Number of log rows processed per `apply_log` call. Larger values could
/// be faster but make each batch's implicit transaction longer-lived.
pub const APPLY_COUNT: i32 = 1000;

/// Pure convergence check, split out from the I/O loop so it can be unit
/// tested: the drain only stops once a batch produced no rows *and* no
/// pre-snapshot transaction is still alive.
pub fn should_continue(processed: i64, alive_count: usize) -> bool {
    processed > 0 || alive_count > 0
}

/// Drains the log until convergence: no new rows to apply and no
/// transaction concurrent with the copy's snapshot is still running. Has
/// no overall timeout by design; a stuck blocker is expected to surface
/// through the lock escalator on the eventual swap attempt instead.
pub async fn drain_log(sessions: &mut SessionPair, job: &TableJob, snapshot_vxids: &[String]) -> Result<()> {
    let mut last_reported: Option<usize> = None;

    loop {
        let processed = companion::apply_log(sessions.primary.client(), job, APPLY_COUNT).await?;
        if processed > 0 {
            continue;
        }

        let alive = companion::alive_vxids(sessions.primary.client(), snapshot_vxids).await?;
        if !should_continue(0, alive.len()) {
            break;
        }

        if last_reported != Some(alive.len()) {
            if let Some((_, first_pid)) = alive.first() {
                info!(
                    waiting_on = alive.len(),
                    first_pid, "waiting for pre-snapshot transactions to finish"
                );
            }
            last_reported = Some(alive.len());
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continues_while_rows_still_processed() {
        assert!(should_continue(5, 0));
    }

    #[test]
    fn continues_while_transactions_still_alive() {
        assert!(should_continue(0, 3));
    }

    #[test]
    fn stops_only_when_both_conditions_clear() {
        assert!(!should_continue(0, 0));
    }
}
