//! Lock escalator: acquires an exclusive lock on a target relation using
//! bounded-timeout retries, escalating to canceling or terminating
//! blocking sessions after configured thresholds.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{is_sqlstate, ReorgError, Result, SQLSTATE_QUERY_CANCELED};
use crate::session::{IsolationLevel, SessionPair};

/// Pure decision: given how long we have been waiting, whether we should
/// actively cancel or terminate blockers this attempt. Split out from the
/// I/O so the escalation thresholds can be unit-tested without a live
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationAction {
    None,
    Cancel,
    Terminate,
}

pub fn decide_escalation(
    elapsed: Duration,
    wait_timeout: Duration,
    server_supports_terminate: bool,
) -> EscalationAction {
    if elapsed > wait_timeout * 2 && server_supports_terminate {
        EscalationAction::Terminate
    } else if elapsed > wait_timeout {
        EscalationAction::Cancel
    } else {
        EscalationAction::None
    }
}

/// Per-attempt statement timeout: grows linearly by 100ms per attempt,
/// capped at 1000ms.
pub fn statement_timeout_ms(attempt: u32) -> u64 {
    std::cmp::min(1000, u64::from(attempt) * 100)
}

/// Acquires an exclusive lock on `target_oid` using `lock_sql` (an opaque
/// `LOCK TABLE ... IN ACCESS EXCLUSIVE MODE` fragment from the companion
/// extension) on the primary session, escalating via the secondary
/// session as attempts accumulate. On return, the current primary
/// transaction holds the lock. Any failure other than a statement-timeout
/// retry is surfaced as `ReorgError::LockExhausted`; the caller is
/// responsible for printing the server's error and exiting the process.
pub async fn acquire_exclusive_lock(
    sessions: &mut SessionPair,
    target_oid: u32,
    lock_sql: &str,
    wait_timeout: Duration,
    server_supports_terminate: bool,
) -> Result<()> {
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        sessions.primary.begin(IsolationLevel::ReadCommitted).await?;

        let elapsed = start.elapsed();
        match decide_escalation(elapsed, wait_timeout, server_supports_terminate) {
            EscalationAction::None => {}
            EscalationAction::Cancel => {
                debug!(target_oid, attempt, "escalating: canceling blockers");
                issue_cancel_or_terminate(sessions, target_oid, false).await?;
            }
            EscalationAction::Terminate => {
                info!(target_oid, attempt, "escalating: terminating blockers");
                issue_cancel_or_terminate(sessions, target_oid, true).await?;
            }
        }

        let timeout_ms = statement_timeout_ms(attempt);
        sessions
            .primary
            .client()
            .batch_execute(&format!("SET LOCAL statement_timeout = {timeout_ms}"))
            .await?;

        match sessions.primary.client().batch_execute(lock_sql).await {
            Ok(()) => {
                sessions
                    .primary
                    .client()
                    .batch_execute("SET LOCAL statement_timeout = 0")
                    .await?;
                return Ok(());
            }
            Err(err) if is_sqlstate(&err, SQLSTATE_QUERY_CANCELED) => {
                sessions.primary.rollback().await?;
                continue;
            }
            Err(err) => {
                sessions.primary.rollback().await.ok();
                return Err(ReorgError::LockExhausted {
                    table: target_oid.to_string(),
                    source: err,
                });
            }
        }
    }
}

/// Issues a cancel (or terminate) against every other session holding a
/// lock on `target_oid`, from the secondary session so it never shares a
/// transaction with the primary's own attempt.
async fn issue_cancel_or_terminate(
    sessions: &mut SessionPair,
    target_oid: u32,
    terminate: bool,
) -> Result<()> {
    sessions.ensure_secondary().await?;
    let func = if terminate { "pg_terminate_backend" } else { "pg_cancel_backend" };
    let sql = format!(
        "SELECT {func}(pid) FROM pg_locks \
         WHERE relation = $1::oid AND pid <> pg_backend_pid()"
    );
    sessions
        .secondary
        .client()
        .query(&sql, &[&(target_oid as i64)])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_escalation_before_wait_timeout() {
        let action = decide_escalation(Duration::from_secs(10), Duration::from_secs(60), true);
        assert_eq!(action, EscalationAction::None);
    }

    #[test]
    fn cancel_after_wait_timeout_before_double() {
        let action = decide_escalation(Duration::from_secs(61), Duration::from_secs(60), true);
        assert_eq!(action, EscalationAction::Cancel);
    }

    #[test]
    fn terminate_after_double_wait_timeout_when_supported() {
        let action = decide_escalation(Duration::from_secs(121), Duration::from_secs(60), true);
        assert_eq!(action, EscalationAction::Terminate);
    }

    #[test]
    fn terminate_downgrades_to_cancel_when_unsupported() {
        let action = decide_escalation(Duration::from_secs(121), Duration::from_secs(60), false);
        assert_eq!(action, EscalationAction::Cancel);
    }

    #[test]
    fn statement_timeout_grows_linearly_then_caps() {
        assert_eq!(statement_timeout_ms(1), 100);
        assert_eq!(statement_timeout_ms(5), 500);
        assert_eq!(statement_timeout_ms(20), 1000);
        assert_eq!(statement_timeout_ms(100), 1000);
    }
}
