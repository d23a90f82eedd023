//! Cleanup hook: invoked on any exit path while a `TableJob` is
//! registered. Modeled as a guard value owned by the orchestrator rather
//! than a process-wide atexit pointer, plus a cooperative interrupt flag
//! wired to `Ctrl-C`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::companion;
use crate::session::SessionPair;

/// Tracks the OID of the table currently being reorganized, if any. The
/// orchestrator arms this once the shadow build's first transaction
/// commits and disarms it once drop succeeds. Exactly one job is
/// "in flight" at a time.
#[derive(Clone, Default)]
pub struct CleanupGuard {
    current_oid: Arc<std::sync::Mutex<Option<u32>>>,
}

impl CleanupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, target_oid: u32) {
        *self.current_oid.lock().expect("cleanup guard mutex poisoned") = Some(target_oid);
    }

    pub fn disarm(&self) {
        *self.current_oid.lock().expect("cleanup guard mutex poisoned") = None;
    }

    pub fn current(&self) -> Option<u32> {
        *self.current_oid.lock().expect("cleanup guard mutex poisoned")
    }
}

/// Runs the cleanup path for `target_oid`. If `fatal` is set, the process
/// state is already unsafe: print a terse banner and do not touch the
/// database. Otherwise roll back any open transaction, reconnect the
/// primary session if necessary, and invoke the companion's `drop`
/// helper. Idempotent, and safe to call when no workspace yet exists.
pub async fn run_cleanup(sessions: &mut SessionPair, target_oid: u32, fatal: bool) {
    if fatal {
        eprintln!(
            "pg-reorg: aborting without database cleanup (oid={target_oid}); \
             the next run will remove any leftover workspace objects"
        );
        return;
    }

    sessions.primary.rollback().await.ok();

    if sessions.ensure_primary().await.is_err() {
        error!(target_oid, "cleanup could not reestablish the primary session");
        return;
    }

    if let Err(err) = companion::drop_workspace(sessions.primary.client(), target_oid).await {
        error!(target_oid, %err, "cleanup failed to drop workspace objects");
    }
}

/// Cooperative interrupt flag set by a background `Ctrl-C` listener.
/// Checked by the orchestrator between phases; a real signal handler
/// would race with in-flight queries, so the orchestrator observes this
/// flag at safe checkpoints instead of trying to cancel mid-statement.
#[derive(Clone)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Spawns the `Ctrl-C` listener task and returns the shared flag.
    pub fn install() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let watched = flag.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("received interrupt signal");
                watched.store(true, Ordering::SeqCst);
            }
        });
        Self { flag }
    }

    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_starts_disarmed() {
        let guard = CleanupGuard::new();
        assert_eq!(guard.current(), None);
    }

    #[test]
    fn arm_then_disarm_round_trips() {
        let guard = CleanupGuard::new();
        guard.arm(42);
        assert_eq!(guard.current(), Some(42));
        guard.disarm();
        assert_eq!(guard.current(), None);
    }
}
