use std::time::Duration;

use reorg_core::job::{finalize_create_table, Mode};
use reorg_core::lock::{decide_escalation, statement_timeout_ms, EscalationAction};

fn sample_job_create_table() -> &'static str {
    "CREATE TABLE repack.table_16500 AS SELECT * FROM ONLY public.orders"
}

#[test]
fn clustered_table_without_index_redesign_still_gets_order_by() {
    let raw = sample_job_create_table();
    let finalized = finalize_create_table("public.orders", raw, &Mode::Clustered, Some("id")).unwrap();
    assert_eq!(
        finalized,
        "CREATE TABLE repack.table_16500 AS SELECT * FROM ONLY public.orders ORDER BY id"
    );
}

#[test]
fn vacuum_full_table_is_untouched_by_finalize() {
    let raw = sample_job_create_table();
    assert_eq!(finalize_create_table("public.orders", raw, &Mode::VacuumFull, None).unwrap(), raw);
}

/// Walks a simulated lock-acquisition timeline past both escalation
/// thresholds, the way `lock::acquire_exclusive_lock`'s loop would see
/// it across attempts, and checks the statement timeout and escalation
/// action stay consistent with each other at every step.
#[test]
fn escalation_timeline_is_monotonic_and_consistent_with_statement_timeout() {
    let wait_timeout = Duration::from_secs(10);
    let mut last_action = EscalationAction::None;

    for attempt in 0..40u32 {
        let elapsed = Duration::from_secs(u64::from(attempt));
        let action = decide_escalation(elapsed, wait_timeout, true);
        let timeout_ms = statement_timeout_ms(attempt);

        assert!(timeout_ms <= 1000);
        match (last_action, action) {
            (EscalationAction::None, _) => {}
            (EscalationAction::Cancel, EscalationAction::None) => {
                panic!("escalation must not downgrade from Cancel back to None")
            }
            (EscalationAction::Terminate, a) if a != EscalationAction::Terminate => {
                panic!("escalation must not downgrade from Terminate")
            }
            _ => {}
        }
        last_action = action;
    }

    assert_eq!(last_action, EscalationAction::Terminate);
}

#[test]
fn escalation_never_terminates_when_server_does_not_support_it() {
    let wait_timeout = Duration::from_secs(5);
    let elapsed = wait_timeout * 3;
    assert_eq!(
        decide_escalation(elapsed, wait_timeout, false),
        EscalationAction::Cancel
    );
}
