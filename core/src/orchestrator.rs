//! Orchestrator: sequences the protocol per table, per database. Control
//! flow per table: enumerator -> lock_escalator(brief)
//! -> shadow_builder -> serializable copy -> log_drainer ->
//! snapshot_waiter (folded into the drainer) -> lock_escalator(brief) ->
//! swap -> drop -> optional analyze.

use std::time::Duration;

use tokio_postgres::Config;
use tracing::{error, info, warn};

use crate::cleanup::{run_cleanup, CleanupGuard, Interrupt};
use crate::companion::{self, ProbeOutcome};
use crate::enumerator::enumerate_targets;
use crate::error::{is_sqlstate, ReorgError, Result, SQLSTATE_INVALID_SCHEMA_NAME};
use crate::job::{DatabaseOutcome, Mode, TableJob};
use crate::session::SessionPair;
use crate::shadow::{build_shadow, rebuild_indexes, ShadowBuildOptions};
use crate::swap::{analyze, swap_and_drop, SwapOptions};

/// The client's own identity string. Must equal both the companion
/// library's reported version and the installed extension's version.
pub fn program_identity() -> String {
    format!("pg-reorg {}", env!("CARGO_PKG_VERSION"))
}

/// Parsed run configuration: the CLI's responsibility to build, the
/// orchestrator's responsibility to execute.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub all_databases: bool,
    pub table: Option<String>,
    pub mode: Mode,
    pub wait_timeout: Duration,
    pub no_analyze: bool,
}

impl RunOptions {
    /// Configuration-error class: `--all` and `--table` are
    /// mutually exclusive, and clustered mode needs no extra flag
    /// validation here (the clustering-key requirement is enforced by
    /// the enumerator's filter and, per table, by `TableJob::has_clustering_key`).
    pub fn validate(&self) -> Result<()> {
        if self.all_databases && self.table.is_some() {
            return Err(ReorgError::Configuration(
                "--all and --table are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Orchestrator {
    guard: CleanupGuard,
    interrupt: Interrupt,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self {
            guard: CleanupGuard::new(),
            interrupt: Interrupt::install(),
        }
    }

    /// Single-database flow: version probe, session setup,
    /// enumerate targets, process each. Returns the number of tables
    /// successfully processed, or an error if the whole database run
    /// should be considered failed (configuration or version mismatch).
    pub async fn run_database(&self, config: Config, opts: &RunOptions) -> Result<DatabaseOutcome> {
        let database = config
            .get_dbname()
            .unwrap_or("postgres")
            .to_string();

        let mut sessions = match SessionPair::connect(config).await {
            Ok(sessions) => sessions,
            Err(err) => {
                return Ok(DatabaseOutcome::Failed {
                    database,
                    error: err.to_string(),
                })
            }
        };

        match companion::probe(sessions.primary.client(), &program_identity()).await {
            Ok(ProbeOutcome::Ok) => {}
            Ok(ProbeOutcome::Skip(reason)) => return Ok(DatabaseOutcome::Skipped { database, reason }),
            Err(err) => {
                return Ok(DatabaseOutcome::Failed {
                    database,
                    error: err.to_string(),
                })
            }
        }

        sessions
            .primary
            .client()
            .batch_execute(
                "SET statement_timeout = 0; \
                 SET search_path = repack, pg_catalog; \
                 SET client_min_messages = warning",
            )
            .await?;

        let server_supports_terminate = server_supports_session_termination(&mut sessions).await?;

        let jobs = match enumerate_targets(sessions.primary.client(), opts.table.as_deref(), &opts.mode).await {
            Ok(jobs) => jobs,
            Err(err) => {
                if let ReorgError::Database(db_err) = &err {
                    if is_sqlstate(db_err, SQLSTATE_INVALID_SCHEMA_NAME) {
                        return Ok(DatabaseOutcome::Skipped {
                            database,
                            reason: "not installed".to_string(),
                        });
                    }
                }
                return Ok(DatabaseOutcome::Failed {
                    database,
                    error: err.to_string(),
                });
            }
        };

        let mut tables_done = 0usize;
        for job in &jobs {
            if self.interrupt.requested() {
                warn!("interrupt requested; stopping before next table");
                break;
            }

            if !job.has_primary_key() {
                error!(table = %job.target_name, "table has no primary key; skipping");
                continue;
            }
            if opts.mode.requires_clustering_key() && !job.has_clustering_key() {
                error!(table = %job.target_name, "table has no clustering key; skipping");
                continue;
            }

            match self
                .process_table(&mut sessions, job, opts, server_supports_terminate)
                .await
            {
                Ok(()) => tables_done += 1,
                Err(ReorgError::LockExhausted { .. }) | Err(ReorgError::Fatal(_)) => {
                    return Err(ReorgError::Fatal(format!(
                        "reorganization of {} aborted fatally",
                        job.target_name
                    )));
                }
                Err(err) => {
                    error!(table = %job.target_name, %err, "table-scoped failure; continuing with next table");
                }
            }
        }

        Ok(DatabaseOutcome::Completed { database, tables_done })
    }

    /// One table's full lifecycle. The cleanup guard is armed inside
    /// `build_shadow` itself, right after its step-5 commit, so a failure
    /// anywhere from that point on (including later in `build_shadow`)
    /// still triggers teardown of the log table and trigger.
    async fn process_table(
        &self,
        sessions: &mut SessionPair,
        job: &TableJob,
        opts: &RunOptions,
        server_supports_terminate: bool,
    ) -> Result<()> {
        info!(table = %job, "reorganizing table");

        let shadow_opts = ShadowBuildOptions {
            wait_timeout: opts.wait_timeout,
            server_supports_terminate,
            vacuum_full: matches!(opts.mode, Mode::VacuumFull),
        };

        let build_result = match build_shadow(sessions, job, &shadow_opts, &self.guard).await {
            Ok(result) => result,
            Err(err) => {
                if self.guard.current() == Some(job.target_oid) {
                    let fatal = self.interrupt.requested();
                    run_cleanup(sessions, job.target_oid, fatal).await;
                    self.guard.disarm();
                }
                return Err(err);
            }
        };

        let outcome = self
            .run_copy_to_swap(sessions, job, opts, server_supports_terminate, &build_result.snapshot_vxids)
            .await;

        match outcome {
            Ok(()) => {
                self.guard.disarm();
                Ok(())
            }
            Err(err) => {
                let fatal = self.interrupt.requested();
                run_cleanup(sessions, job.target_oid, fatal).await;
                self.guard.disarm();
                Err(err)
            }
        }
    }

    async fn run_copy_to_swap(
        &self,
        sessions: &mut SessionPair,
        job: &TableJob,
        opts: &RunOptions,
        server_supports_terminate: bool,
        snapshot_vxids: &[String],
    ) -> Result<()> {
        rebuild_indexes(sessions, job).await?;

        crate::drain::drain_log(sessions, job, snapshot_vxids).await?;

        if self.interrupt.requested() {
            return Err(ReorgError::Fatal("interrupted before swap".to_string()));
        }

        let swap_opts = SwapOptions {
            wait_timeout: opts.wait_timeout,
            server_supports_terminate,
        };
        swap_and_drop(sessions, job, &swap_opts).await?;

        if !opts.no_analyze {
            analyze(sessions, job).await;
        }

        Ok(())
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

async fn server_supports_session_termination(sessions: &mut SessionPair) -> Result<bool> {
    let row = sessions
        .primary
        .client()
        .query_one("SHOW server_version_num", &[])
        .await?;
    let version_num: String = row.get(0);
    Ok(version_num.parse::<u32>().unwrap_or(0) >= 80400)
}

/// Lists databases that allow connections, ordered by name, for `--all`
/// mode.
pub async fn list_databases(admin_sessions: &SessionPair) -> Result<Vec<String>> {
    let rows = admin_sessions
        .primary
        .client()
        .query(
            "SELECT datname FROM pg_database WHERE datallowconn ORDER BY datname",
            &[],
        )
        .await?;
    Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_table_are_mutually_exclusive() {
        let opts = RunOptions {
            all_databases: true,
            table: Some("public.orders".to_string()),
            mode: Mode::Clustered,
            wait_timeout: Duration::from_secs(60),
            no_analyze: false,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn single_table_mode_is_valid() {
        let opts = RunOptions {
            all_databases: false,
            table: Some("public.orders".to_string()),
            mode: Mode::VacuumFull,
            wait_timeout: Duration::from_secs(60),
            no_analyze: true,
        };
        assert!(opts.validate().is_ok());
    }
}
