pub mod cli;
pub mod config;
pub mod logging;

use std::process::ExitCode;
use std::time::Duration;

use reorg_core::{DatabaseOutcome, Orchestrator, RunOptions, SessionPair};
use tracing::{error, info, warn};

pub use cli::Cli;

/// Runs the CLI end to end and returns the process exit code: `0` on
/// success, `2` for a configuration error rejected before any connection
/// is opened, `1` for any other fatal failure.
pub async fn run_main(args: Cli) -> ExitCode {
    logging::init(args.verbose);

    let opts = RunOptions {
        all_databases: args.all,
        table: args.table.clone(),
        mode: config::resolve_mode(&args),
        wait_timeout: Duration::from_secs(args.wait_timeout),
        no_analyze: args.no_analyze,
    };

    if let Err(err) = opts.validate() {
        error!(%err, "configuration error");
        return ExitCode::from(2);
    }

    let base_config = match config::resolve_connection(&args) {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(2);
        }
    };

    let orchestrator = Orchestrator::new();

    if opts.all_databases {
        run_all_databases(&orchestrator, base_config, &opts).await
    } else {
        run_one_database(&orchestrator, base_config, &opts).await
    }
}

async fn run_one_database(orchestrator: &Orchestrator, config: tokio_postgres::Config, opts: &RunOptions) -> ExitCode {
    match orchestrator.run_database(config, opts).await {
        Ok(outcome) => {
            if report_outcome(&outcome) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(err) => {
            error!(%err, "run aborted");
            ExitCode::from(1)
        }
    }
}

async fn run_all_databases(
    orchestrator: &Orchestrator,
    admin_config: tokio_postgres::Config,
    opts: &RunOptions,
) -> ExitCode {
    let mut config_for_listing = admin_config.clone();
    if admin_config.get_dbname().is_none() {
        config_for_listing.dbname("postgres");
    }

    let admin_sessions = match SessionPair::connect(config_for_listing).await {
        Ok(sessions) => sessions,
        Err(err) => {
            error!(%err, "could not connect to list databases");
            return ExitCode::from(1);
        }
    };

    let databases = match reorg_core::orchestrator::list_databases(&admin_sessions).await {
        Ok(databases) => databases,
        Err(err) => {
            error!(%err, "could not list databases");
            return ExitCode::from(1);
        }
    };
    drop(admin_sessions);

    let mut any_failed = false;
    for database in databases {
        let mut db_config = admin_config.clone();
        db_config.dbname(&database);

        match orchestrator.run_database(db_config, opts).await {
            Ok(outcome) => {
                if !report_outcome(&outcome) {
                    any_failed = true;
                }
            }
            Err(err) => {
                error!(database, %err, "aborted fatally; stopping --all run");
                return ExitCode::from(1);
            }
        }
    }

    if any_failed {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Logs `outcome` at the appropriate level and reports whether it counts
/// as success.
fn report_outcome(outcome: &DatabaseOutcome) -> bool {
    match outcome {
        DatabaseOutcome::Completed { database, tables_done } => {
            info!(database, tables_done, "reorganization complete");
            true
        }
        DatabaseOutcome::Skipped { database, reason } => {
            warn!(database, reason, "database skipped");
            true
        }
        DatabaseOutcome::Failed { database, error } => {
            error!(database, error, "database failed");
            false
        }
    }
}
