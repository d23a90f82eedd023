use std::fs;

use anyhow::{Context, Result};
use reorg_core::Mode;
use tokio_postgres::Config as PgConfig;

use crate::cli::Cli;

/// Resolves the CLI's connection flags (falling back to the standard
/// `PG*` environment variables via clap's `env` attribute) into a
/// `tokio_postgres::Config` template. Each per-database run clones this
/// and overrides `dbname`.
pub fn resolve_connection(cli: &Cli) -> Result<PgConfig> {
    let mut config = PgConfig::new();

    if let Some(host) = &cli.host {
        config.host(host);
    }
    if let Some(port) = cli.port {
        config.port(port);
    }
    if let Some(user) = &cli.username {
        config.user(user);
    }
    if let Some(path) = &cli.password_file {
        let password = fs::read_to_string(path)
            .with_context(|| format!("reading password file {}", path.display()))?;
        config.password(password.trim());
    }
    if let Some(dbname) = &cli.dbname {
        config.dbname(dbname);
    }

    Ok(config)
}

/// Derives the closed `Mode` enum from the three mutually-exclusive CLI
/// flags. `Cli`'s own `conflicts_with` wiring already rejects
/// `--no-order` together with `--order-by`, so only two branches remain
/// here.
pub fn resolve_mode(cli: &Cli) -> Mode {
    if cli.no_order {
        Mode::VacuumFull
    } else if let Some(order_by) = &cli.order_by {
        Mode::UserOrder(order_by.clone())
    } else {
        Mode::Clustered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_to_clustered_mode() {
        let cli = Cli::parse_from(["pg-reorg"]);
        assert_eq!(resolve_mode(&cli), Mode::Clustered);
    }

    #[test]
    fn no_order_flag_selects_vacuum_full() {
        let cli = Cli::parse_from(["pg-reorg", "--no-order"]);
        assert_eq!(resolve_mode(&cli), Mode::VacuumFull);
    }

    #[test]
    fn order_by_flag_selects_user_order() {
        let cli = Cli::parse_from(["pg-reorg", "--order-by", "a, b"]);
        assert_eq!(resolve_mode(&cli), Mode::UserOrder("a, b".to_string()));
    }
}
