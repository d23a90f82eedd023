use std::path::PathBuf;

use clap::Parser;

/// Reorganize tables online: rebuild storage to reclaim bloat and
/// optionally reorder rows by a clustering key, without holding long
/// exclusive locks.
#[derive(Parser, Debug)]
#[command(name = "pg-reorg", version, about)]
pub struct Cli {
    /// Process all databases that allow connections.
    #[arg(short = 'a', long = "all", conflicts_with = "table")]
    pub all: bool,

    /// Restrict to a single table (schema-qualified accepted).
    #[arg(short = 't', long = "table", value_name = "TABLE")]
    pub table: Option<String>,

    /// Vacuum-full mode: rebuild without reordering rows.
    #[arg(short = 'n', long = "no-order", conflicts_with = "order_by")]
    pub no_order: bool,

    /// Explicit ORDER BY expression for the rebuild.
    #[arg(short = 'o', long = "order-by", value_name = "COLUMNS")]
    pub order_by: Option<String>,

    /// Lock-wait threshold, in seconds, before blockers are canceled or
    /// terminated.
    #[arg(short = 'T', long = "wait-timeout", value_name = "SECS", default_value_t = 60)]
    pub wait_timeout: u64,

    /// Skip the final ANALYZE after each table is swapped.
    #[arg(short = 'Z', long = "no-analyze")]
    pub no_analyze: bool,

    /// Database host. Defaults to $PGHOST.
    #[arg(short = 'h', long = "host", env = "PGHOST", value_name = "HOST")]
    pub host: Option<String>,

    /// Database port. Defaults to $PGPORT.
    #[arg(short = 'p', long = "port", env = "PGPORT", value_name = "PORT")]
    pub port: Option<u16>,

    /// Database user. Defaults to $PGUSER.
    #[arg(short = 'U', long = "username", env = "PGUSER", value_name = "USER")]
    pub username: Option<String>,

    /// Path to a file containing the database password, in lieu of
    /// $PGPASSWORD.
    #[arg(long = "password-file", value_name = "FILE")]
    pub password_file: Option<PathBuf>,

    /// Increase log verbosity (-v for info, -vv for debug).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Database name. Defaults to $PGDATABASE.
    #[arg(value_name = "DBNAME", env = "PGDATABASE")]
    pub dbname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_table_cannot_both_be_set() {
        let result = Cli::try_parse_from(["pg-reorg", "--all", "--table", "public.orders"]);
        assert!(result.is_err());
    }

    #[test]
    fn no_order_and_order_by_cannot_both_be_set() {
        let result = Cli::try_parse_from(["pg-reorg", "--no-order", "--order-by", "id"]);
        assert!(result.is_err());
    }

    #[test]
    fn wait_timeout_defaults_to_sixty() {
        let cli = Cli::try_parse_from(["pg-reorg", "mydb"]).unwrap();
        assert_eq!(cli.wait_timeout, 60);
        assert_eq!(cli.dbname.as_deref(), Some("mydb"));
    }

    #[test]
    fn verbose_count_accumulates() {
        let cli = Cli::try_parse_from(["pg-reorg", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }
}
