//! Entry point for the `pg-reorg` binary.

use std::process::ExitCode;

use clap::Parser;
use reorg_cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();
    reorg_cli::run_main(args).await
}
