use tracing_subscriber::EnvFilter;

/// Builds the tracing filter for the requested verbosity. `RUST_LOG`, if
/// set, always wins; otherwise `-v`/`-vv` step from `warn` (the default,
/// mirroring client notices suppressed below warning) up through `info`
/// and `debug`.
pub fn init(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
