use thiserror::Error;

/// SQLSTATE for "invalid schema name", returned when the companion
/// extension's schema does not exist in the target database.
pub const SQLSTATE_INVALID_SCHEMA_NAME: &str = "3F000";

/// SQLSTATE for "query canceled", returned when a statement hits the
/// per-attempt statement timeout set by the lock escalator.
pub const SQLSTATE_QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error)]
pub enum ReorgError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("companion extension version mismatch: client is {client}, server is {server}")]
    VersionMismatch { client: String, server: String },

    #[error("companion extension not installed")]
    ExtensionMissing,

    #[error("table {table} cannot be reorganized: {reason}")]
    Precondition { table: String, reason: String },

    #[error("could not acquire lock on {table}: {source}")]
    LockExhausted {
        table: String,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("connection lost and could not be reestablished: {0}")]
    ConnectionLost(String),

    #[error("fatal error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),
}

pub type Result<T> = std::result::Result<T, ReorgError>;

/// Returns the SQLSTATE code attached to a `tokio_postgres::Error`, if any.
pub fn sqlstate_of(err: &tokio_postgres::Error) -> Option<&str> {
    err.code().map(|s| s.code())
}

pub fn is_sqlstate(err: &tokio_postgres::Error, code: &str) -> bool {
    sqlstate_of(err) == Some(code)
}
