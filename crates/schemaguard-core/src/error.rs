//! Core error types.

use thiserror::Error;

/// Database handle errors.
#[derive(Debug, Error)]
pub enum Error {
    /// SQLite driver error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL driver error.
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Could not acquire or keep a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// Identifier cannot be quoted safely.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A query returned a shape the caller did not expect.
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),

    /// Transaction control misuse (e.g. commit without begin).
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Database URL scheme is not supported by this build.
    #[error("unsupported database url: {0}")]
    UnsupportedUrl(String),
}

impl Error {
    /// Whether this error means the connection itself is unusable.
    pub fn is_connection(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::CannotOpen)
                    | Some(rusqlite::ErrorCode::NotADatabase)
                    | Some(rusqlite::ErrorCode::SystemIoFailure)
            ),
            #[cfg(feature = "postgres")]
            Error::Postgres(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}
