//! Error types for the account directory.

use thiserror::Error;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// An account with this name already exists.
    #[error("account already exists: {0}")]
    DuplicateAccount(String),

    /// The caller's tier or provenance does not allow the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Stored data is inconsistent.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for directory results.
pub type Result<T> = std::result::Result<T, DirectoryError>;
