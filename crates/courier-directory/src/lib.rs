//! # courier-directory
//!
//! The account directory consumed by the relay core: credential checks,
//! tier-scoped account creation, deletion and listing.
//!
//! - [`AccountDirectory`]: the synchronous trait the session engine calls
//! - [`SqliteDirectory`]: `SQLite` implementation (r2d2 pool, WAL mode,
//!   embedded migrations, salted SHA-256 password digests)
//!
//! Provenance ("created by whom") is stored per account so admins can only
//! see and delete what they created. Deleting an admin does not cascade:
//! its accounts stay, with `created_by` cleared, and only root can manage
//! them afterwards.

#![deny(unsafe_code)]

pub mod connection;
pub mod directory;
pub mod errors;
pub mod migrations;
mod password;
pub mod sqlite;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use directory::{Account, AccountDirectory, DeleteTarget};
pub use errors::{DirectoryError, Result};
pub use migrations::run_migrations;
pub use sqlite::SqliteDirectory;
