//! `SQLite` backend for the event log.
//!
//! # Architecture
//!
//! - **[`connection`]**: `r2d2` connection pool with WAL mode, foreign keys, and
//!   busy timeout applied to every connection.
//! - **[`migrations`]**: Version-tracked schema evolution, embedded at compile
//!   time and run transactionally.
//! - **[`row_types`]**: Raw row structs for rows that need fallible parsing.
//! - **[`repositories`]**: Stateless repository structs. Each method takes
//!   `&Connection` and executes SQL.

pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod row_types;

pub use connection::{
    ConnectionConfig, ConnectionPool, PooledConnection, PragmaState, new_file, new_in_memory,
    verify_pragmas,
};
pub use migrations::{current_version, latest_version, run_migrations};
