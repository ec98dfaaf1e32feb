//! PostgreSQL persistence module.
//!
//! Provides the shared connection pool used by the postgres-backed
//! notification store and template catalog.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
