//! Database module for PostgreSQL connection and statement execution

pub mod connection;
pub mod executor;

pub use connection::{init_pool, DbPool};
pub use executor::{ExecutionError, PgExecutor, QueryExecutor};
