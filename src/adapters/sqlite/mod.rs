//! SQLite storage backend.

pub mod backend;
pub mod connection;

pub use backend::{SqlFunction, SqliteBackend, SqliteHandle};
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, SqlitePoolSettings};
