//! Domain layer for the database access layer
//!
//! Plain data, the error taxonomy, and the ports the services depend on.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DbError, DbResult, ErrorClass, FailureKind, StorageError};
