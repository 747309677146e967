//! Storage backends implementing the connection ports.

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryBackend, MemoryConnection};
pub use sqlite::SqliteBackend;
