//! Infrastructure layer - Storage adapters
//!
//! - `memory`: in-process adapter (tests, local runs)
//! - `sqlite`: file-backed adapter

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryDocumentStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDocumentStore;
