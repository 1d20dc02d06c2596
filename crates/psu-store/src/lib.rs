//! PSU Store - adapters for the store and queue ports
//!
//! Provides:
//! - SQLite schema with migrations framework
//! - `SqliteTransitionStore`: atomic insert-if-absent over rusqlite
//! - `SqliteOutboxQueue`: a local FIFO outbox standing in for the queue
//! - In-memory store and queue with fault switches for tests

pub mod db;
pub mod errors;
pub mod memory;
pub mod migrations;
pub mod outbox;
pub mod repo;

// Re-export key types
pub use errors::Result;
pub use memory::{MemoryNotificationQueue, MemoryTransitionStore};
pub use outbox::SqliteOutboxQueue;
pub use repo::SqliteTransitionStore;
