//! Repository layer over the migrated SQLite schema

pub mod sqlite_repo;

pub use sqlite_repo::SqliteTransitionStore;
