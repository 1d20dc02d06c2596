//! Database connection management
//!
//! Provides utilities for opening and managing SQLite connections

use crate::errors::{from_rusqlite, Result};
use crate::migrations::apply_migrations;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Connection handle shared by the store and the outbox
pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Configure a connection with optimal settings
pub fn configure(conn: &Connection) -> Result<()> {
    // WAL reports the resulting mode as a row, so it cannot go through execute
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
        .map_err(from_rusqlite)?;

    // Concurrent CLI runs against one file wait instead of failing
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(from_rusqlite)?;

    Ok(())
}

/// Open, configure and migrate a database, ready to be shared
pub fn open_shared<P: AsRef<Path>>(path: P) -> Result<SharedConnection> {
    let mut conn = open(path)?;
    configure(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Migrated in-memory database, ready to be shared (for testing)
pub fn open_shared_in_memory() -> Result<SharedConnection> {
    let mut conn = open_in_memory()?;
    apply_migrations(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}
