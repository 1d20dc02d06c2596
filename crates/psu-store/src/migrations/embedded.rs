//! Embedded SQL migrations
//!
//! Migrations are embedded at compile time using include_str!

/// Migration metadata
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

/// Get all embedded migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![
        Migration {
            id: "001_transition_records",
            sql: include_str!("../../migrations/001_transition_records.sql"),
        },
        Migration {
            id: "002_notification_outbox",
            sql: include_str!("../../migrations/002_notification_outbox.sql"),
        },
    ]
}
