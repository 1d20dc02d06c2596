//! Outbox listing command

use std::sync::Arc;

use clap::Args;
use psu_core::clock::SystemClock;
use psu_store::{db, SqliteOutboxQueue};

#[derive(Debug, Args)]
pub struct OutboxArgs {
    #[arg(long, default_value = ".psu/store.db")]
    pub db: String,

    /// Only list messages sent to this queue
    #[arg(long)]
    pub queue_url: Option<String>,
}

pub fn execute(args: OutboxArgs) -> Result<(), Box<dyn std::error::Error>> {
    let conn = db::open_shared(&args.db)?;
    let outbox = SqliteOutboxQueue::new(conn, Arc::new(SystemClock));

    let messages = outbox.messages(args.queue_url.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&messages)?);
    Ok(())
}
