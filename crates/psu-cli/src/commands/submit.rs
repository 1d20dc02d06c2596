//! Batch submission command
//!
//! Runs one batch through the pipeline against a local SQLite store. The
//! notification queue is the store's outbox table; parameters and secrets
//! come from environment variables.

use std::sync::Arc;

use clap::Args;
use psu_core::clock::{Clock, SystemClock};
use psu_core::model::TransitionEvent;
use psu_core::notify_config::CachedParameterSource;
use psu_core::sources::{EnvParameterSource, EnvSecretSource};
use psu_engine::{BatchRequest, Pipeline, Settings};
use psu_store::{db, SqliteOutboxQueue, SqliteTransitionStore};

use super::migrate::ensure_parent_dir;

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// JSON file holding an array of transition events
    #[arg(long)]
    pub events: String,

    /// Correlation id of the batch (x-request-id)
    #[arg(long)]
    pub request_id: Option<String>,

    /// Name of the submitting system (attribute-name)
    #[arg(long)]
    pub application_name: Option<String>,

    #[arg(long, default_value = ".psu/store.db")]
    pub db: String,
}

pub async fn execute(args: SubmitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let raw = std::fs::read_to_string(&args.events)?;
    let events: Vec<TransitionEvent> = serde_json::from_str(&raw)?;
    tracing::debug!(count = events.len(), file = %args.events, "Loaded events");

    ensure_parent_dir(&args.db)?;
    let conn = db::open_shared(&args.db)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ttl = chrono::Duration::from_std(settings.parameter_ttl)?;

    let pipeline = Pipeline::new(
        settings,
        Arc::new(SqliteTransitionStore::new(conn.clone()).with_clock(clock.clone())),
        Arc::new(SqliteOutboxQueue::new(conn, clock.clone())),
        Arc::new(CachedParameterSource::new(EnvParameterSource, ttl, clock.clone())),
        Arc::new(EnvSecretSource),
        clock.clone(),
    );

    let request = BatchRequest {
        request_id: args.request_id,
        application_name: args.application_name,
        events,
    };
    let response = pipeline.process(request).await;

    let output = serde_json::json!({
        "statusCode": response.status,
        "body": response.to_bundle(clock.now()),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
