//! PSU CLI
//!
//! Command-line interface for the prescription status update pipeline

use clap::{Parser, Subcommand};
use psu_core::logging_facility::{self, Profile};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "psu")]
#[command(about = "PSU - Prescription status commit-and-notify pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Submit a batch of status transitions
    Submit(commands::submit::SubmitArgs),
    /// Apply pending schema migrations
    Migrate(commands::migrate::MigrateArgs),
    /// List messages held in the local notification outbox
    Outbox(commands::outbox::OutboxArgs),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging_facility::init(Profile::for_environment(
        &std::env::var("ENVIRONMENT").unwrap_or_default(),
    ));

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Submit(args) => commands::submit::execute(args).await,
        Commands::Migrate(args) => commands::migrate::execute(args),
        Commands::Outbox(args) => commands::outbox::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
