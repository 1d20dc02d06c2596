//! Schema migration command

use clap::Args;
use psu_store::{db, migrations};

#[derive(Debug, Args)]
pub struct MigrateArgs {
    #[arg(long, default_value = ".psu/store.db")]
    pub db: String,
}

pub fn execute(args: MigrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    ensure_parent_dir(&args.db)?;
    let mut conn = db::open(&args.db)?;
    db::configure(&conn)?;
    migrations::apply_migrations(&mut conn)?;

    for id in migrations::applied_migrations(&conn)? {
        println!("{}", id);
    }
    Ok(())
}

/// Create the directory holding the database file, if any
pub fn ensure_parent_dir(db: &str) -> std::io::Result<()> {
    match std::path::Path::new(db).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}
