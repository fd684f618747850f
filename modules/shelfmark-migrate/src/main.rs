use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use shelfmark_common::Config;
use shelfmark_migrate::{BackfillMigrator, BackfillOptions};
use shelfmark_pipeline::tags::NoopTagSource;
use shelfmark_store::PgStore;

#[derive(Parser)]
#[command(
    name = "shelfmark-migrate",
    about = "Backfill fingerprints, tags, dup groups, and topics for existing bookmarks"
)]
struct Cli {
    /// Process only this user
    #[arg(long)]
    user_id: Option<Uuid>,

    /// Bookmarks fetched per chunk
    #[arg(long, default_value_t = 500)]
    chunk_size: usize,

    /// Compute everything but write nothing
    #[arg(long)]
    dry_run: bool,

    /// Skip users already completed per the stored checkpoint
    #[arg(long)]
    resume: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::migrate_from_env();

    info!("Shelfmark backfill starting");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    let migrator = BackfillMigrator::new(
        Arc::new(store),
        Arc::new(NoopTagSource),
        BackfillOptions {
            user_id: cli.user_id,
            chunk_size: cli.chunk_size,
            dry_run: cli.dry_run,
            resume: cli.resume,
        },
    );

    let stats = migrator.run().await?;
    println!("{stats}");

    Ok(())
}
