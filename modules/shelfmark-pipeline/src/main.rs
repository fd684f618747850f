use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shelfmark_common::Config;
use shelfmark_pipeline::{BatchRunner, HttpEmbedder};
use shelfmark_store::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("shelfmark=info".parse()?))
        .init();

    info!("Shelfmark batch job starting...");

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let store = PgStore::new(pool);
    store.migrate().await?;

    let embedder = Arc::new(HttpEmbedder::new(&config));
    let runner = BatchRunner::new(Arc::new(store), embedder, &config);

    let stats = runner.run().await;
    println!("{stats}");

    Ok(())
}
