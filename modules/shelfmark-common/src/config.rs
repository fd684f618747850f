use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Embedding provider (OpenAI-compatible /embeddings endpoint)
    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    // Batch job
    pub embedding_batch_size: usize,
    pub clustering_min_bookmarks: usize,
    pub cpu_workers: usize,

    // Clustering
    pub min_cluster_size: usize,
    pub projection_components: usize,
    pub projection_neighbors: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            embedding_api_url: env::var("EMBEDDING_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_api_key: required_env("EMBEDDING_API_KEY"),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            embedding_dimension: parsed_env("EMBEDDING_DIMENSION", 384),
            embedding_batch_size: parsed_env("EMBEDDING_BATCH_SIZE", 50),
            clustering_min_bookmarks: parsed_env("CLUSTERING_MIN_BOOKMARKS", 5),
            cpu_workers: parsed_env("CPU_WORKERS", 2),
            min_cluster_size: parsed_env("MIN_CLUSTER_SIZE", 3),
            projection_components: parsed_env("PROJECTION_COMPONENTS", 15),
            projection_neighbors: parsed_env("PROJECTION_NEIGHBORS", 10),
        }
    }

    /// Load a minimal config for the migrate binary (no embedding provider needed).
    pub fn migrate_from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            embedding_api_url: String::new(),
            embedding_api_key: String::new(),
            embedding_model: String::new(),
            embedding_dimension: parsed_env("EMBEDDING_DIMENSION", 384),
            embedding_batch_size: parsed_env("EMBEDDING_BATCH_SIZE", 50),
            clustering_min_bookmarks: parsed_env("CLUSTERING_MIN_BOOKMARKS", 5),
            cpu_workers: parsed_env("CPU_WORKERS", 2),
            min_cluster_size: parsed_env("MIN_CLUSTER_SIZE", 3),
            projection_components: parsed_env("PROJECTION_COMPONENTS", 15),
            projection_neighbors: parsed_env("PROJECTION_NEIGHBORS", 10),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
