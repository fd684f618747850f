use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Enums ---

/// Embedding lifecycle of a bookmark. A bookmark is created by the ingestion
/// boundary in `PendingEmbedding`; the batch job moves it to `Embedded` or
/// `Failed`. Cluster assignment is only valid on `Embedded` bookmarks;
/// fingerprints are independent of this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookmarkStatus {
    PendingEmbedding,
    Embedded,
    Failed,
}

impl BookmarkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkStatus::PendingEmbedding => "pending_embedding",
            BookmarkStatus::Embedded => "embedded",
            BookmarkStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_embedding" => Some(BookmarkStatus::PendingEmbedding),
            "embedded" => Some(BookmarkStatus::Embedded),
            "failed" => Some(BookmarkStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookmarkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Core types ---

/// A saved URL with its derived fields.
///
/// `simhash64` is stored as a signed i64 (Postgres BIGINT); reinterpret as
/// u64 before any bitwise comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: Uuid,
    pub user_id: Uuid,
    pub url: String,
    pub title: String,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub summary_text: Option<String>,
    pub domain: Option<String>,
    pub lang: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub simhash64: Option<i64>,
    pub status: BookmarkStatus,
    pub cluster_id: Option<i64>,
    pub cluster_label: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub embedded_at: Option<DateTime<Utc>>,
}

/// One near-duplicate group per canonical simhash bucket per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DupGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub simhash_bucket: i64,
    pub representative_bookmark_id: Uuid,
    pub size: i64,
}

/// A materialized density cluster for one user. Noise (id -1) is never
/// written as a row and never counted in `size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensityCluster {
    pub user_id: Uuid,
    pub cluster_id: i64,
    pub label: Option<String>,
    pub size: i64,
    pub cluster_version: DateTime<Utc>,
}

/// Migration checkpoint: the last user whose backfill fully completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_completed_user_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

// --- Batch job stats ---

/// Aggregate result of one batch run. The job never raises outward; any
/// top-level failure lands in `errors` instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStats {
    pub embeddings_processed: u64,
    pub embeddings_failed: u64,
    pub users_clustered: u64,
    pub errors: Vec<String>,
}

impl std::fmt::Display for BatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Batch Job Complete ===")?;
        writeln!(f, "Embeddings processed: {}", self.embeddings_processed)?;
        writeln!(f, "Embeddings failed:    {}", self.embeddings_failed)?;
        writeln!(f, "Users clustered:      {}", self.users_clustered)?;
        writeln!(f, "Errors:               {}", self.errors.len())?;
        for e in &self.errors {
            writeln!(f, "  - {e}")?;
        }
        Ok(())
    }
}
