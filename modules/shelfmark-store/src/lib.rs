//! Storage contract for the dedup/clustering pipeline.
//!
//! The pipeline is the sole writer of fingerprint, cluster, and dup-group
//! fields; the presentation layer reads through `list_clusters` and
//! `list_dup_groups` only. Implemented by `PgStore` (postgres) and
//! `MemoryStore` (tests).

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use shelfmark_common::{Bookmark, Checkpoint, DensityCluster, DupGroup};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// A bookmark still missing its backfill: no fingerprint, or no tag links.
#[derive(Debug, Clone)]
pub struct UnbackfilledBookmark {
    pub bookmark: Bookmark,
    pub has_tag_links: bool,
}

/// Minimal projection for duplicate grouping.
#[derive(Debug, Clone)]
pub struct FingerprintedBookmark {
    pub id: Uuid,
    pub simhash64: i64,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    // --- Embedding phase ---

    /// Oldest-first bookmarks in `pending_embedding`, across all users.
    async fn fetch_pending_embedding(&self, limit: usize) -> Result<Vec<Bookmark>>;

    /// Transition to `embedded`, storing the vector and embedded_at = now.
    async fn mark_embedded(&self, id: Uuid, embedding: Vec<f32>) -> Result<()>;

    /// Transition to `failed`.
    async fn mark_embedding_failed(&self, id: Uuid) -> Result<()>;

    // --- Clustering phase ---

    /// Distinct users with at least `min_count` embedded bookmarks.
    async fn users_with_embedded(&self, min_count: usize) -> Result<Vec<Uuid>>;

    /// All embedded bookmarks (with vectors and tags) for one user.
    async fn fetch_embedded(&self, user_id: Uuid) -> Result<Vec<Bookmark>>;

    /// Write a bookmark's cluster id/label. Noise passes (None, None).
    async fn set_cluster_assignment(
        &self,
        id: Uuid,
        cluster_id: Option<i64>,
        label: Option<String>,
    ) -> Result<()>;

    /// Drop all cluster rows for a user ahead of a fresh insert.
    async fn delete_clusters(&self, user_id: Uuid) -> Result<()>;

    async fn insert_cluster(&self, cluster: &DensityCluster) -> Result<()>;

    /// Read-only query surface for the presentation layer.
    async fn list_clusters(&self, user_id: Uuid) -> Result<Vec<DensityCluster>>;

    // --- Backfill ---

    /// Every user id that owns at least one bookmark, sorted ascending.
    async fn all_user_ids(&self) -> Result<Vec<Uuid>>;

    /// Bookmarks missing a fingerprint or tag links, created ascending.
    async fn fetch_unbackfilled(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UnbackfilledBookmark>>;

    /// Store derived columns for a bookmark that lacks them. Guarded so a
    /// concurrent or repeated write never clobbers an existing fingerprint.
    async fn set_backfill_columns(
        &self,
        id: Uuid,
        domain: Option<String>,
        summary_text: Option<String>,
        simhash64: i64,
        lang: String,
    ) -> Result<()>;

    /// Conflict-ignore tag upsert; returns the tag id either way.
    async fn upsert_tag(&self, user_id: Uuid, normalized_label: &str) -> Result<Uuid>;

    /// Upsert a bookmark→tag link, replacing the weight on conflict.
    async fn link_bookmark_tag(&self, bookmark_id: Uuid, tag_id: Uuid, weight: f64) -> Result<()>;

    /// Conflict-ignore bookmark→tag link (sentinel links use this).
    async fn link_bookmark_tag_ignore(
        &self,
        bookmark_id: Uuid,
        tag_id: Uuid,
        weight: f64,
    ) -> Result<()>;

    /// All fingerprinted bookmarks for a user, newest first.
    async fn fetch_fingerprinted(&self, user_id: Uuid) -> Result<Vec<FingerprintedBookmark>>;

    /// Existing dup group for (user, canonical bucket), if any.
    async fn find_dup_group(&self, user_id: Uuid, bucket: i64) -> Result<Option<Uuid>>;

    async fn insert_dup_group(
        &self,
        user_id: Uuid,
        representative_bookmark_id: Uuid,
        size: i64,
        bucket: i64,
    ) -> Result<Uuid>;

    /// Conflict-ignore membership insert.
    async fn link_dup_member(&self, bookmark_id: Uuid, group_id: Uuid) -> Result<()>;

    async fn list_dup_groups(&self, user_id: Uuid) -> Result<Vec<DupGroup>>;

    /// Dup groups joined to their representative bookmark's domain.
    async fn dup_groups_with_domain(&self, user_id: Uuid) -> Result<Vec<(Uuid, String)>>;

    /// The user's root topic, if one exists.
    async fn find_root_topic(&self, user_id: Uuid) -> Result<Option<Uuid>>;

    /// Get-or-create the user's root topic.
    async fn ensure_root_topic(&self, user_id: Uuid) -> Result<Uuid>;

    /// Child topic by label under `parent_id`, if one exists.
    async fn find_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<Option<Uuid>>;

    /// Get-or-create a child topic by label under `parent_id`. The flag is
    /// true when the topic was newly created.
    async fn ensure_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<(Uuid, bool)>;

    /// Conflict-ignore dup-group→topic link.
    async fn link_group_topic(&self, group_id: Uuid, topic_id: Uuid) -> Result<()>;

    // --- Migration checkpoint ---

    async fn checkpoint(&self) -> Result<Option<Checkpoint>>;

    async fn save_checkpoint(&self, user_id: Uuid) -> Result<()>;
}
