//! Postgres implementation of the storage contract.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use shelfmark_common::{Bookmark, BookmarkStatus, Checkpoint, DensityCluster, DupGroup};

use crate::{BookmarkStore, FingerprintedBookmark, UnbackfilledBookmark};

pub struct PgStore {
    pool: PgPool,
}

/// A row from the bookmarks table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BookmarkRow {
    id: Uuid,
    user_id: Uuid,
    url: String,
    title: String,
    tags: Option<Vec<String>>,
    summary: Option<String>,
    summary_text: Option<String>,
    domain: Option<String>,
    lang: Option<String>,
    embedding: Option<Vec<f32>>,
    simhash64: Option<i64>,
    status: String,
    cluster_id: Option<i64>,
    cluster_label: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    embedded_at: Option<DateTime<Utc>>,
}

impl BookmarkRow {
    fn into_bookmark(self) -> Bookmark {
        Bookmark {
            id: self.id,
            user_id: self.user_id,
            url: self.url,
            title: self.title,
            tags: self.tags.unwrap_or_default(),
            summary: self.summary,
            summary_text: self.summary_text,
            domain: self.domain,
            lang: self.lang,
            embedding: self.embedding,
            simhash64: self.simhash64,
            status: BookmarkStatus::parse(&self.status)
                .unwrap_or(BookmarkStatus::PendingEmbedding),
            cluster_id: self.cluster_id,
            cluster_label: self.cluster_label,
            created_at: self.created_at,
            updated_at: self.updated_at,
            embedded_at: self.embedded_at,
        }
    }
}

const BOOKMARK_COLUMNS: &str = "id, user_id, url, title, tags, summary, summary_text, domain, \
     lang, embedding, simhash64, status, cluster_id, cluster_label, \
     created_at, updated_at, embedded_at";

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl BookmarkStore for PgStore {
    async fn fetch_pending_embedding(&self, limit: usize) -> Result<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, BookmarkRow>(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
             WHERE status = 'pending_embedding'
             ORDER BY created_at ASC
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BookmarkRow::into_bookmark).collect())
    }

    async fn mark_embedded(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        sqlx::query(
            "UPDATE bookmarks
             SET embedding = $1, status = 'embedded', embedded_at = NOW(), updated_at = NOW()
             WHERE id = $2",
        )
        .bind(&embedding)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_embedding_failed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE bookmarks SET status = 'failed', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn users_with_embedded(&self, min_count: usize) -> Result<Vec<Uuid>> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM bookmarks
             WHERE status = 'embedded' AND embedding IS NOT NULL
             GROUP BY user_id
             HAVING COUNT(*) >= $1
             ORDER BY user_id",
        )
        .bind(min_count as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_embedded(&self, user_id: Uuid) -> Result<Vec<Bookmark>> {
        let rows = sqlx::query_as::<_, BookmarkRow>(&format!(
            "SELECT {BOOKMARK_COLUMNS} FROM bookmarks
             WHERE user_id = $1 AND status = 'embedded' AND embedding IS NOT NULL
             ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(BookmarkRow::into_bookmark).collect())
    }

    async fn set_cluster_assignment(
        &self,
        id: Uuid,
        cluster_id: Option<i64>,
        label: Option<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE bookmarks SET cluster_id = $1, cluster_label = $2 WHERE id = $3")
            .bind(cluster_id)
            .bind(label)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_clusters(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM clusters WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &DensityCluster) -> Result<()> {
        sqlx::query(
            "INSERT INTO clusters (user_id, cluster_id, label, size, cluster_version)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(cluster.user_id)
        .bind(cluster.cluster_id)
        .bind(&cluster.label)
        .bind(cluster.size)
        .bind(cluster.cluster_version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_clusters(&self, user_id: Uuid) -> Result<Vec<DensityCluster>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            user_id: Uuid,
            cluster_id: i64,
            label: Option<String>,
            size: i64,
            cluster_version: DateTime<Utc>,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT user_id, cluster_id, label, size, cluster_version
             FROM clusters WHERE user_id = $1 ORDER BY cluster_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DensityCluster {
                user_id: r.user_id,
                cluster_id: r.cluster_id,
                label: r.label,
                size: r.size,
                cluster_version: r.cluster_version,
            })
            .collect())
    }

    async fn all_user_ids(&self) -> Result<Vec<Uuid>> {
        let rows =
            sqlx::query_scalar::<_, Uuid>("SELECT DISTINCT user_id FROM bookmarks ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn fetch_unbackfilled(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UnbackfilledBookmark>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            #[sqlx(flatten)]
            bookmark: BookmarkRow,
            has_bookmark_tags: bool,
        }

        let rows = sqlx::query_as::<_, Row>(&format!(
            "SELECT {BOOKMARK_COLUMNS},
                    EXISTS (SELECT 1 FROM bookmark_tags bt WHERE bt.bookmark_id = bookmarks.id)
                        AS has_bookmark_tags
             FROM bookmarks
             WHERE user_id = $1
               AND (simhash64 IS NULL
                    OR NOT EXISTS (SELECT 1 FROM bookmark_tags bt WHERE bt.bookmark_id = bookmarks.id))
             ORDER BY created_at ASC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| UnbackfilledBookmark {
                bookmark: r.bookmark.into_bookmark(),
                has_tag_links: r.has_bookmark_tags,
            })
            .collect())
    }

    async fn set_backfill_columns(
        &self,
        id: Uuid,
        domain: Option<String>,
        summary_text: Option<String>,
        simhash64: i64,
        lang: String,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE bookmarks
             SET domain = $1, summary_text = $2, simhash64 = $3, lang = $4, updated_at = NOW()
             WHERE id = $5 AND (simhash64 IS NULL OR domain IS NULL)",
        )
        .bind(domain)
        .bind(summary_text)
        .bind(simhash64)
        .bind(lang)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_tag(&self, user_id: Uuid, normalized_label: &str) -> Result<Uuid> {
        sqlx::query(
            "INSERT INTO tags (id, user_id, normalized_label)
             VALUES (gen_random_uuid(), $1, $2)
             ON CONFLICT (user_id, normalized_label) DO NOTHING",
        )
        .bind(user_id)
        .bind(normalized_label)
        .execute(&self.pool)
        .await?;

        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM tags WHERE user_id = $1 AND normalized_label = $2",
        )
        .bind(user_id)
        .bind(normalized_label)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn link_bookmark_tag(&self, bookmark_id: Uuid, tag_id: Uuid, weight: f64) -> Result<()> {
        sqlx::query(
            "INSERT INTO bookmark_tags (bookmark_id, tag_id, weight)
             VALUES ($1, $2, $3)
             ON CONFLICT (bookmark_id, tag_id) DO UPDATE SET weight = EXCLUDED.weight",
        )
        .bind(bookmark_id)
        .bind(tag_id)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn link_bookmark_tag_ignore(
        &self,
        bookmark_id: Uuid,
        tag_id: Uuid,
        weight: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO bookmark_tags (bookmark_id, tag_id, weight)
             VALUES ($1, $2, $3)
             ON CONFLICT (bookmark_id, tag_id) DO NOTHING",
        )
        .bind(bookmark_id)
        .bind(tag_id)
        .bind(weight)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_fingerprinted(&self, user_id: Uuid) -> Result<Vec<FingerprintedBookmark>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: Uuid,
            simhash64: i64,
            created_at: Option<DateTime<Utc>>,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT id, simhash64, created_at FROM bookmarks
             WHERE user_id = $1 AND simhash64 IS NOT NULL
             ORDER BY created_at DESC NULLS LAST",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FingerprintedBookmark {
                id: r.id,
                simhash64: r.simhash64,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn find_dup_group(&self, user_id: Uuid, bucket: i64) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM dup_groups WHERE user_id = $1 AND simhash_bucket = $2",
        )
        .bind(user_id)
        .bind(bucket)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert_dup_group(
        &self,
        user_id: Uuid,
        representative_bookmark_id: Uuid,
        size: i64,
        bucket: i64,
    ) -> Result<Uuid> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO dup_groups (id, user_id, representative_bookmark_id, size, simhash_bucket)
             VALUES (gen_random_uuid(), $1, $2, $3, $4)
             RETURNING id",
        )
        .bind(user_id)
        .bind(representative_bookmark_id)
        .bind(size)
        .bind(bucket)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn link_dup_member(&self, bookmark_id: Uuid, group_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO bookmark_dup_map (bookmark_id, dup_group_id)
             VALUES ($1, $2)
             ON CONFLICT (bookmark_id, dup_group_id) DO NOTHING",
        )
        .bind(bookmark_id)
        .bind(group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dup_groups(&self, user_id: Uuid) -> Result<Vec<DupGroup>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: Uuid,
            user_id: Uuid,
            simhash_bucket: i64,
            representative_bookmark_id: Uuid,
            size: i64,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT id, user_id, simhash_bucket, representative_bookmark_id, size
             FROM dup_groups WHERE user_id = $1 ORDER BY size DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| DupGroup {
                id: r.id,
                user_id: r.user_id,
                simhash_bucket: r.simhash_bucket,
                representative_bookmark_id: r.representative_bookmark_id,
                size: r.size,
            })
            .collect())
    }

    async fn dup_groups_with_domain(&self, user_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            dup_group_id: Uuid,
            domain: String,
        }

        let rows = sqlx::query_as::<_, Row>(
            "SELECT dg.id AS dup_group_id, b.domain AS domain
             FROM dup_groups dg
             JOIN bookmarks b ON b.id = dg.representative_bookmark_id
             WHERE dg.user_id = $1 AND b.domain IS NOT NULL AND b.domain != ''",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| (r.dup_group_id, r.domain)).collect())
    }

    async fn find_root_topic(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM topics WHERE user_id = $1 AND parent_id IS NULL LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn ensure_root_topic(&self, user_id: Uuid) -> Result<Uuid> {
        if let Some(id) = self.find_root_topic(user_id).await? {
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO topics (id, user_id, parent_id, label)
             VALUES (gen_random_uuid(), $1, NULL, $2)
             RETURNING id",
        )
        .bind(user_id)
        .bind("All")
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM topics WHERE user_id = $1 AND parent_id = $2 AND label = $3",
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(label)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn ensure_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<(Uuid, bool)> {
        if let Some(id) = self.find_child_topic(user_id, parent_id, label).await? {
            return Ok((id, false));
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO topics (id, user_id, parent_id, label)
             VALUES (gen_random_uuid(), $1, $2, $3)
             RETURNING id",
        )
        .bind(user_id)
        .bind(parent_id)
        .bind(label)
        .fetch_one(&self.pool)
        .await?;

        Ok((id, true))
    }

    async fn link_group_topic(&self, group_id: Uuid, topic_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO dup_group_topics (dup_group_id, topic_id)
             VALUES ($1, $2)
             ON CONFLICT (dup_group_id, topic_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(topic_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            last_completed_user_id: Uuid,
            updated_at: DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, Row>(
            "SELECT last_completed_user_id, updated_at FROM migration_checkpoint WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Checkpoint {
            last_completed_user_id: r.last_completed_user_id,
            updated_at: r.updated_at,
        }))
    }

    async fn save_checkpoint(&self, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "INSERT INTO migration_checkpoint (id, last_completed_user_id, updated_at)
             VALUES (1, $1, NOW())
             ON CONFLICT (id) DO UPDATE
             SET last_completed_user_id = EXCLUDED.last_completed_user_id,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
