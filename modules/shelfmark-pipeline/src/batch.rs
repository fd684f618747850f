//! Nightly batch job: embed pending bookmarks, then recluster per user.
//!
//! The two phases run strictly in order so that clustering always sees the
//! vectors produced moments earlier. The job itself never fails outward;
//! every error is recorded in [`BatchStats::errors`] and the run continues
//! with whatever work remains.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use shelfmark_common::{BatchStats, Bookmark, Config, DensityCluster};
use shelfmark_store::BookmarkStore;

use crate::cluster::{ClusterChain, ClusterParams};
use crate::cpu_pool::CpuPool;
use crate::embedder::EmbeddingProvider;
use crate::labeler;

/// Tags beyond this rank do not contribute to the embedding text.
const EMBED_TAG_LIMIT: usize = 10;
/// Summary prefix length included in the embedding text.
const EMBED_SUMMARY_CHARS: usize = 500;

pub struct BatchRunner {
    store: Arc<dyn BookmarkStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cpu: CpuPool,
    batch_size: usize,
    min_bookmarks: usize,
    params: ClusterParams,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            embedder,
            cpu: CpuPool::new(config.cpu_workers),
            batch_size: config.embedding_batch_size,
            min_bookmarks: config.clustering_min_bookmarks,
            params: ClusterParams {
                min_cluster_size: config.min_cluster_size,
                projection_components: config.projection_components,
                projection_neighbors: config.projection_neighbors,
            },
        }
    }

    pub async fn run(&self) -> BatchStats {
        let mut stats = BatchStats::default();
        self.embed_pending(&mut stats).await;
        self.recluster_users(&mut stats).await;
        info!(
            embedded = stats.embeddings_processed,
            failed = stats.embeddings_failed,
            users = stats.users_clustered,
            errors = stats.errors.len(),
            "Batch run finished"
        );
        stats
    }

    /// Phase 1: drain `pending_embedding` in fixed-size batches. A short
    /// fetch means the backlog is exhausted, so the loop stops without an
    /// extra round trip.
    async fn embed_pending(&self, stats: &mut BatchStats) {
        loop {
            let rows = match self.store.fetch_pending_embedding(self.batch_size).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "Failed to fetch pending bookmarks");
                    stats.errors.push(format!("fetch pending: {e}"));
                    return;
                }
            };
            if rows.is_empty() {
                break;
            }

            let texts: Vec<String> = rows.iter().map(embedding_text).collect();
            let embeddings = self.embedder.embed_batch(&texts).await;
            // Rows that fail to transition out of `pending_embedding` come
            // back on the next fetch, so a batch where nothing transitioned
            // must stop the loop rather than spin on the same rows.
            let mut transitioned = 0usize;
            for (bookmark, embedding) in rows.iter().zip(embeddings) {
                match embedding {
                    Some(vector) => match self.store.mark_embedded(bookmark.id, vector).await {
                        Ok(()) => {
                            stats.embeddings_processed += 1;
                            transitioned += 1;
                        }
                        Err(e) => {
                            warn!(bookmark_id = %bookmark.id, error = %e, "Failed to store embedding");
                            stats.embeddings_failed += 1;
                            stats.errors.push(format!("store embedding {}: {e}", bookmark.id));
                        }
                    },
                    None => {
                        stats.embeddings_failed += 1;
                        match self.store.mark_embedding_failed(bookmark.id).await {
                            Ok(()) => transitioned += 1,
                            Err(e) => {
                                warn!(bookmark_id = %bookmark.id, error = %e, "Failed to mark bookmark failed");
                                stats.errors.push(format!("mark failed {}: {e}", bookmark.id));
                            }
                        }
                    }
                }
            }

            if transitioned == 0 {
                warn!(batch = rows.len(), "No bookmark left pending state; stopping embed loop");
                break;
            }
            if rows.len() < self.batch_size {
                break;
            }
        }
    }

    /// Phase 2: recluster every user with enough embedded bookmarks. One
    /// user's failure never blocks the others.
    async fn recluster_users(&self, stats: &mut BatchStats) {
        let users = match self.store.users_with_embedded(self.min_bookmarks).await {
            Ok(users) => users,
            Err(e) => {
                warn!(error = %e, "Failed to list users for clustering");
                stats.errors.push(format!("list users: {e}"));
                return;
            }
        };

        for user_id in users {
            match self.recluster_one(user_id).await {
                Ok(()) => stats.users_clustered += 1,
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Clustering failed for user");
                    stats.errors.push(format!("cluster user {user_id}: {e}"));
                }
            }
        }
    }

    async fn recluster_one(&self, user_id: Uuid) -> anyhow::Result<()> {
        let bookmarks = self.store.fetch_embedded(user_id).await?;
        if bookmarks.len() < self.min_bookmarks {
            return Ok(());
        }

        let vectors: Vec<Vec<f32>> = bookmarks
            .iter()
            .map(|b| b.embedding.clone().unwrap_or_default())
            .collect();
        let tags: Vec<Vec<String>> = bookmarks.iter().map(|b| b.tags.clone()).collect();

        let params = self.params.clone();
        let assignments = self
            .cpu
            .run(move || ClusterChain::new(params).assign(&vectors))
            .await?;

        let labels = labeler::label_clusters(&assignments, &tags);

        // Replace the user's cluster rows wholesale. Delete and insert are
        // separate statements; a reader between them sees an empty list,
        // which the presentation layer treats the same as "not yet
        // clustered".
        let cluster_version = Utc::now();
        let mut sizes: BTreeMap<i64, i64> = BTreeMap::new();
        for &a in &assignments {
            if a >= 0 {
                *sizes.entry(a).or_default() += 1;
            }
        }

        self.store.delete_clusters(user_id).await?;
        for (&cluster_id, &size) in &sizes {
            self.store
                .insert_cluster(&DensityCluster {
                    user_id,
                    cluster_id,
                    label: labels.get(&cluster_id).cloned(),
                    size,
                    cluster_version,
                })
                .await?;
        }

        for (bookmark, &assignment) in bookmarks.iter().zip(assignments.iter()) {
            if assignment >= 0 {
                self.store
                    .set_cluster_assignment(
                        bookmark.id,
                        Some(assignment),
                        labels.get(&assignment).cloned(),
                    )
                    .await?;
            } else {
                self.store
                    .set_cluster_assignment(bookmark.id, None, None)
                    .await?;
            }
        }

        info!(user_id = %user_id, clusters = sizes.len(), items = bookmarks.len(), "Reclustered user");
        Ok(())
    }
}

/// Text sent to the embedding provider: title, the leading tags, and the
/// head of the summary.
fn embedding_text(bookmark: &Bookmark) -> String {
    let mut parts = vec![bookmark.title.clone()];
    for tag in bookmark.tags.iter().take(EMBED_TAG_LIMIT) {
        parts.push(tag.clone());
    }
    if let Some(summary) = &bookmark.summary {
        let head: String = summary.chars().take(EMBED_SUMMARY_CHARS).collect();
        if !head.is_empty() {
            parts.push(head);
        }
    }
    parts.join(" ")
}
