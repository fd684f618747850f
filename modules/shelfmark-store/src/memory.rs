//! In-memory store for testing. No database required. Thread-safe.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use shelfmark_common::{Bookmark, BookmarkStatus, Checkpoint, DensityCluster, DupGroup};

use crate::{BookmarkStore, FingerprintedBookmark, UnbackfilledBookmark};

#[derive(Debug, Clone)]
struct TopicRow {
    user_id: Uuid,
    parent_id: Option<Uuid>,
    label: String,
}

#[derive(Default)]
struct Inner {
    bookmarks: BTreeMap<Uuid, Bookmark>,
    /// (user_id, normalized_label) -> tag id
    tags: BTreeMap<(Uuid, String), Uuid>,
    /// (bookmark_id, tag_id) -> weight
    bookmark_tags: BTreeMap<(Uuid, Uuid), f64>,
    dup_groups: BTreeMap<Uuid, DupGroup>,
    /// (bookmark_id, dup_group_id)
    dup_map: BTreeSet<(Uuid, Uuid)>,
    topics: BTreeMap<Uuid, TopicRow>,
    /// (dup_group_id, topic_id)
    group_topics: BTreeSet<(Uuid, Uuid)>,
    clusters: Vec<DensityCluster>,
    checkpoint: Option<Checkpoint>,
    /// Users whose embedded-bookmark fetch should fail (failure-isolation tests).
    fail_embedded_fetch: HashSet<Uuid>,
    /// When set, every mark_embedded write fails (write-outage tests).
    fail_embedding_writes: bool,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    pending_fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            pending_fetches: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, bookmark: Bookmark) {
        let mut inner = self.inner.lock().unwrap();
        inner.bookmarks.insert(bookmark.id, bookmark);
    }

    pub fn get(&self, id: Uuid) -> Option<Bookmark> {
        self.inner.lock().unwrap().bookmarks.get(&id).cloned()
    }

    /// Number of fetch_pending_embedding calls so far (for loop-shape assertions).
    pub fn pending_fetch_count(&self) -> usize {
        self.pending_fetches.load(Ordering::SeqCst)
    }

    /// Make every mark_embedded call fail, simulating a write outage.
    pub fn fail_embedding_writes(&self) {
        self.inner.lock().unwrap().fail_embedding_writes = true;
    }

    /// Make fetch_embedded fail for one user, simulating an owner-level error.
    pub fn fail_embedded_fetch_for(&self, user_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .fail_embedded_fetch
            .insert(user_id);
    }

    /// Tag links for a bookmark as (normalized_label, weight), label-sorted.
    pub fn tag_links_for(&self, bookmark_id: Uuid) -> Vec<(String, f64)> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for ((bid, tag_id), weight) in &inner.bookmark_tags {
            if *bid != bookmark_id {
                continue;
            }
            if let Some(((_, label), _)) = inner.tags.iter().find(|(_, id)| *id == tag_id) {
                out.push((label.clone(), *weight));
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Dup-group memberships recorded for a bookmark.
    pub fn dup_memberships(&self, bookmark_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .dup_map
            .iter()
            .filter(|(bid, _)| *bid == bookmark_id)
            .count()
    }

    pub fn cluster_rows(&self, user_id: Uuid) -> Vec<DensityCluster> {
        self.inner
            .lock()
            .unwrap()
            .clusters
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BookmarkStore for MemoryStore {
    async fn fetch_pending_embedding(&self, limit: usize) -> Result<Vec<Bookmark>> {
        self.pending_fetches.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<Bookmark> = inner
            .bookmarks
            .values()
            .filter(|b| b.status == BookmarkStatus::PendingEmbedding)
            .cloned()
            .collect();
        rows.sort_by_key(|b| (b.created_at.is_none(), b.created_at, b.id));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_embedded(&self, id: Uuid, embedding: Vec<f32>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_embedding_writes {
            return Err(anyhow!("simulated write failure for bookmark {id}"));
        }
        let b = inner
            .bookmarks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no bookmark {id}"))?;
        b.embedding = Some(embedding);
        b.status = BookmarkStatus::Embedded;
        b.embedded_at = Some(Utc::now());
        b.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_embedding_failed(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let b = inner
            .bookmarks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no bookmark {id}"))?;
        b.status = BookmarkStatus::Failed;
        b.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn users_with_embedded(&self, min_count: usize) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap();
        let mut counts: BTreeMap<Uuid, usize> = BTreeMap::new();
        for b in inner.bookmarks.values() {
            if b.status == BookmarkStatus::Embedded && b.embedding.is_some() {
                *counts.entry(b.user_id).or_insert(0) += 1;
            }
        }
        Ok(counts
            .into_iter()
            .filter(|(_, n)| *n >= min_count)
            .map(|(u, _)| u)
            .collect())
    }

    async fn fetch_embedded(&self, user_id: Uuid) -> Result<Vec<Bookmark>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_embedded_fetch.contains(&user_id) {
            return Err(anyhow!("simulated fetch failure for user {user_id}"));
        }
        let mut rows: Vec<Bookmark> = inner
            .bookmarks
            .values()
            .filter(|b| {
                b.user_id == user_id
                    && b.status == BookmarkStatus::Embedded
                    && b.embedding.is_some()
            })
            .cloned()
            .collect();
        rows.sort_by_key(|b| (b.created_at.is_none(), b.created_at, b.id));
        Ok(rows)
    }

    async fn set_cluster_assignment(
        &self,
        id: Uuid,
        cluster_id: Option<i64>,
        label: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let b = inner
            .bookmarks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no bookmark {id}"))?;
        b.cluster_id = cluster_id;
        b.cluster_label = label;
        Ok(())
    }

    async fn delete_clusters(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.clusters.retain(|c| c.user_id != user_id);
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &DensityCluster) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.clusters.push(cluster.clone());
        Ok(())
    }

    async fn list_clusters(&self, user_id: Uuid) -> Result<Vec<DensityCluster>> {
        let mut rows = self.cluster_rows(user_id);
        rows.sort_by_key(|c| c.cluster_id);
        Ok(rows)
    }

    async fn all_user_ids(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().unwrap();
        let mut users: Vec<Uuid> = inner
            .bookmarks
            .values()
            .map(|b| b.user_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        users.sort();
        Ok(users)
    }

    async fn fetch_unbackfilled(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<UnbackfilledBookmark>> {
        let inner = self.inner.lock().unwrap();
        let linked: HashSet<Uuid> = inner.bookmark_tags.keys().map(|(bid, _)| *bid).collect();
        let mut rows: Vec<UnbackfilledBookmark> = inner
            .bookmarks
            .values()
            .filter(|b| b.user_id == user_id)
            .filter(|b| b.simhash64.is_none() || !linked.contains(&b.id))
            .map(|b| UnbackfilledBookmark {
                bookmark: b.clone(),
                has_tag_links: linked.contains(&b.id),
            })
            .collect();
        rows.sort_by_key(|r| {
            (
                r.bookmark.created_at.is_none(),
                r.bookmark.created_at,
                r.bookmark.id,
            )
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn set_backfill_columns(
        &self,
        id: Uuid,
        domain: Option<String>,
        summary_text: Option<String>,
        simhash64: i64,
        lang: String,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let b = inner
            .bookmarks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("no bookmark {id}"))?;
        if b.simhash64.is_some() && b.domain.is_some() {
            return Ok(());
        }
        b.domain = domain;
        b.summary_text = summary_text;
        b.simhash64 = Some(simhash64);
        b.lang = Some(lang);
        b.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn upsert_tag(&self, user_id: Uuid, normalized_label: &str) -> Result<Uuid> {
        let mut inner = self.inner.lock().unwrap();
        let key = (user_id, normalized_label.to_string());
        if let Some(id) = inner.tags.get(&key) {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        inner.tags.insert(key, id);
        Ok(id)
    }

    async fn link_bookmark_tag(&self, bookmark_id: Uuid, tag_id: Uuid, weight: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.bookmark_tags.insert((bookmark_id, tag_id), weight);
        Ok(())
    }

    async fn link_bookmark_tag_ignore(
        &self,
        bookmark_id: Uuid,
        tag_id: Uuid,
        weight: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .bookmark_tags
            .entry((bookmark_id, tag_id))
            .or_insert(weight);
        Ok(())
    }

    async fn fetch_fingerprinted(&self, user_id: Uuid) -> Result<Vec<FingerprintedBookmark>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<FingerprintedBookmark> = inner
            .bookmarks
            .values()
            .filter(|b| b.user_id == user_id)
            .filter_map(|b| {
                b.simhash64.map(|h| FingerprintedBookmark {
                    id: b.id,
                    simhash64: h,
                    created_at: b.created_at,
                })
            })
            .collect();
        // Newest first, missing timestamps last.
        rows.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        Ok(rows)
    }

    async fn find_dup_group(&self, user_id: Uuid, bucket: i64) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dup_groups
            .values()
            .find(|g| g.user_id == user_id && g.simhash_bucket == bucket)
            .map(|g| g.id))
    }

    async fn insert_dup_group(
        &self,
        user_id: Uuid,
        representative_bookmark_id: Uuid,
        size: i64,
        bucket: i64,
    ) -> Result<Uuid> {
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        inner.dup_groups.insert(
            id,
            DupGroup {
                id,
                user_id,
                simhash_bucket: bucket,
                representative_bookmark_id,
                size,
            },
        );
        Ok(id)
    }

    async fn link_dup_member(&self, bookmark_id: Uuid, group_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.dup_map.insert((bookmark_id, group_id));
        Ok(())
    }

    async fn list_dup_groups(&self, user_id: Uuid) -> Result<Vec<DupGroup>> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<DupGroup> = inner
            .dup_groups
            .values()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|g| std::cmp::Reverse(g.size));
        Ok(rows)
    }

    async fn dup_groups_with_domain(&self, user_id: Uuid) -> Result<Vec<(Uuid, String)>> {
        let inner = self.inner.lock().unwrap();
        let mut out = Vec::new();
        for g in inner.dup_groups.values() {
            if g.user_id != user_id {
                continue;
            }
            if let Some(b) = inner.bookmarks.get(&g.representative_bookmark_id) {
                if let Some(domain) = b.domain.as_deref() {
                    if !domain.is_empty() {
                        out.push((g.id, domain.to_string()));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn find_root_topic(&self, user_id: Uuid) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .topics
            .iter()
            .find(|(_, t)| t.user_id == user_id && t.parent_id.is_none())
            .map(|(id, _)| *id))
    }

    async fn ensure_root_topic(&self, user_id: Uuid) -> Result<Uuid> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner
            .topics
            .iter()
            .find(|(_, t)| t.user_id == user_id && t.parent_id.is_none())
        {
            return Ok(*id);
        }
        let id = Uuid::new_v4();
        inner.topics.insert(
            id,
            TopicRow {
                user_id,
                parent_id: None,
                label: "All".to_string(),
            },
        );
        Ok(id)
    }

    async fn find_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<Option<Uuid>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .topics
            .iter()
            .find(|(_, t)| {
                t.user_id == user_id && t.parent_id == Some(parent_id) && t.label == label
            })
            .map(|(id, _)| *id))
    }

    async fn ensure_child_topic(
        &self,
        user_id: Uuid,
        parent_id: Uuid,
        label: &str,
    ) -> Result<(Uuid, bool)> {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner.topics.iter().find(|(_, t)| {
            t.user_id == user_id && t.parent_id == Some(parent_id) && t.label == label
        }) {
            return Ok((*id, false));
        }
        let id = Uuid::new_v4();
        inner.topics.insert(
            id,
            TopicRow {
                user_id,
                parent_id: Some(parent_id),
                label: label.to_string(),
            },
        );
        Ok((id, true))
    }

    async fn link_group_topic(&self, group_id: Uuid, topic_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.group_topics.insert((group_id, topic_id));
        Ok(())
    }

    async fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.inner.lock().unwrap().checkpoint.clone())
    }

    async fn save_checkpoint(&self, user_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.checkpoint = Some(Checkpoint {
            last_completed_user_id: user_id,
            updated_at: Utc::now(),
        });
        Ok(())
    }
}
