//! One-time backfill of derived bookmark columns, tag links, duplicate
//! groups, and the per-user topic tree.
//!
//! Users are processed in ascending id order so the checkpoint can act as a
//! cursor: a resumed run skips every user at or below the last completed
//! id. Within a user, bookmarks are fixed in chunks; once a bookmark has a
//! fingerprint and at least one tag link the unbackfilled scan stops
//! returning it, so the chunk loop converges. Any chunk error aborts the
//! run; the checkpoint guarantees a rerun picks up at the failed user.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use shelfmark_common::{Bookmark, ShelfmarkError};
use shelfmark_pipeline::dedup::{self, GroupInput};
use shelfmark_pipeline::fingerprint;
use shelfmark_pipeline::tags::{detect_language, normalize_tag, TagSource};
use shelfmark_store::{BookmarkStore, UnbackfilledBookmark};

const SUMMARY_TEXT_MAX: usize = 2048;
/// Cap on text handed to a tag source.
const TAG_TEXT_MAX: usize = 5000;
/// Ranks past this all share the floor weight.
const WEIGHTED_TAG_RANKS: usize = 20;
const FLOOR_TAG_WEIGHT: f64 = 0.05;
/// Placeholder link for bookmarks that yield no tags, so the unbackfilled
/// scan does not return them forever.
const SENTINEL_TAG: &str = "__no_auto_tags__";

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub user_id: Option<Uuid>,
    pub chunk_size: usize,
    pub dry_run: bool,
    pub resume: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            chunk_size: 500,
            dry_run: false,
            resume: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillStats {
    pub users_processed: u64,
    pub columns_backfilled: u64,
    pub tag_links_created: u64,
    pub dup_groups_created: u64,
    pub topics_created: u64,
}

impl std::fmt::Display for BackfillStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Backfill Complete ===")?;
        writeln!(f, "Users processed:    {}", self.users_processed)?;
        writeln!(f, "Columns backfilled: {}", self.columns_backfilled)?;
        writeln!(f, "Tag links created:  {}", self.tag_links_created)?;
        writeln!(f, "Dup groups created: {}", self.dup_groups_created)?;
        writeln!(f, "Topics created:     {}", self.topics_created)
    }
}

pub struct BackfillMigrator {
    store: Arc<dyn BookmarkStore>,
    tag_source: Arc<dyn TagSource>,
    options: BackfillOptions,
}

impl BackfillMigrator {
    pub fn new(
        store: Arc<dyn BookmarkStore>,
        tag_source: Arc<dyn TagSource>,
        options: BackfillOptions,
    ) -> Self {
        Self {
            store,
            tag_source,
            options,
        }
    }

    pub async fn run(&self) -> Result<BackfillStats, ShelfmarkError> {
        let users = match self.options.user_id {
            Some(user_id) => vec![user_id],
            None => self.store.all_user_ids().await?,
        };

        let skip_through = if self.options.resume {
            self.store
                .checkpoint()
                .await?
                .map(|cp| cp.last_completed_user_id)
        } else {
            None
        };

        let mut stats = BackfillStats::default();
        info!(users = users.len(), dry_run = self.options.dry_run, "Backfill starting");

        for user_id in users {
            if let Some(done_through) = skip_through {
                if user_id <= done_through {
                    info!(user_id = %user_id, "Skipping already-completed user");
                    continue;
                }
            }

            self.backfill_user(user_id, &mut stats)
                .await
                .map_err(|e| ShelfmarkError::Migration(format!("user {user_id}: {e}")))?;

            if !self.options.dry_run {
                self.store.save_checkpoint(user_id).await?;
            }
            stats.users_processed += 1;
            info!(user_id = %user_id, "User backfill complete");
        }

        Ok(stats)
    }

    async fn backfill_user(&self, user_id: Uuid, stats: &mut BackfillStats) -> anyhow::Result<()> {
        loop {
            let rows = self
                .store
                .fetch_unbackfilled(user_id, self.options.chunk_size)
                .await?;
            if rows.is_empty() {
                break;
            }
            info!(user_id = %user_id, chunk = rows.len(), "Backfilling chunk");

            for row in &rows {
                self.backfill_columns(row, stats).await?;
                self.backfill_tags(row, stats).await?;
            }

            // A dry run writes nothing, so the scan would return the same
            // rows forever. One chunk is enough to preview the work.
            if self.options.dry_run {
                break;
            }
        }

        self.build_dup_groups(user_id, stats).await?;
        self.build_topics(user_id, stats).await?;
        Ok(())
    }

    async fn backfill_columns(
        &self,
        row: &UnbackfilledBookmark,
        stats: &mut BackfillStats,
    ) -> anyhow::Result<()> {
        let b = &row.bookmark;
        if b.simhash64.is_some() {
            return Ok(());
        }

        let summary_text = derived_summary_text(b);
        let title = b.title.trim();
        let combined = format!("{title} {summary_text}");
        let text = combined.trim();
        let fingerprint_text = if text.is_empty() { b.url.as_str() } else { text };
        let hash = fingerprint::simhash64(fingerprint_text);
        let domain = extract_domain(&b.url);
        let lang = detect_language(&combined).to_string();

        stats.columns_backfilled += 1;
        if self.options.dry_run {
            return Ok(());
        }
        self.store
            .set_backfill_columns(
                b.id,
                domain,
                if summary_text.is_empty() {
                    None
                } else {
                    Some(summary_text)
                },
                fingerprint::to_stored(hash),
                lang,
            )
            .await
    }

    async fn backfill_tags(
        &self,
        row: &UnbackfilledBookmark,
        stats: &mut BackfillStats,
    ) -> anyhow::Result<()> {
        if row.has_tag_links {
            return Ok(());
        }
        let b = &row.bookmark;

        // Stored free-form tags first; a tag source only when nothing
        // normalizes.
        let mut labels: Vec<String> = b
            .tags
            .iter()
            .filter_map(|t| normalize_tag(t.trim()))
            .collect();
        if labels.is_empty() {
            let summary_text = derived_summary_text(b);
            let text: String = summary_text.chars().take(TAG_TEXT_MAX).collect();
            let lang = b.lang.as_deref().unwrap_or("en");
            // A source failure aborts the run; the sentinel link below is
            // only for a successful lookup that returned nothing.
            let fresh = self.tag_source.tags_for(b.title.trim(), &text, lang).await?;
            labels = fresh.iter().filter_map(|t| normalize_tag(t.trim())).collect();
        }

        if self.options.dry_run {
            stats.tag_links_created += labels.len() as u64;
            return Ok(());
        }

        if labels.is_empty() {
            let tag_id = self.store.upsert_tag(b.user_id, SENTINEL_TAG).await?;
            self.store.link_bookmark_tag_ignore(b.id, tag_id, 0.0).await?;
            return Ok(());
        }

        for (rank, label) in labels.iter().enumerate() {
            let weight = if rank < WEIGHTED_TAG_RANKS {
                1.0 / (rank as f64 + 1.0)
            } else {
                FLOOR_TAG_WEIGHT
            };
            let tag_id = self.store.upsert_tag(b.user_id, label).await?;
            self.store.link_bookmark_tag(b.id, tag_id, weight).await?;
            stats.tag_links_created += 1;
        }
        Ok(())
    }

    async fn build_dup_groups(
        &self,
        user_id: Uuid,
        stats: &mut BackfillStats,
    ) -> anyhow::Result<()> {
        let rows = self.store.fetch_fingerprinted(user_id).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let inputs: Vec<GroupInput> = rows
            .iter()
            .map(|r| GroupInput {
                id: r.id,
                fingerprint: fingerprint::from_stored(r.simhash64),
                created_at: r.created_at,
            })
            .collect();
        let groups = dedup::group_by_fingerprint(&inputs);
        info!(user_id = %user_id, bookmarks = rows.len(), groups = groups.len(), "Grouped by fingerprint");

        for group in groups {
            if self.options.dry_run {
                stats.dup_groups_created += 1;
                continue;
            }
            let bucket = fingerprint::to_stored(group.bucket);
            let group_id = match self.store.find_dup_group(user_id, bucket).await? {
                Some(existing) => existing,
                None => {
                    stats.dup_groups_created += 1;
                    self.store
                        .insert_dup_group(
                            user_id,
                            group.representative_id,
                            group.member_ids.len() as i64,
                            bucket,
                        )
                        .await?
                }
            };
            for member in &group.member_ids {
                self.store.link_dup_member(*member, group_id).await?;
            }
        }
        Ok(())
    }

    /// Topic tree: one root per user, one child per representative domain,
    /// dup groups linked to their domain's topic.
    async fn build_topics(&self, user_id: Uuid, stats: &mut BackfillStats) -> anyhow::Result<()> {
        let root_id = if self.options.dry_run {
            match self.store.find_root_topic(user_id).await? {
                Some(id) => id,
                None => {
                    // The missing root would be created; without it there is
                    // no parent to resolve children against, so the preview
                    // reports just the root and stops.
                    stats.topics_created += 1;
                    return Ok(());
                }
            }
        } else {
            self.store.ensure_root_topic(user_id).await?
        };

        let rows = self.store.dup_groups_with_domain(user_id).await?;
        let mut domain_topics: BTreeMap<String, Option<Uuid>> = BTreeMap::new();
        for (group_id, domain) in rows {
            let domain = domain.trim();
            if domain.is_empty() {
                continue;
            }
            let topic_id = match domain_topics.get(domain) {
                Some(id) => *id,
                None => {
                    let id = if self.options.dry_run {
                        let found = self.store.find_child_topic(user_id, root_id, domain).await?;
                        if found.is_none() {
                            stats.topics_created += 1;
                        }
                        found
                    } else {
                        let (id, created) = self
                            .store
                            .ensure_child_topic(user_id, root_id, domain)
                            .await?;
                        if created {
                            stats.topics_created += 1;
                        }
                        Some(id)
                    };
                    domain_topics.insert(domain.to_string(), id);
                    id
                }
            };
            if let Some(topic_id) = topic_id {
                if !self.options.dry_run {
                    self.store.link_group_topic(group_id, topic_id).await?;
                }
            }
        }
        Ok(())
    }
}

fn derived_summary_text(b: &Bookmark) -> String {
    let raw = b
        .summary_text
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| b.summary.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        .unwrap_or("");
    raw.chars().take(SUMMARY_TEXT_MAX).collect()
}

fn extract_domain(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    parsed
        .host_str()
        .map(|h| h.trim().to_lowercase())
        .filter(|h| !h.is_empty())
}
