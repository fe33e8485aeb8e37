//! Per-category classification snapshots.
//!
//! A scan fetches the live listing, classifies every torrent twice (merge
//! and remux view) and swaps the category's snapshot in one step. Readers
//! clone an `Arc` to the snapshot they saw, so a concurrent scan never
//! shows them a half-built classification. A failed scan leaves the
//! previous snapshot in place.
//!
//! Scans of one category may overlap (a UI refresh racing a post-job
//! rescan). Each scan is stamped before it fetches and only replaces a
//! snapshot stamped earlier, so an older listing never wins.

use crate::classify::{build_merge_group, build_remux_group, MergeGroup, RemuxGroup, RemuxItem};
use crate::qbit::{fetch_completed_with_files, SourceError, TorrentSource};
use crate::resolve::resolve_listing;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Classification of one category at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Merge groups in upstream order, unique by id.
    pub merge: Vec<MergeGroup>,
    /// Remux groups in upstream order, unique by id.
    pub remux: Vec<RemuxGroup>,
}

impl Classification {
    pub fn merge_group(&self, id: &str) -> Option<&MergeGroup> {
        self.merge.iter().find(|group| group.id == id)
    }

    pub fn remux_group(&self, id: &str) -> Option<&RemuxGroup> {
        self.remux.iter().find(|group| group.id == id)
    }

    /// Remux item with `id` in any group.
    pub fn remux_item(&self, id: &str) -> Option<(&RemuxGroup, &RemuxItem)> {
        self.remux.iter().find_map(|group| {
            group
                .items
                .iter()
                .find(|item| item.id == id)
                .map(|item| (group, item))
        })
    }
}

/// Insert keeping first-seen order; a repeated id replaces the earlier entry.
fn upsert<T>(list: &mut Vec<T>, entry: T, id: impl Fn(&T) -> &str) {
    match list.iter().position(|existing| id(existing) == id(&entry)) {
        Some(idx) => list[idx] = entry,
        None => list.push(entry),
    }
}

async fn path_exists(path: &std::path::Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn mark_existing_outputs(classification: &mut Classification) {
    for group in &mut classification.merge {
        group.output_exists = match group.output_path() {
            Some(path) => path_exists(&path).await,
            None => false,
        };
    }
    for group in &mut classification.remux {
        for item in &mut group.items {
            item.output_exists = path_exists(&item.output_path).await;
        }
    }
}

struct Stamped {
    seq: u64,
    snapshot: Arc<Classification>,
}

/// Owner of every category's latest snapshot.
pub struct CategoryStore {
    source: Arc<dyn TorrentSource>,
    snapshots: RwLock<HashMap<String, Stamped>>,
    next_seq: AtomicU64,
}

impl CategoryStore {
    pub fn new(source: Arc<dyn TorrentSource>) -> Self {
        Self {
            source,
            snapshots: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn source(&self) -> &dyn TorrentSource {
        self.source.as_ref()
    }

    /// Rescan `category` and replace its snapshot.
    ///
    /// Returns the category's current snapshot, which is a newer one than
    /// this scan produced if a later-started scan already installed it.
    pub async fn scan(&self, category: &str) -> Result<Arc<Classification>, SourceError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let listings = match fetch_completed_with_files(self.source.as_ref(), category).await {
            Ok(listings) => listings,
            Err(e) => {
                warn!(category = %category, error = %e, "Scan failed, keeping previous snapshot");
                return Err(e);
            }
        };

        let mut classification = Classification::default();
        for listing in &listings {
            let resolved = resolve_listing(&listing.torrent, &listing.files);
            upsert(
                &mut classification.merge,
                build_merge_group(&listing.torrent, &resolved),
                |g| g.id.as_str(),
            );
            upsert(
                &mut classification.remux,
                build_remux_group(&listing.torrent, &resolved),
                |g| g.id.as_str(),
            );
        }
        mark_existing_outputs(&mut classification).await;

        let snapshot = Arc::new(classification);
        {
            let mut snapshots = self.snapshots.write();
            match snapshots.get(category) {
                Some(current) if current.seq > seq => {
                    debug!(category = %category, seq, current = current.seq, "Discarding superseded scan");
                    return Ok(current.snapshot.clone());
                }
                _ => {
                    snapshots.insert(
                        category.to_string(),
                        Stamped {
                            seq,
                            snapshot: snapshot.clone(),
                        },
                    );
                }
            }
        }
        info!(
            category = %category,
            torrents = listings.len(),
            merge_groups = snapshot.merge.len(),
            remux_groups = snapshot.remux.len(),
            "Scan completed"
        );
        Ok(snapshot)
    }

    /// Latest successful snapshot of `category`.
    pub fn snapshot(&self, category: &str) -> Option<Arc<Classification>> {
        self.snapshots
            .read()
            .get(category)
            .map(|stamped| stamped.snapshot.clone())
    }

    pub fn merge_group(&self, category: &str, id: &str) -> Option<MergeGroup> {
        self.snapshot(category)?.merge_group(id).cloned()
    }

    pub fn remux_group(&self, category: &str, id: &str) -> Option<RemuxGroup> {
        self.snapshot(category)?.remux_group(id).cloned()
    }

    pub fn remux_item(&self, category: &str, id: &str) -> Option<RemuxItem> {
        self.snapshot(category)?
            .remux_item(id)
            .map(|(_, item)| item.clone())
    }
}
