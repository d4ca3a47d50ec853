//! Collision Detection Module
//!
//! Decides whether a candidate file is already represented in the store.
//!
//! # Architecture
//!
//! The detector uses a tiered lookup strategy:
//! 1. **Exact tier**: the index narrows the search to entries sharing the
//!    candidate's short or long digest, and only those with the same size
//!    count as a collision.
//! 2. **Perceptual tier**: an exact perceptual-digest lookup first, then a
//!    scan of entries of the same media kind compared by Hamming distance.
//!    Misses on the exact key are expected for near-duplicates, so the scan
//!    always runs before giving up.
//!
//! A collision whose stored path equals the candidate's path is a re-scan of
//! the same file rather than a duplicate.
//!
//! Perceptual matches are ranked by dimensions. Ranking is advisory: the
//! detector never mutates the store.

use super::index::DigestIndex;
use crate::core::error::{Result, StoreError};
use crate::digest::perceptual::distance;
use crate::digest::MediaKind;
use crate::store::{Digest, Entry, Identity, PerceptualHash};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Distance below which two perceptual digests are considered the same media
pub const SIMILARITY_THRESHOLD: f64 = 0.1;

/// Entries compared between cancellation checks during a perceptual scan
const SCAN_CANCEL_INTERVAL: usize = 1024;

/// Which stored digest an exact lookup compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestTier {
    Short,
    Long,
}

/// How a perceptual match compares to the stored original
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ranking {
    /// Candidate is larger in both dimensions and likely supersedes the original
    Larger,
    /// Same area; one may be a crop of the other, keep both
    PossiblyCropped,
    /// Candidate is likely the inferior copy
    Smaller,
}

/// Outcome of a successful collision check
#[derive(Debug, Clone, PartialEq)]
pub enum Collision {
    /// The stored entry has the candidate's own path
    SameFile { position: usize },
    /// Same size and digest at a different path
    Duplicate { position: usize },
    /// Perceptually similar media at a different path
    NearDuplicate {
        position: usize,
        ranking: Ranking,
        distance: f64,
    },
}

impl Collision {
    pub fn position(&self) -> usize {
        match self {
            Collision::SameFile { position }
            | Collision::Duplicate { position }
            | Collision::NearDuplicate { position, .. } => *position,
        }
    }
}

/// Statistics about the entries held in a store
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    /// Total number of entries
    pub total_files: usize,
    /// Sum of recorded sizes
    pub total_bytes: u64,
    /// Entries classified as images
    pub images: usize,
    /// Entries classified as videos
    pub videos: usize,
    /// Entries carrying a perceptual digest
    pub with_perceptual: usize,
    /// Entries carrying a long digest
    pub with_long_hash: usize,
    /// Number of distinct short digests
    pub unique_short_hashes: usize,
    /// Groups of entries sharing size and short digest
    pub duplicate_groups: usize,
    /// Entries that are duplicates of an earlier entry in their group
    pub duplicate_files: usize,
}

/// A group of entries sharing size and short digest
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// The shared short digest
    pub digest: Digest,
    /// File size (all entries in the group share it)
    pub size: u64,
    /// Relative paths of every entry in the group
    pub paths: Vec<String>,
}

/// Read-only view over a store's entries and their index
pub struct CollisionDetector<'a> {
    entries: &'a [Entry],
    index: &'a DigestIndex,
}

impl<'a> CollisionDetector<'a> {
    pub fn new(entries: &'a [Entry], index: &'a DigestIndex) -> Self {
        Self { entries, index }
    }

    /// Exact tier: same size and same digest.
    ///
    /// A match at the candidate's own path wins over matches elsewhere.
    pub fn find_exact(
        &self,
        tier: DigestTier,
        digest: &Digest,
        size: u64,
        identity: &Identity,
    ) -> Option<Collision> {
        let positions = match tier {
            DigestTier::Short => self.index.by_short(digest),
            DigestTier::Long => self.index.by_long(digest),
        };

        let mut first = None;
        for &position in positions {
            let Some(entry) = self.entries.get(position) else {
                continue;
            };
            if entry.size != size {
                continue;
            }
            if entry.identity.path == identity.path {
                return Some(Collision::SameFile { position });
            }
            first.get_or_insert(position);
        }

        first.map(|position| Collision::Duplicate { position })
    }

    /// Perceptual tier: exact key lookup, then a media-scoped scan.
    pub fn find_perceptual(
        &self,
        candidate: &PerceptualHash,
        identity: &Identity,
        shutdown: &AtomicBool,
    ) -> Result<Option<Collision>> {
        let kind = MediaKind::from_extension(&identity.extension);

        let exact = self.closest(self.index.by_perceptual(&candidate.digest), candidate, identity, kind, shutdown)?;
        let best = match exact {
            Some(found) => Some(found),
            None => self.closest(self.index.by_media(kind), candidate, identity, kind, shutdown)?,
        };

        Ok(best.map(|(position, distance)| {
            let stored = self.entries[position].perceptual.as_ref();
            if self.entries[position].identity.path == identity.path {
                Collision::SameFile { position }
            } else {
                Collision::NearDuplicate {
                    position,
                    ranking: stored.map_or(Ranking::PossiblyCropped, |s| rank(candidate, s)),
                    distance,
                }
            }
        }))
    }

    /// Closest entry under the similarity threshold among `positions`.
    /// An entry at the candidate's own path short-circuits the search.
    fn closest(
        &self,
        positions: &[usize],
        candidate: &PerceptualHash,
        identity: &Identity,
        kind: MediaKind,
        shutdown: &AtomicBool,
    ) -> Result<Option<(usize, f64)>> {
        let mut best: Option<(usize, f64)> = None;

        for (scanned, &position) in positions.iter().enumerate() {
            if scanned % SCAN_CANCEL_INTERVAL == 0 && shutdown.load(Ordering::Relaxed) {
                return Err(StoreError::Cancelled);
            }

            let Some(entry) = self.entries.get(position) else {
                continue;
            };
            let Some(stored) = &entry.perceptual else {
                continue;
            };
            if MediaKind::from_extension(&entry.identity.extension) != kind {
                continue;
            }

            let d = distance(&candidate.digest, &stored.digest);
            if d >= SIMILARITY_THRESHOLD {
                continue;
            }
            if entry.identity.path == identity.path {
                return Ok(Some((position, d)));
            }
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((position, d));
            }
        }

        Ok(best)
    }

    /// Whether `entry` (typically from another store) has an equivalent here
    pub fn is_represented(&self, entry: &Entry) -> bool {
        let matches = |tier, digest: &Option<Digest>| {
            digest.as_ref().is_some_and(|digest| {
                self.find_exact(tier, digest, entry.size, &entry.identity).is_some()
            })
        };

        matches(DigestTier::Short, &entry.short_hash) || matches(DigestTier::Long, &entry.long_hash)
    }

    /// Find all groups of entries sharing size and short digest
    pub fn find_duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let mut groups = Vec::new();

        for (digest, positions) in self.index.shared_short_digests() {
            let mut by_size: HashMap<u64, Vec<String>> = HashMap::new();
            for &position in positions {
                if let Some(entry) = self.entries.get(position) {
                    by_size
                        .entry(entry.size)
                        .or_default()
                        .push(entry.identity.path.clone());
                }
            }

            for (size, paths) in by_size {
                if paths.len() > 1 {
                    groups.push(DuplicateGroup {
                        digest: digest.clone(),
                        size,
                        paths,
                    });
                }
            }
        }

        groups.sort_by(|a, b| a.paths.cmp(&b.paths));
        groups
    }

    pub fn compute_stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            total_files: self.entries.len(),
            ..StoreStats::default()
        };

        let mut unique = std::collections::HashSet::new();
        for entry in self.entries {
            stats.total_bytes += entry.size;
            match MediaKind::from_extension(&entry.identity.extension) {
                MediaKind::Image => stats.images += 1,
                MediaKind::Video => stats.videos += 1,
                MediaKind::Other => {}
            }
            if entry.perceptual.is_some() {
                stats.with_perceptual += 1;
            }
            if entry.long_hash.is_some() {
                stats.with_long_hash += 1;
            }
            if let Some(short) = &entry.short_hash {
                unique.insert(short);
            }
        }
        stats.unique_short_hashes = unique.len();

        let groups = self.find_duplicate_groups();
        stats.duplicate_groups = groups.len();
        stats.duplicate_files = groups.iter().map(|g| g.paths.len() - 1).sum();

        stats
    }
}

/// Classify a perceptual match by comparing dimensions.
pub fn rank(candidate: &PerceptualHash, stored: &PerceptualHash) -> Ranking {
    if candidate.width > stored.width && candidate.height > stored.height {
        Ranking::Larger
    } else if candidate.area() == stored.area() {
        Ranking::PossiblyCropped
    } else {
        Ranking::Smaller
    }
}
