//! Duplicate detection module
//!
//! This module decides whether a file is already represented in a store,
//! either as exact content or as perceptually similar media.
//!
//! # Submodules
//!
//! - `index` - Inverted digest index over the store's entries
//! - `detector` - Tiered collision checks, ranking and statistics

pub mod detector;
pub mod index;

pub use detector::{Collision, CollisionDetector, DigestTier, DuplicateGroup, Ranking, StoreStats};
pub use index::DigestIndex;
