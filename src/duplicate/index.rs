//! Inverted digest index
//!
//! Maps digest values, media kinds and relative paths to positions in the
//! store's entry sequence. Nothing here is persisted; the index is rebuilt
//! from the entries on load and after any removal, and appended to on add.

use crate::digest::MediaKind;
use crate::store::{Digest, Entry};
use std::collections::HashMap;

/// Bytes of a perceptual digest used as its index key
pub const PERCEPTUAL_KEY_LEN: usize = 8;

/// Positions of entries keyed by digest and media kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestIndex {
    /// Short digest -> entry positions
    short_index: HashMap<Digest, Vec<usize>>,

    /// Long digest -> entry positions
    long_index: HashMap<Digest, Vec<usize>>,

    /// Perceptual digest prefix -> entry positions
    perceptual_index: HashMap<Digest, Vec<usize>>,

    /// Media kind -> positions of entries carrying a perceptual digest
    media_index: HashMap<MediaKind, Vec<usize>>,

    /// Relative path -> first position recorded for it
    path_index: HashMap<String, usize>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index over every entry, in order
    pub fn build(entries: &[Entry]) -> Self {
        let mut index = Self::new();
        for (position, entry) in entries.iter().enumerate() {
            index.insert(position, entry);
        }
        index
    }

    /// Record `entry` at `position` in every mapping
    pub fn insert(&mut self, position: usize, entry: &Entry) {
        self.path_index
            .entry(entry.identity.path.clone())
            .or_insert(position);

        if let Some(short) = &entry.short_hash {
            self.short_index.entry(short.clone()).or_default().push(position);
        }

        if let Some(long) = &entry.long_hash {
            self.long_index.entry(long.clone()).or_default().push(position);
        }

        if let Some(perceptual) = &entry.perceptual {
            self.perceptual_index
                .entry(perceptual.digest.prefix(PERCEPTUAL_KEY_LEN))
                .or_default()
                .push(position);

            let kind = MediaKind::from_extension(&entry.identity.extension);
            if kind.is_visual() {
                self.media_index.entry(kind).or_default().push(position);
            }
        }
    }

    pub fn by_short(&self, digest: &Digest) -> &[usize] {
        self.short_index.get(digest).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_long(&self, digest: &Digest) -> &[usize] {
        self.long_index.get(digest).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_perceptual(&self, digest: &Digest) -> &[usize] {
        self.perceptual_index
            .get(&digest.prefix(PERCEPTUAL_KEY_LEN))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_media(&self, kind: MediaKind) -> &[usize] {
        self.media_index.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn by_path(&self, path: &str) -> Option<usize> {
        self.path_index.get(path).copied()
    }

    /// Short digests that map to more than one entry
    pub fn shared_short_digests(&self) -> impl Iterator<Item = (&Digest, &[usize])> {
        self.short_index
            .iter()
            .filter(|(_, positions)| positions.len() > 1)
            .map(|(digest, positions)| (digest, positions.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Identity, PerceptualHash};

    fn entry(path: &str, short: u8, long: Option<u8>, perceptual: Option<u8>) -> Entry {
        Entry {
            size: 100,
            short_hash: Some(Digest::new(vec![short; 32])),
            long_hash: long.map(|b| Digest::new(vec![b; 32])),
            identity: Identity::from_parts(path, crate::store::extension_of(path).as_str()),
            perceptual: perceptual.map(|b| PerceptualHash {
                digest: Digest::new(vec![b; 8]),
                width: 10,
                height: 10,
            }),
        }
    }

    #[test]
    fn test_empty_index() {
        let index = DigestIndex::new();
        assert!(index.by_short(&Digest::new(vec![1; 32])).is_empty());
        assert!(index.by_media(MediaKind::Image).is_empty());
    }

    #[test]
    fn test_build_maps_all_digests() {
        let entries = vec![
            entry("a.jpg", 1, Some(10), Some(20)),
            entry("b.jpg", 1, None, Some(20)),
            entry("c.txt", 2, Some(11), None),
            entry("d.mp4", 3, None, Some(21)),
        ];
        let index = DigestIndex::build(&entries);

        assert_eq!(index.by_short(&Digest::new(vec![1; 32])), &[0, 1]);
        assert_eq!(index.by_long(&Digest::new(vec![11; 32])), &[2]);
        assert_eq!(index.by_perceptual(&Digest::new(vec![20; 8])), &[0, 1]);
        assert_eq!(index.by_media(MediaKind::Image), &[0, 1]);
        assert_eq!(index.by_media(MediaKind::Video), &[3]);
        assert!(index.by_media(MediaKind::Other).is_empty());
        assert_eq!(index.by_path("c.txt"), Some(2));
        assert_eq!(index.by_path("missing.txt"), None);
    }

    #[test]
    fn test_incremental_insert_matches_build() {
        let entries = vec![
            entry("a.png", 1, Some(10), Some(20)),
            entry("b.png", 2, Some(10), None),
        ];

        let mut incremental = DigestIndex::new();
        for (position, e) in entries.iter().enumerate() {
            incremental.insert(position, e);
        }

        assert_eq!(incremental, DigestIndex::build(&entries));
    }

    #[test]
    fn test_shared_short_digests() {
        let entries = vec![
            entry("a.bin", 1, None, None),
            entry("b.bin", 1, None, None),
            entry("c.bin", 2, None, None),
        ];
        let index = DigestIndex::build(&entries);

        let shared: Vec<_> = index.shared_short_digests().collect();
        assert_eq!(shared.len(), 1);
        assert_eq!(shared[0].1, &[0, 1]);
    }
}
