//! Persistent identity store
//!
//! [`Store`] owns the ordered entry list, the capability set and version
//! tag, and the derived [`DigestIndex`]. Opening runs the load state
//! machine over the primary file and its `.tmp` checkpoint; lookups run the
//! tiered collision checks; adds hash and append, checkpointing every
//! 256 MiB of newly hashed data; flushes encrypt and atomically replace the
//! target file.
//!
//! A store assumes it is the only process using its file. Concurrent
//! processes against one store path are not coordinated.
//!
//! # Example
//!
//! ```rust,no_run
//! use identity_store::store::{CapabilitySet, Store};
//! use std::path::Path;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! let shutdown = Arc::new(AtomicBool::new(false));
//! let mut store = Store::open(None, CapabilitySet::new(), shutdown).unwrap();
//!
//! let root = Path::new("/photos");
//! let file = Path::new("2021/beach.jpg");
//! if !store.lookup_full(root, file, "jpg", true, false).unwrap() {
//!     store.add(root, file, "jpg", true, false).unwrap();
//! }
//! store.flush(None, true).unwrap();
//! ```

pub mod entry;
pub mod persist;
pub mod record;

pub use entry::{
    extension_of, normalize_extension, normalize_path, Capability, CapabilitySet, Digest, Entry,
    Identity, PerceptualHash,
};
pub use record::{LoadedRecord, CURRENT_VERSION, EARLIEST_VERSION};

use crate::core::error::{Result, StoreError};
use crate::crypto::{machine_key, Sealer, XChaCha20Sealer};
use crate::digest::DigestEngine;
use crate::duplicate::{Collision, CollisionDetector, DigestIndex, DigestTier, DuplicateGroup, StoreStats};
use log::{debug, error, info, warn};
use persist::Source;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Newly hashed bytes after which a checkpoint is written
pub const CHECKPOINT_THRESHOLD: u64 = 256 * 1024 * 1024;

/// Result of a lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Nothing in the store matches
    Unknown,
    /// Zero-byte file; always treated as known and never recorded
    Empty,
    /// An entry matched
    Collision(Collision),
}

impl Lookup {
    pub fn is_known(&self) -> bool {
        !matches!(self, Lookup::Unknown)
    }
}

/// Result of checking a recorded path against the size now on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathCheck {
    Known,
    SizeChanged { recorded: u64, current: u64 },
    Unknown,
}

/// A loaded identity store
pub struct Store {
    path: PathBuf,
    version: u32,
    capabilities: CapabilitySet,
    entries: Vec<Entry>,
    index: DigestIndex,
    engine: DigestEngine,
    sealer: Box<dyn Sealer>,
    shutdown: Arc<AtomicBool>,
    unflushed_bytes: u64,
    checkpoint_threshold: u64,
    warned_same_path: bool,
    silent: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("entries", &self.entries.len())
            .field("engine", &self.engine)
            .finish()
    }
}

/// Open a file under `root`, returning its full path, handle and size.
fn open_candidate(root: &Path, relative: &Path) -> Result<(PathBuf, File, u64)> {
    let full = root.join(relative);
    let file = File::open(&full)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(StoreError::NotAFile(full));
    }
    Ok((full, file, metadata.len()))
}

impl Store {
    /// Open a store sealed with this machine's key.
    ///
    /// `path` defaults to `./.!HashList`. `capabilities` only apply when a
    /// new store is created; an existing store keeps its own.
    pub fn open(
        path: Option<&Path>,
        capabilities: CapabilitySet,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let sealer = XChaCha20Sealer::new(machine_key()?);
        Self::open_with_sealer(path, capabilities, Box::new(sealer), shutdown)
    }

    /// Open a store with an explicit encryption boundary.
    pub fn open_with_sealer(
        path: Option<&Path>,
        capabilities: CapabilitySet,
        sealer: Box<dyn Sealer>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(persist::DEFAULT_STORE_NAME));

        let record = match persist::choose_source(&path)? {
            Source::Fresh => {
                if !path.exists() {
                    persist::create_empty(&path)?;
                }
                LoadedRecord {
                    version: CURRENT_VERSION,
                    capabilities: capabilities.clone(),
                    entries: Vec::new(),
                }
            }
            Source::Primary => Self::load(&path, sealer.as_ref())?,
            Source::Checkpoint => {
                let checkpoint = persist::checkpoint_path(&path);
                info!("Recovering from checkpoint {}", checkpoint.display());
                Self::load(&checkpoint, sealer.as_ref())?
            }
        };

        if !capabilities.is_empty() && record.capabilities != capabilities {
            warn!(
                "Store {} was created with capabilities {:?}; requested {:?} ignored",
                path.display(),
                record.capabilities,
                capabilities
            );
        }

        info!(
            "Loaded {} entries (version {}) from {}",
            record.entries.len(),
            record.version,
            path.display()
        );

        Ok(Self {
            index: DigestIndex::build(&record.entries),
            engine: DigestEngine::new(&record.capabilities, Arc::clone(&shutdown)),
            path,
            version: record.version,
            capabilities: record.capabilities,
            entries: record.entries,
            sealer,
            shutdown,
            unflushed_bytes: 0,
            checkpoint_threshold: CHECKPOINT_THRESHOLD,
            warned_same_path: false,
            silent: false,
        })
    }

    fn load(path: &Path, sealer: &dyn Sealer) -> Result<LoadedRecord> {
        let blob = persist::read_blob(path)?;
        let plaintext = sealer.open(&blob)?;
        record::decode(&plaintext)
    }

    /// Suppress collision and empty-file diagnostics
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn set_checkpoint_threshold(&mut self, bytes: u64) {
        self.checkpoint_threshold = bytes;
    }

    /// Replace the digest engine. It must be built from this store's
    /// [`Store::capabilities`].
    pub fn with_engine(mut self, engine: DigestEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn detector(&self) -> CollisionDetector<'_> {
        CollisionDetector::new(&self.entries, &self.index)
    }

    fn rebuild_index(&mut self) {
        self.index = DigestIndex::build(&self.entries);
    }

    /// Whether the file is known by its short digest alone.
    pub fn lookup_shallow(
        &mut self,
        root: &Path,
        relative: &Path,
        extension: &str,
        raw: bool,
    ) -> Result<bool> {
        Ok(self.lookup_shallow_detailed(root, relative, extension, raw)?.is_known())
    }

    /// Whether the file is known, confirming with the long digest when
    /// `deep` is set and falling back to perceptual similarity.
    pub fn lookup_full(
        &mut self,
        root: &Path,
        relative: &Path,
        extension: &str,
        deep: bool,
        raw: bool,
    ) -> Result<bool> {
        Ok(self
            .lookup_full_detailed(root, relative, extension, deep, raw)?
            .is_known())
    }

    pub fn lookup_shallow_detailed(
        &mut self,
        root: &Path,
        relative: &Path,
        extension: &str,
        raw: bool,
    ) -> Result<Lookup> {
        let (full, mut file, size) = open_candidate(root, relative)?;
        let identity = Identity::new(relative, extension);

        if size == 0 {
            return Ok(self.report_empty(&identity));
        }

        let short = self
            .engine
            .short_digest(&mut file, size, &full, &identity.extension, raw)?;
        let found = self
            .detector()
            .find_exact(DigestTier::Short, &short, size, &identity);

        Ok(self.report(found, &identity))
    }

    pub fn lookup_full_detailed(
        &mut self,
        root: &Path,
        relative: &Path,
        extension: &str,
        deep: bool,
        raw: bool,
    ) -> Result<Lookup> {
        let (full, mut file, size) = open_candidate(root, relative)?;
        let identity = Identity::new(relative, extension);

        if size == 0 {
            return Ok(self.report_empty(&identity));
        }

        let short = self
            .engine
            .short_digest(&mut file, size, &full, &identity.extension, raw)?;
        let mut found = self
            .detector()
            .find_exact(DigestTier::Short, &short, size, &identity);

        if found.is_some() && deep {
            let long = self
                .engine
                .long_digest(&mut file, size, &full, &identity.extension, raw)?;
            found = self
                .detector()
                .find_exact(DigestTier::Long, &long, size, &identity);
        }

        if found.is_none() && self.engine.computes_perceptual() {
            if let Some(perceptual) =
                self.engine
                    .perceptual_digest(&mut file, &full, &identity.extension)?
            {
                found = self
                    .detector()
                    .find_perceptual(&perceptual, &identity, &self.shutdown)?;
            }
        }

        Ok(self.report(found, &identity))
    }

    fn report_empty(&self, identity: &Identity) -> Lookup {
        if !self.silent {
            info!("[EMPTY] File \"{}\" is empty", identity.path);
        }
        Lookup::Empty
    }

    fn report(&mut self, found: Option<Collision>, identity: &Identity) -> Lookup {
        let Some(collision) = found else {
            return Lookup::Unknown;
        };

        let stored = &self.entries[collision.position()].identity.path;
        if !self.silent {
            match &collision {
                Collision::SameFile { .. } => {
                    if !self.warned_same_path {
                        warn!(
                            "File collision on identical path \"{}\". This directory has likely already been scanned",
                            identity.path
                        );
                        self.warned_same_path = true;
                    }
                }
                Collision::Duplicate { .. } => {
                    info!("[COLLISION] File \"{}\" collided with \"{}\"", identity.path, stored);
                }
                Collision::NearDuplicate {
                    ranking, distance, ..
                } => {
                    info!(
                        "[COLLISION] File \"{}\" resembles \"{}\" ({:?}, distance {:.3})",
                        identity.path, stored, ranking, distance
                    );
                }
            }
        }

        Lookup::Collision(collision)
    }

    /// Hash a file and record it.
    ///
    /// Re-adding a path whose size and short digest are unchanged does
    /// nothing. A path whose content changed has its entry replaced in
    /// place. Zero-byte files are never recorded.
    pub fn add(
        &mut self,
        root: &Path,
        relative: &Path,
        extension: &str,
        compute_long: bool,
        raw: bool,
    ) -> Result<()> {
        let (full, mut file, size) = open_candidate(root, relative)?;
        let identity = Identity::new(relative, extension);

        if size == 0 {
            debug!("Not recording empty file {}", identity.path);
            return Ok(());
        }

        let short = self
            .engine
            .short_digest(&mut file, size, &full, &identity.extension, raw)?;

        let existing = self.index.by_path(&identity.path);
        if let Some(position) = existing {
            let current = &self.entries[position];
            let unchanged = current.size == size && current.short_hash.as_ref() == Some(&short);
            if unchanged && (!compute_long || current.long_hash.is_some()) {
                debug!("{} is already recorded", identity.path);
                return Ok(());
            }
        }

        let long_hash = if compute_long {
            Some(
                self.engine
                    .long_digest(&mut file, size, &full, &identity.extension, raw)?,
            )
        } else {
            None
        };
        let perceptual = self
            .engine
            .perceptual_digest(&mut file, &full, &identity.extension)?;

        let entry = Entry {
            size,
            short_hash: Some(short),
            long_hash,
            identity,
            perceptual,
        };

        match existing {
            Some(position) => {
                info!("Replacing stale entry for {}", entry.identity.path);
                self.entries[position] = entry;
                self.rebuild_index();
            }
            None => {
                let position = self.entries.len();
                self.index.insert(position, &entry);
                self.entries.push(entry);
            }
        }

        self.unflushed_bytes += size;
        if self.unflushed_bytes > self.checkpoint_threshold {
            // entry is already held in memory; the next add retries
            if let Err(e) = self.checkpoint() {
                error!("Failed to save checkpoint for {}: {}", self.path.display(), e);
            }
        }

        Ok(())
    }

    /// Flush to the `.tmp` sibling without touching the primary file.
    pub fn checkpoint(&mut self) -> Result<()> {
        let target = persist::checkpoint_path(&self.path);
        info!("[CHECKPOINT] Saving checkpoint to {}", target.display());
        self.write_to(&target, false)?;
        self.unflushed_bytes = 0;
        Ok(())
    }

    /// Encrypt and write the store.
    ///
    /// `path` defaults to the store's own file; a directory gets
    /// `.!HashList` inside it. Without `overwrite`, an existing target is
    /// kept as `<target>.bak`.
    pub fn flush(&mut self, path: Option<&Path>, overwrite: bool) -> Result<()> {
        let target = path
            .map(persist::resolve_target)
            .unwrap_or_else(|| self.path.clone());

        self.write_to(&target, !overwrite)?;

        if persist::same_file(&target, &self.path) {
            persist::discard_checkpoint(&self.path)?;
            self.unflushed_bytes = 0;
        }

        info!("Saved {} entries to {}", self.entries.len(), target.display());
        Ok(())
    }

    fn write_to(&self, target: &Path, keep_backup: bool) -> Result<()> {
        let plaintext = record::encode(self.version, &self.capabilities, &self.entries)?;
        let blob = self.sealer.seal(&plaintext)?;
        persist::write_blob(target, &blob, keep_backup)
    }

    /// Remove entries whose file no longer exists under `root`.
    ///
    /// Returns the number of entries removed, or that would be removed in a
    /// dry run.
    pub fn prune(&mut self, root: &Path, dry_run: bool) -> Result<usize> {
        let silent = self.silent;
        let exists = |entry: &Entry| {
            let found = root.join(&entry.identity.path).exists();
            if !found && !silent {
                info!("File {} not found, pruning entry", entry.identity.path);
            }
            found
        };

        let removed = if dry_run {
            self.entries.iter().filter(|e| !exists(e)).count()
        } else {
            let before = self.entries.len();
            self.entries.retain(exists);
            before - self.entries.len()
        };

        if removed > 0 && !dry_run {
            self.rebuild_index();
        }

        info!(
            "Pruned {} entries{}",
            removed,
            if dry_run { " (dry run)" } else { "" }
        );
        Ok(removed)
    }

    /// Compare a recorded path's size with the size now on disk.
    pub fn check_at_path(&self, relative: &Path, size: u64) -> PathCheck {
        let path = normalize_path(&relative.to_string_lossy());
        let Some(position) = self.index.by_path(&path) else {
            return PathCheck::Unknown;
        };

        let recorded = self.entries[position].size;
        if recorded == size {
            PathCheck::Known
        } else {
            warn!(
                "Found {}, but its size has changed ({} -> {} bytes)",
                path, recorded, size
            );
            PathCheck::SizeChanged {
                recorded,
                current: size,
            }
        }
    }

    /// Entries of `other` with no equivalent in this store.
    pub fn compare<'a>(&self, other: &'a Store) -> Vec<&'a Entry> {
        let detector = self.detector();
        other
            .entries
            .iter()
            .filter(|entry| !detector.is_represented(entry))
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        self.detector().compute_stats()
    }

    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        self.detector().find_duplicate_groups()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;
    use crate::digest::perceptual::tests::pattern;
    use crate::digest::perceptual::FrameSource;
    use crate::digest::DecodeOutcome;
    use crate::duplicate::Ranking;
    use image::imageops::FilterType;
    use std::fs;
    use tempfile::TempDir;

    fn sealer() -> Box<dyn Sealer> {
        Box::new(XChaCha20Sealer::new(SecretKey::from_bytes([42u8; 32])))
    }

    fn no_shutdown() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    fn open(path: &Path, capabilities: &[Capability]) -> Store {
        let caps: CapabilitySet = capabilities.iter().copied().collect();
        Store::open_with_sealer(Some(path), caps, sealer(), no_shutdown()).unwrap()
    }

    fn write(root: &Path, relative: &str, data: &[u8]) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    #[test]
    fn test_open_creates_empty_store() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashes");
        let store = open(&path, &[Capability::Sha512]);

        assert!(path.exists());
        assert!(store.is_empty());
        assert_eq!(store.version(), CURRENT_VERSION);
        assert!(store.capabilities().contains(Capability::Sha512));
    }

    #[test]
    fn test_open_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result =
            Store::open_with_sealer(Some(dir.path()), CapabilitySet::new(), sealer(), no_shutdown());
        assert!(matches!(result, Err(StoreError::NotAFile(_))));
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"alpha");
        write(&root, "sub\\b.txt", b"bravo");
        write(&root, "c.bin", &vec![9u8; 20_000]);
        let path = dir.path().join("hashes");

        let mut store = open(&path, &[Capability::CentredShortHash]);
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        store.add(&root, Path::new("sub\\b.txt"), "TXT", false, false).unwrap();
        store.add(&root, Path::new("c.bin"), "bin", true, true).unwrap();
        store.flush(None, true).unwrap();

        let reopened = open(&path, &[]);
        assert_eq!(reopened.version(), store.version());
        assert_eq!(reopened.capabilities(), store.capabilities());
        assert_eq!(reopened.entries(), store.entries());
        assert_eq!(reopened.entries()[1].identity.path, "sub/b.txt");
        assert_eq!(reopened.entries()[1].identity.extension, "txt");
    }

    #[test]
    fn test_store_file_is_encrypted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "secret-name.txt", b"content");
        let path = dir.path().join("hashes");

        let mut store = open(&path, &[]);
        store.add(&root, Path::new("secret-name.txt"), "txt", true, false).unwrap();
        store.flush(None, true).unwrap();

        let raw = fs::read(&path).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("secret-name"));

        let wrong_key = Box::new(XChaCha20Sealer::new(SecretKey::from_bytes([1u8; 32])));
        let result = Store::open_with_sealer(Some(&path), CapabilitySet::new(), wrong_key, no_shutdown());
        assert!(matches!(result, Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_idempotent_add() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"the same bytes");
        let mut store = open(&dir.path().join("hashes"), &[]);

        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.lookup_full(&root, Path::new("a.txt"), "txt", true, false).unwrap());
        assert_eq!(store.index, DigestIndex::build(store.entries()));
    }

    #[test]
    fn test_changed_content_replaces_entry() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"before");
        write(&root, "b.txt", b"other");
        let mut store = open(&dir.path().join("hashes"), &[]);

        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        store.add(&root, Path::new("b.txt"), "txt", true, false).unwrap();
        write(&root, "a.txt", b"after!!");
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.entries()[0].size, 7);
        assert_eq!(store.index, DigestIndex::build(store.entries()));
    }

    #[test]
    fn test_same_path_is_same_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"hello");
        write(&root, "copy.txt", b"hello");
        let mut store = open(&dir.path().join("hashes"), &[]);
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();

        let same = store
            .lookup_shallow_detailed(&root, Path::new("a.txt"), "txt", false)
            .unwrap();
        assert_eq!(same, Lookup::Collision(Collision::SameFile { position: 0 }));

        let copy = store
            .lookup_full_detailed(&root, Path::new("copy.txt"), "txt", true, false)
            .unwrap();
        assert_eq!(copy, Lookup::Collision(Collision::Duplicate { position: 0 }));
    }

    #[test]
    fn test_prune() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        for name in ["keep1.txt", "gone1.txt", "keep2.txt", "gone2.txt"] {
            write(&root, name, name.as_bytes());
        }
        let mut store = open(&dir.path().join("hashes"), &[]);
        for name in ["keep1.txt", "gone1.txt", "keep2.txt", "gone2.txt"] {
            store.add(&root, Path::new(name), "txt", true, false).unwrap();
        }
        fs::remove_file(root.join("gone1.txt")).unwrap();
        fs::remove_file(root.join("gone2.txt")).unwrap();

        assert_eq!(store.prune(&root, true).unwrap(), 2);
        assert_eq!(store.len(), 4);

        assert_eq!(store.prune(&root, false).unwrap(), 2);
        let paths: Vec<_> = store.entries().iter().map(|e| e.identity.path.as_str()).collect();
        assert_eq!(paths, vec!["keep1.txt", "keep2.txt"]);
        assert_eq!(store.index, DigestIndex::build(store.entries()));
        assert!(store.lookup_full(&root, Path::new("keep2.txt"), "txt", true, false).unwrap());
    }

    #[test]
    fn test_size_gate() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");

        let mut small = vec![0u8; 20_000];
        small[..4096].fill(1);
        small[20_000 - 4096..].fill(2);
        let mut large = vec![0u8; 24_000];
        large[..4096].fill(1);
        large[24_000 - 4096..].fill(2);
        write(&root, "small.bin", &small);
        write(&root, "large.bin", &large);

        let mut store = open(&dir.path().join("hashes"), &[]);
        store.add(&root, Path::new("small.bin"), "bin", false, false).unwrap();

        let short = store.entries()[0].short_hash.clone().unwrap();
        let mut large = fs::File::open(root.join("large.bin")).unwrap();
        let large_short = store
            .engine
            .short_digest(&mut large, 24_000, Path::new("large.bin"), "bin", false)
            .unwrap();
        assert_eq!(short, large_short);

        assert!(!store.lookup_shallow(&root, Path::new("large.bin"), "bin", false).unwrap());
        assert!(!store.lookup_full(&root, Path::new("large.bin"), "bin", false, false).unwrap());
    }

    #[test]
    fn test_empty_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "empty.txt", b"");
        let mut store = open(&dir.path().join("hashes"), &[]);

        assert_eq!(
            store
                .lookup_full_detailed(&root, Path::new("empty.txt"), "txt", true, false)
                .unwrap(),
            Lookup::Empty
        );
        assert!(store.lookup_shallow(&root, Path::new("empty.txt"), "txt", false).unwrap());

        store.add(&root, Path::new("empty.txt"), "txt", true, false).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_perceptual_ranking() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        fs::create_dir_all(&root).unwrap();

        let large = pattern(800, 600);
        let small = large.resize_exact(400, 300, FilterType::Triangle);
        large.save(root.join("large.png")).unwrap();
        large.save(root.join("large-copy.png")).unwrap();
        small.save(root.join("small.png")).unwrap();

        let mut store = open(&dir.path().join("hashes"), &[Capability::PerceptualHash]);
        store.add(&root, Path::new("small.png"), "png", true, false).unwrap();
        assert_eq!(store.entries()[0].perceptual.as_ref().map(|p| p.width), Some(400));

        let lookup = store
            .lookup_full_detailed(&root, Path::new("large.png"), "png", true, false)
            .unwrap();
        match lookup {
            Lookup::Collision(Collision::NearDuplicate {
                position, ranking, ..
            }) => {
                assert_eq!(position, 0);
                assert_eq!(ranking, Ranking::Larger);
            }
            other => panic!("expected a near duplicate, got {:?}", other),
        }

        // Ranking is advisory, nothing is dropped
        assert_eq!(store.len(), 1);

        store.add(&root, Path::new("large.png"), "png", true, false).unwrap();
        let copy = store
            .lookup_full_detailed(&root, Path::new("large-copy.png"), "png", true, false)
            .unwrap();
        assert_eq!(copy, Lookup::Collision(Collision::Duplicate { position: 1 }));
    }

    #[test]
    fn test_recompressed_image_is_near_duplicate() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        fs::create_dir_all(&root).unwrap();
        let image = pattern(64, 48);
        image.save(root.join("a.png")).unwrap();
        image.save(root.join("b.bmp")).unwrap();

        let mut plain = open(&dir.path().join("plain"), &[]);
        plain.add(&root, Path::new("a.png"), "png", true, false).unwrap();
        assert!(!plain.lookup_full(&root, Path::new("b.bmp"), "bmp", true, false).unwrap());

        let mut perceptual = open(&dir.path().join("perceptual"), &[Capability::PerceptualHash]);
        perceptual.add(&root, Path::new("a.png"), "png", true, false).unwrap();
        let lookup = perceptual
            .lookup_full_detailed(&root, Path::new("b.bmp"), "bmp", true, false)
            .unwrap();
        assert_eq!(
            lookup,
            Lookup::Collision(Collision::NearDuplicate {
                position: 0,
                ranking: Ranking::PossiblyCropped,
                distance: 0.0,
            })
        );
    }

    struct StillFrames;

    impl FrameSource for StillFrames {
        fn sample(&self, _: &Path, _: &AtomicBool) -> Result<DecodeOutcome<Vec<Vec<u8>>>> {
            let frame: Vec<u8> = (0..32 * 32).map(|i| (i % 97) as u8).collect();
            Ok(DecodeOutcome::Decoded(vec![frame; 3]))
        }
    }

    #[test]
    fn test_video_near_duplicate() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "clip.mp4", b"first container");
        write(&root, "clip.mkv", b"second container, remuxed");
        write(&root, "notes.txt", b"first container");

        let caps: CapabilitySet = [Capability::PerceptualHash].into_iter().collect();
        let engine = DigestEngine::new(&caps, no_shutdown()).with_frame_source(Box::new(StillFrames));
        let mut store = open(&dir.path().join("hashes"), &[Capability::PerceptualHash]).with_engine(engine);

        store.add(&root, Path::new("clip.mp4"), "mp4", true, false).unwrap();
        assert_eq!(store.entries()[0].perceptual.as_ref().map(|p| p.area()), Some(0));

        let lookup = store
            .lookup_full_detailed(&root, Path::new("clip.mkv"), "mkv", true, false)
            .unwrap();
        assert_eq!(
            lookup,
            Lookup::Collision(Collision::NearDuplicate {
                position: 0,
                ranking: Ranking::PossiblyCropped,
                distance: 0.0,
            })
        );

        // Non-media never enters the perceptual tier
        store.add(&root, Path::new("notes.txt"), "txt", true, false).unwrap();
        assert!(store.entries()[1].perceptual.is_none());
    }

    #[test]
    fn test_legacy_bare_list_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hashes");
        let payload = br#"[[5, "0a", null, ["old/one.txt", "txt"]]]"#;
        fs::write(&path, sealer().seal(payload).unwrap()).unwrap();

        let store = open(&path, &[Capability::PerceptualHash]);
        assert_eq!(store.version(), EARLIEST_VERSION);
        assert!(store.capabilities().is_empty());
        assert_eq!(store.len(), 1);
        assert_eq!(store.check_at_path(Path::new("old/one.txt"), 5), PathCheck::Known);
    }

    #[test]
    fn test_check_at_path() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"12345");
        let mut store = open(&dir.path().join("hashes"), &[]);
        store.add(&root, Path::new("a.txt"), "txt", false, false).unwrap();

        assert_eq!(store.check_at_path(Path::new("a.txt"), 5), PathCheck::Known);
        assert_eq!(
            store.check_at_path(Path::new("a.txt"), 6),
            PathCheck::SizeChanged {
                recorded: 5,
                current: 6
            }
        );
        assert_eq!(store.check_at_path(Path::new("b.txt"), 5), PathCheck::Unknown);
    }

    #[test]
    fn test_checkpoint_recovery() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"some content past the threshold");
        let path = dir.path().join("hashes");

        let mut store = open(&path, &[]);
        store.set_checkpoint_threshold(10);
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        assert!(persist::checkpoint_path(&path).exists());
        drop(store);

        let recovered = open(&path, &[]);
        assert_eq!(recovered.len(), 1);

        let mut recovered = recovered;
        recovered.flush(None, true).unwrap();
        assert!(!persist::checkpoint_path(&path).exists());
    }

    #[test]
    fn test_failed_checkpoint_keeps_entry() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"some content past the threshold");
        let path = dir.path().join("hashes");

        // a directory where the checkpoint's partial file would go
        let blocked = persist::sibling_with_suffix(&persist::checkpoint_path(&path), persist::PARTIAL_SUFFIX);
        fs::create_dir_all(&blocked).unwrap();

        let mut store = open(&path, &[]);
        store.set_checkpoint_threshold(10);
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();

        assert_eq!(store.len(), 1);
        assert!(!persist::checkpoint_path(&path).exists());
    }

    #[test]
    fn test_flush_through_equivalent_path_discards_checkpoint() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"some content past the threshold");
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        let path = dir.path().join("hashes");

        let mut store = open(&dir.path().join("sub").join("..").join("hashes"), &[]);
        store.set_checkpoint_threshold(10);
        store.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        assert!(persist::checkpoint_path(&path).exists());

        store.flush(Some(&path), true).unwrap();
        assert!(!persist::checkpoint_path(&path).exists());
    }

    #[test]
    fn test_images_differing_below_first_row_are_distinct() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        fs::create_dir_all(&root).unwrap();

        let image = pattern(64, 48);
        image.save(root.join("a.bmp")).unwrap();
        let mut painted = image.to_rgb8();
        for y in 30..48 {
            for x in 0..64 {
                painted.put_pixel(x, y, image::Rgb([255, 0, 0]));
            }
        }
        painted.save(root.join("b.bmp")).unwrap();
        assert_eq!(
            fs::metadata(root.join("a.bmp")).unwrap().len(),
            fs::metadata(root.join("b.bmp")).unwrap().len()
        );

        let mut store = open(&dir.path().join("hashes"), &[]);
        store.add(&root, Path::new("a.bmp"), "bmp", true, false).unwrap();

        assert!(!store.lookup_shallow(&root, Path::new("b.bmp"), "bmp", false).unwrap());
    }

    #[test]
    fn test_flush_to_directory_and_backup() {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("export");
        fs::create_dir_all(&export).unwrap();
        let mut store = open(&dir.path().join("hashes"), &[]);

        store.flush(Some(&export), true).unwrap();
        let target = export.join(persist::DEFAULT_STORE_NAME);
        assert!(target.exists());

        store.flush(Some(&export), false).unwrap();
        assert!(persist::sibling_with_suffix(&target, persist::BACKUP_SUFFIX).exists());
    }

    #[test]
    fn test_compare_and_stats() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"shared");
        write(&root, "b.txt", b"shared");
        write(&root, "c.txt", b"only in other");

        let mut mine = open(&dir.path().join("mine"), &[]);
        mine.add(&root, Path::new("a.txt"), "txt", true, false).unwrap();
        mine.add(&root, Path::new("b.txt"), "txt", true, false).unwrap();

        let mut theirs = open(&dir.path().join("theirs"), &[]);
        theirs.add(&root, Path::new("b.txt"), "txt", true, false).unwrap();
        theirs.add(&root, Path::new("c.txt"), "txt", true, false).unwrap();

        let missing = mine.compare(&theirs);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].identity.path, "c.txt");

        let stats = mine.stats();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.duplicate_groups, 1);
        assert_eq!(mine.duplicate_groups()[0].paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_cancelled_add_propagates() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("files");
        write(&root, "a.txt", b"content");
        let shutdown = Arc::new(AtomicBool::new(true));
        let path = dir.path().join("hashes");
        let mut store =
            Store::open_with_sealer(Some(&path), CapabilitySet::new(), sealer(), shutdown).unwrap();

        let result = store.add(&root, Path::new("a.txt"), "txt", true, false);
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(store.is_empty());
    }
}
