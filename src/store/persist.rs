//! On-disk lifecycle of a store file and its checkpoint sibling
//!
//! Every write lands in `<target>.partial` first and is renamed into place
//! after `sync_all`, so neither the primary file nor the `.tmp` checkpoint
//! is ever observed half written.

use crate::core::error::{Result, StoreError};
use log::{debug, info};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// File name used when a store is opened or flushed without a file path
pub const DEFAULT_STORE_NAME: &str = ".!HashList";

/// Suffix of the checkpoint sibling
pub const CHECKPOINT_SUFFIX: &str = ".tmp";

/// Suffix of a write in progress
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix given to a previous store kept by a non-overwriting flush
pub const BACKUP_SUFFIX: &str = ".bak";

/// Which file the load state machine settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Neither file holds data; a new store starts here
    Fresh,
    /// Load the primary file
    Primary,
    /// Load the checkpoint, which is ahead of the primary
    Checkpoint,
}

/// `<path><suffix>`, keeping non-UTF-8 names intact
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub fn checkpoint_path(primary: &Path) -> PathBuf {
    sibling_with_suffix(primary, CHECKPOINT_SUFFIX)
}

/// Resolve a flush target: directories get the default file name inside.
pub fn resolve_target(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(DEFAULT_STORE_NAME)
    } else {
        path.to_path_buf()
    }
}

/// Modification time of a non-empty regular file
fn populated(path: &Path) -> Option<SystemTime> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() == 0 {
        return None;
    }
    metadata.modified().ok().or(Some(SystemTime::UNIX_EPOCH))
}

/// Decide between primary and checkpoint by presence and modification time.
///
/// The checkpoint wins when it is at least as recent as the primary, since
/// that means a session was interrupted after checkpointing.
pub fn choose_source(primary: &Path) -> Result<Source> {
    if primary.is_dir() {
        return Err(StoreError::NotAFile(primary.to_path_buf()));
    }

    let source = match (populated(primary), populated(&checkpoint_path(primary))) {
        (None, None) => Source::Fresh,
        (Some(_), None) => Source::Primary,
        (None, Some(_)) => Source::Checkpoint,
        (Some(primary_time), Some(checkpoint_time)) => {
            if checkpoint_time >= primary_time {
                Source::Checkpoint
            } else {
                Source::Primary
            }
        }
    };

    debug!("Store source for {}: {:?}", primary.display(), source);
    Ok(source)
}

/// Create an empty primary file so the store path exists from the start.
pub fn create_empty(primary: &Path) -> Result<()> {
    if let Some(parent) = primary.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    File::create(primary)?;
    info!("Created new store at {}", primary.display());
    Ok(())
}

pub fn read_blob(path: &Path) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Atomically replace `target` with `blob`.
///
/// With `keep_backup`, an existing target is renamed to `<target>.bak`
/// before the new file takes its place.
pub fn write_blob(target: &Path, blob: &[u8], keep_backup: bool) -> Result<()> {
    let partial = sibling_with_suffix(target, PARTIAL_SUFFIX);

    {
        let mut file = File::create(&partial)?;
        file.write_all(blob)?;
        file.sync_all()?;
    }

    if keep_backup && populated(target).is_some() {
        let backup = sibling_with_suffix(target, BACKUP_SUFFIX);
        fs::rename(target, &backup)?;
        debug!("Kept previous store as {}", backup.display());
    }

    fs::rename(&partial, target)?;
    debug!("Wrote {} bytes to {}", blob.len(), target.display());
    Ok(())
}

/// Whether two paths name the same file, looking through `.`/`..` and links.
pub fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Remove the checkpoint once the primary holds everything it did.
pub fn discard_checkpoint(primary: &Path) -> Result<()> {
    let checkpoint = checkpoint_path(primary);
    match fs::remove_file(&checkpoint) {
        Ok(()) => {
            debug!("Removed checkpoint {}", checkpoint.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
