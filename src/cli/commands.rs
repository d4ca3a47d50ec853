//! Command handler implementations
//!
//! This module contains the implementation of all CLI commands.

use crate::cli::progress::{format_bytes, print_header, print_info, print_warning, ScanProgress, ScanSummary};
use crate::cli::{Args, Commands};
use crate::core::config::{ensure_config_dir, get_config_path, Config, ScanConfig};
use crate::core::error::StoreError;
use crate::store::persist::{
    checkpoint_path, BACKUP_SUFFIX, CHECKPOINT_SUFFIX, DEFAULT_STORE_NAME, PARTIAL_SUFFIX,
};
use crate::store::{extension_of, CapabilitySet, Store};
use anyhow::Result;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use walkdir::{DirEntry, WalkDir};

/// Number of duplicate groups listed by `info`
const MAX_GROUPS_SHOWN: usize = 10;

/// Run the appropriate command based on CLI arguments
pub fn run_command(args: &Args, config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    match &args.command {
        Commands::Scan { path } => {
            scan_directory(config, path, shutdown_flag)?;
        }
        Commands::Prune { path, dry_run } => {
            prune_store(config, path, *dry_run, shutdown_flag)?;
        }
        Commands::Compare { a, b } => {
            compare_stores(a, b, shutdown_flag)?;
        }
        Commands::Info => {
            show_info(config, shutdown_flag)?;
        }
        Commands::GenerateConfig { output } => {
            generate_config_file(config, output.clone())?;
        }
    }

    Ok(())
}

fn store_path(config: &Config) -> PathBuf {
    config
        .store
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_NAME))
}

/// Open the configured store, creating it if needed
fn open_store(config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<Store> {
    let path = store_path(config);
    let mut store = Store::open(
        Some(path.as_path()),
        config.store.capabilities.to_capabilities(),
        shutdown_flag,
    )?;
    store.set_silent(config.scan.silent);
    Ok(store)
}

/// Open a store that must already exist on disk
fn open_existing(path: &Path, shutdown_flag: Arc<AtomicBool>) -> Result<Store> {
    if !path.is_file() && !checkpoint_path(path).is_file() {
        return Err(anyhow::anyhow!("No store found at {}", path.display()));
    }
    Ok(Store::open(Some(path), CapabilitySet::new(), shutdown_flag)?)
}

// ============================================================================
// Scan
// ============================================================================

/// Prune, scan and save the configured store
pub fn scan_directory(config: &Config, root: &Path, shutdown_flag: Arc<AtomicBool>) -> Result<ScanSummary> {
    if !root.is_dir() {
        return Err(anyhow::anyhow!("Not a directory: {}", root.display()));
    }

    let mut store = open_store(config, Arc::clone(&shutdown_flag))?;
    info!(
        "Scanning {} into {} ({} entries)",
        root.display(),
        store.path().display(),
        store.len()
    );

    let progress = if config.scan.silent {
        ScanProgress::hidden()
    } else {
        ScanProgress::new()
    };

    let summary = match scan_into(&mut store, &config.scan, root, &shutdown_flag, &progress) {
        Ok(summary) => summary,
        Err(e) => {
            progress.finish_with_error(&e.to_string());
            return Err(e.into());
        }
    };

    store.flush(None, true)?;

    if !config.scan.silent {
        print_info(&format!(
            "{} new files ({}), {} already known, {} errors",
            summary.files_added,
            format_bytes(summary.bytes_added),
            summary.files_known,
            summary.errors
        ));
        print_info(&format!("Store now holds {} entries", store.len()));
    }

    Ok(summary)
}

/// Prune `store` against `root`, then record every unknown file below it.
///
/// Per-file failures are logged and counted; cancellation and store-level
/// failures stop the scan. Nothing is flushed here.
pub fn scan_into(
    store: &mut Store,
    scan: &ScanConfig,
    root: &Path,
    shutdown_flag: &AtomicBool,
    progress: &ScanProgress,
) -> std::result::Result<ScanSummary, StoreError> {
    if scan.short_hash_only && !scan.raw {
        warn!("Using short hashes without specifying the raw hash mode may lead to false positive collisions");
    }

    store.prune(root, false)?;

    let own_files = StoreFiles::new(store.path());
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !skip_directory(entry, scan));

    for item in walker {
        if shutdown_flag.load(Ordering::SeqCst) {
            return Err(StoreError::Cancelled);
        }

        let entry = match item {
            Ok(entry) => entry,
            Err(e) => {
                progress.suspend(|| error!("Error walking directory: {}", e));
                progress.file_failed();
                continue;
            }
        };

        if !entry.file_type().is_file() || own_files.contains(entry.path()) {
            continue;
        }

        let extension = extension_of(&entry.file_name().to_string_lossy());
        if scan.exclude_extensions.iter().any(|e| *e == extension) {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        match scan_file(store, scan, root, relative, &extension) {
            Ok(false) => progress.file_known(),
            Ok(true) => {
                if !scan.silent {
                    progress.suspend(|| info!("[ADDITION] File: {}", relative.display()));
                }
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                progress.file_added(size);
            }
            Err(e) if e.is_per_file() => {
                progress.suspend(|| error!("Error on file {}: {}", entry.path().display(), e));
                progress.file_failed();
            }
            Err(e) => return Err(e),
        }
    }

    Ok(progress.finish())
}

/// Look a file up and record it when unknown. Returns whether it was added.
fn scan_file(
    store: &mut Store,
    scan: &ScanConfig,
    root: &Path,
    relative: &Path,
    extension: &str,
) -> std::result::Result<bool, StoreError> {
    let known = if scan.shallow() {
        store.lookup_shallow(root, relative, extension, scan.raw)?
    } else {
        store.lookup_full(root, relative, extension, true, scan.raw)?
    };

    if known {
        return Ok(false);
    }

    store.add(root, relative, extension, !scan.short_hash_only, scan.raw)?;
    Ok(true)
}

/// Excluded directory names and directories holding the skip marker
fn skip_directory(entry: &DirEntry, scan: &ScanConfig) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }

    if entry.depth() > 0 {
        let name = entry.file_name().to_string_lossy();
        if scan.exclude_dirs.iter().any(|d| *d == name) {
            return true;
        }
    }

    if !scan.skip_marker.is_empty() && entry.path().join(&scan.skip_marker).is_file() {
        info!("Skipping below {}", entry.path().display());
        return true;
    }

    false
}

/// The store file and its siblings, which a scan must not record
struct StoreFiles {
    dir: Option<PathBuf>,
    name: String,
}

impl StoreFiles {
    fn new(store_path: &Path) -> Self {
        let parent = store_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));

        Self {
            dir: parent.canonicalize().ok(),
            name: store_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    fn contains(&self, path: &Path) -> bool {
        let Some(dir) = &self.dir else {
            return false;
        };
        if self.name.is_empty() {
            return false;
        }
        let named = path.file_name().is_some_and(|n| {
            let n = n.to_string_lossy();
            n == self.name.as_str()
                || [CHECKPOINT_SUFFIX, PARTIAL_SUFFIX, BACKUP_SUFFIX]
                    .iter()
                    .any(|suffix| n.strip_prefix(self.name.as_str()) == Some(*suffix))
        });

        named
            && path
                .parent()
                .and_then(|p| p.canonicalize().ok())
                .is_some_and(|p| &p == dir)
    }
}

// ============================================================================
// Prune
// ============================================================================

/// Remove entries whose files are gone from `root`
pub fn prune_store(config: &Config, root: &Path, dry_run: bool, shutdown_flag: Arc<AtomicBool>) -> Result<usize> {
    let mut store = open_existing(&store_path(config), shutdown_flag)?;
    store.set_silent(config.scan.silent);

    let removed = store.prune(root, dry_run)?;
    if removed > 0 && !dry_run {
        store.flush(None, true)?;
    }

    if dry_run {
        print_info(&format!("{} entries would be removed", removed));
    } else {
        print_info(&format!("Removed {} entries, {} remain", removed, store.len()));
    }

    Ok(removed)
}

// ============================================================================
// Compare
// ============================================================================

/// Print entries present in only one of the two stores, in both directions
pub fn compare_stores(a: &Path, b: &Path, shutdown_flag: Arc<AtomicBool>) -> Result<(usize, usize)> {
    let first = open_existing(a, Arc::clone(&shutdown_flag))?;
    let second = open_existing(b, shutdown_flag)?;

    if first.capabilities() != second.capabilities() {
        warn!(
            "Stores use different capabilities ({:?} vs {:?}); digests may not be comparable",
            first.capabilities(),
            second.capabilities()
        );
    }

    let only_first = report_only(&second, &first);
    let only_second = report_only(&first, &second);

    println!();
    print_info(&format!("{} entries only in {}", only_first, a.display()));
    print_info(&format!("{} entries only in {}", only_second, b.display()));

    Ok((only_first, only_second))
}

/// Print the entries of `store` that `reference` has no equivalent for
fn report_only(reference: &Store, store: &Store) -> usize {
    let table = store
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| store.path().display().to_string());

    let missing = reference.compare(store);
    for entry in &missing {
        println!("[ONLY][{}] {}", table, entry.identity.path);
    }
    missing.len()
}

// ============================================================================
// Info
// ============================================================================

/// Show version, capabilities and statistics of the configured store
pub fn show_info(config: &Config, shutdown_flag: Arc<AtomicBool>) -> Result<()> {
    let path = store_path(config);
    if !path.is_file() && !checkpoint_path(&path).is_file() {
        print_warning(&format!("No store at {}", path.display()));
        return Ok(());
    }

    let store = open_existing(&path, shutdown_flag)?;
    let stats = store.stats();

    print_header("Identity Store");

    println!("Store:        {}", store.path().display());
    println!("Version:      {}", store.version());
    let capabilities: Vec<String> = store.capabilities().iter().map(|c| format!("{:?}", c)).collect();
    if capabilities.is_empty() {
        println!("Capabilities: (none)");
    } else {
        println!("Capabilities: {}", capabilities.join(", "));
    }
    println!();

    println!("Entries:");
    println!("   ├─ Files:        {} ({})", stats.total_files, format_bytes(stats.total_bytes));
    println!("   ├─ Images:       {}", stats.images);
    println!("   ├─ Videos:       {}", stats.videos);
    println!("   ├─ Perceptual:   {}", stats.with_perceptual);
    println!("   ├─ Long digest:  {}", stats.with_long_hash);
    println!("   └─ Short digests: {} unique", stats.unique_short_hashes);
    println!();

    if stats.duplicate_groups == 0 {
        print_info("No duplicate groups");
        return Ok(());
    }

    print_info(&format!(
        "{} duplicate groups covering {} files",
        stats.duplicate_groups, stats.duplicate_files
    ));
    for group in store.duplicate_groups().iter().take(MAX_GROUPS_SHOWN) {
        println!();
        println!("   {} ({})", group.digest.to_hex(), format_bytes(group.size));
        for path in &group.paths {
            println!("      {}", path);
        }
    }
    if stats.duplicate_groups > MAX_GROUPS_SHOWN {
        println!();
        print_info(&format!("... and {} more", stats.duplicate_groups - MAX_GROUPS_SHOWN));
    }

    Ok(())
}

// ============================================================================
// Config
// ============================================================================

/// Write the effective configuration as TOML
///
/// Without `output` the file goes to the standard config location.
pub fn generate_config_file(config: &Config, output: Option<PathBuf>) -> Result<PathBuf> {
    let output_path = match output {
        Some(path) => path,
        None => {
            ensure_config_dir()?;
            get_config_path().ok_or_else(|| anyhow::anyhow!("No configuration directory on this system"))?
        }
    };

    config.save(&output_path)?;

    info!("Configuration file: {}", output_path.display());
    info!("Edit this file to change store, scan and logging settings.");

    Ok(output_path)
}
