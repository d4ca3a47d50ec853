//! Command-line argument definitions
//!
//! This module defines all CLI arguments and subcommands using clap.

use crate::core::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Record file identities and find exact and near-duplicate files
#[derive(Parser, Debug)]
#[command(name = "identity-store")]
#[command(version)]
#[command(about = "Content-addressed file identity store: find exact and near-duplicate files across directory trees", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Store file to use (overrides config; defaults to ./.!HashList)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Digest file bytes even for images instead of decoded pixels
    #[arg(long, global = true)]
    pub raw: bool,

    /// Stop at the short digest when checking for known files
    #[arg(long, global = true)]
    pub fast: bool,

    /// Never compute full-file digests (implies --fast)
    #[arg(long, global = true)]
    pub short_hash: bool,

    /// Suppress per-file collision output
    #[arg(long, global = true)]
    pub silent: bool,

    /// New stores: compute perceptual digests for images and videos
    #[arg(long, global = true)]
    pub perceptual: bool,

    /// New stores: use SHA-512/256 instead of SHA3-256
    #[arg(long, global = true)]
    pub sha512: bool,

    /// New stores: include the middle of the file in the short digest
    #[arg(long, global = true)]
    pub centred_short_hash: bool,

    /// New stores: 1 MiB short digest blocks
    #[arg(long, global = true)]
    pub medium_block: bool,

    /// New stores: 16 MiB short digest blocks
    #[arg(long, global = true)]
    pub large_block: bool,

    /// Log level: error, warn, info, debug, trace (overrides config)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record every file under a directory that the store does not know yet
    ///
    /// Stale entries are pruned first. Files in `.git` directories, git
    /// metadata files and directories containing a `.skipfolder` marker are
    /// skipped.
    Scan {
        /// Directory to scan
        path: PathBuf,
    },

    /// Remove entries whose files no longer exist under a directory
    Prune {
        /// Directory the store's relative paths are resolved against
        path: PathBuf,

        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// List entries present in only one of two stores
    Compare {
        /// First store file
        a: PathBuf,

        /// Second store file
        b: PathBuf,
    },

    /// Show store version, capabilities and statistics
    Info,

    /// Write the current configuration to a TOML file
    GenerateConfig {
        /// Output path for the config file (defaults to standard location)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Args {
    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref store) = self.store {
            config.store.path = Some(store.clone());
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }

        let scan = &mut config.scan;
        scan.raw |= self.raw;
        scan.fast |= self.fast;
        scan.short_hash_only |= self.short_hash;
        scan.silent |= self.silent;

        let caps = &mut config.store.capabilities;
        caps.perceptual |= self.perceptual;
        caps.sha512 |= self.sha512;
        caps.centred_short_hash |= self.centred_short_hash;
        caps.medium_block |= self.medium_block;
        caps.large_block |= self.large_block;
    }
}
