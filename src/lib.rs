//! Identity Store Library
//!
//! Records a content identity for every file under a directory tree and
//! answers whether a given file is already known, either as an exact copy
//! or, for images and videos, as a near-duplicate.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - [`core`] - Configuration and error handling
//! - [`crypto`] - The encryption boundary around store files
//! - [`digest`] - Short, long and perceptual digests of file content
//! - [`duplicate`] - The inverted digest index and tiered collision checks
//! - [`store`] - The persistent store: load, lookup, add, prune, flush
//! - [`cli`] - Command-line interface (only used by the binary)
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use identity_store::core::config::Config;
//! use identity_store::store::Store;
//! use std::path::Path;
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     let shutdown_flag = Arc::new(AtomicBool::new(false));
//!
//!     let mut store = Store::open(
//!         config.store.path.as_deref(),
//!         config.store.capabilities.to_capabilities(),
//!         shutdown_flag,
//!     )?;
//!
//!     let root = Path::new("/photos");
//!     let file = Path::new("holiday/IMG_0001.jpg");
//!     if !store.lookup_full(root, file, "jpg", true, config.scan.raw)? {
//!         store.add(root, file, "jpg", true, config.scan.raw)?;
//!     }
//!
//!     for group in store.duplicate_groups() {
//!         println!("{:?}", group.paths);
//!     }
//!
//!     store.flush(None, true)?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **Tiered matching** - Short digest, then full digest, then perceptual similarity
//! - **Pixel digests** - Images are identified by decoded content, not container bytes
//! - **Near-duplicate ranking** - Larger, possibly cropped or smaller than the stored copy
//! - **Crash recovery** - Periodic `.tmp` checkpoints during long scans
//! - **Encrypted at rest** - Store files are sealed with a machine-bound key

pub mod cli;
pub mod core;
pub mod crypto;
pub mod digest;
pub mod duplicate;
pub mod store;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
