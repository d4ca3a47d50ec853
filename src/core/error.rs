//! Error types for the identity store
//!
//! Decoder failures on individual files are deliberately absent here: they are
//! reported through [`crate::digest::DecodeOutcome`] and degrade to a fallback
//! digest instead of aborting a scan.

use crate::core::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the identity store
#[derive(Error, Debug)]
pub enum StoreError {
    /// General I/O error
    #[error("IO error: {0}")]
    Io(String),

    /// The decrypted payload is not a recognised store record
    #[error("Unrecognised store format: {0}")]
    Format(String),

    /// Encryption, decryption or key material failure
    #[error("Encryption error: {0}")]
    Crypto(String),

    /// The operation was interrupted by the shutdown flag
    #[error("Operation cancelled")]
    Cancelled,

    /// The store path points at a directory
    #[error("Store path is a directory, not a file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Configuration could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Whether a scan should keep going after this error.
    ///
    /// Cancellation always propagates; format, crypto and configuration
    /// failures leave the store unusable. I/O failures and non-regular files
    /// are scoped to the file being processed.
    pub fn is_per_file(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::NotAFile(_))
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Format(err.to_string())
    }
}
