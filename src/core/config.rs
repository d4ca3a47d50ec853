//! Configuration module for the identity store
//!
//! Supports loading configuration from a TOML file.
//! Configuration is stored in a standard location:
//! - Windows: %APPDATA%\identity_store\config.toml
//! - Linux: ~/.config/identity_store/config.toml
//! - macOS: ~/Library/Application Support/identity_store/config.toml

use crate::store::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application name used for config directory
pub const APP_NAME: &str = "identity_store";

/// Default config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name checked in the working directory
const LOCAL_CONFIG_FILE_NAME: &str = "identity_store.toml";

/// Get the standard configuration directory for the application.
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME))
}

/// Get the standard configuration file path.
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Ensure the configuration directory exists.
///
/// Creates the directory and all parent directories if they don't exist.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let config_dir = get_config_dir().ok_or(ConfigError::ConfigDirNotFound)?;

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)
            .map_err(|e| ConfigError::WriteError(config_dir.clone(), e.to_string()))?;
    }

    Ok(config_dir)
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Store location and capabilities
    pub store: StoreConfig,

    /// Directory scan behaviour
    pub scan: ScanConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the store file (None = `.!HashList` in the working directory)
    pub path: Option<PathBuf>,

    /// Capabilities applied when a new store is created
    pub capabilities: CapabilityConfig,
}

/// Capability flags for newly created stores.
///
/// Existing stores keep whatever capabilities they were created with.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Compute perceptual digests for images and videos
    pub perceptual: bool,

    /// Use SHA-512/256 instead of SHA3-256
    pub sha512: bool,

    /// Include a block from the middle of the file in the short digest
    pub centred_short_hash: bool,

    /// Use 1 MiB short digest blocks
    pub medium_block: bool,

    /// Use 16 MiB short digest blocks (takes precedence over `medium_block`)
    pub large_block: bool,
}

/// Scan configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Digest file containers instead of decoded image content
    pub raw: bool,

    /// Compare by short digest only
    pub fast: bool,

    /// Never compute full-file digests (implies `fast`)
    pub short_hash_only: bool,

    /// Suppress per-file collision output
    pub silent: bool,

    /// Directory names never descended into
    pub exclude_dirs: Vec<String>,

    /// File extensions never recorded
    pub exclude_extensions: Vec<String>,

    /// A directory containing this file is skipped along with everything below it
    pub skip_marker: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log to file
    pub log_to_file: bool,

    /// Log file path
    pub log_file: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            raw: false,
            fast: false,
            short_hash_only: false,
            silent: false,
            exclude_dirs: vec![".git".to_string()],
            exclude_extensions: vec!["gitignore".to_string(), "gitmodules".to_string()],
            skip_marker: ".skipfolder".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("./identity_store.log"),
        }
    }
}

impl CapabilityConfig {
    /// Convert the flags into the capability set persisted with a store
    pub fn to_capabilities(&self) -> CapabilitySet {
        let mut caps = CapabilitySet::new();

        if self.large_block {
            caps.insert(Capability::LargeBlock);
        } else if self.medium_block {
            caps.insert(Capability::MediumBlock);
        }
        if self.perceptual {
            caps.insert(Capability::PerceptualHash);
        }
        if self.sha512 {
            caps.insert(Capability::Sha512);
        }
        if self.centred_short_hash {
            caps.insert(Capability::CentredShortHash);
        }

        caps
    }
}

impl ScanConfig {
    /// Whether lookups should stop at the short digest
    pub fn shallow(&self) -> bool {
        self.fast || self.short_hash_only
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;

        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./identity_store.toml (current directory)
    /// 2. Standard config location
    ///
    /// If no config file is found, returns default configuration.
    pub fn load_default() -> Result<Self, ConfigError> {
        let local = PathBuf::from(".").join(LOCAL_CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }

        if let Some(config_path) = get_config_path() {
            if config_path.exists() {
                return Self::load(&config_path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::WriteError(path.as_ref().to_path_buf(), e.to_string()))?;

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// Configuration file was not found at the specified path
    FileNotFound(PathBuf),
    /// Failed to read the configuration file
    ReadError(PathBuf, String),
    /// Failed to parse the configuration file (invalid TOML)
    ParseError(PathBuf, String),
    /// Failed to serialize configuration to TOML
    SerializeError(String),
    /// Failed to write configuration file or directory
    WriteError(PathBuf, String),
    /// Could not determine config directory
    ConfigDirNotFound,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => {
                write!(f, "Configuration file not found: {}", path.display())
            }
            ConfigError::ReadError(path, err) => {
                write!(
                    f,
                    "Failed to read config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::ParseError(path, err) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    err
                )
            }
            ConfigError::SerializeError(err) => {
                write!(f, "Failed to serialize configuration: {}", err)
            }
            ConfigError::WriteError(path, err) => {
                write!(f, "Failed to write '{}': {}", path.display(), err)
            }
            ConfigError::ConfigDirNotFound => {
                write!(f, "Could not determine configuration directory")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
