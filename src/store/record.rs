//! Serialized record shapes and their migration
//!
//! The plaintext inside the encrypted store file is JSON. Three top-level
//! shapes have existed over time:
//!
//! 1. a bare list of entries (no version, no capabilities)
//! 2. `[version, entries]`, where `version > 1` implies perceptual digests
//! 3. `[version, capabilities, entries]`
//!
//! Entries themselves were positional tuples before they became objects.
//! [`decode`] accepts all of them and migrates once into [`Entry`];
//! [`encode`] always writes shape 3 with object entries.

use super::entry::{Capability, CapabilitySet, Digest, Entry, Identity, PerceptualHash};
use crate::core::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// Version written by freshly created stores
pub const CURRENT_VERSION: u32 = 3;

/// Version assumed for bare entry lists, which predate versioning
pub const EARLIEST_VERSION: u32 = 1;

/// A decoded and migrated store payload
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedRecord {
    pub version: u32,
    pub capabilities: CapabilitySet,
    pub entries: Vec<Entry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(u32, CapabilitySet, Vec<StoredEntry>),
    Versioned(u32, Vec<StoredEntry>),
    Bare(Vec<StoredEntry>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Current(Entry),
    WithPerceptual(
        u64,
        Option<Digest>,
        Option<Digest>,
        (String, String),
        Option<(Digest, u32, u32)>,
    ),
    Legacy(u64, Option<Digest>, Option<Digest>, (String, String)),
}

impl StoredEntry {
    fn migrate(self) -> Entry {
        match self {
            StoredEntry::Current(mut entry) => {
                entry.identity = Identity::from_parts(&entry.identity.path, &entry.identity.extension);
                entry
            }
            StoredEntry::WithPerceptual(size, short_hash, long_hash, (path, ext), perceptual) => {
                Entry {
                    size,
                    short_hash,
                    long_hash,
                    identity: Identity::from_parts(&path, &ext),
                    perceptual: perceptual.map(|(digest, width, height)| PerceptualHash {
                        digest,
                        width,
                        height,
                    }),
                }
            }
            StoredEntry::Legacy(size, short_hash, long_hash, (path, ext)) => Entry {
                size,
                short_hash,
                long_hash,
                identity: Identity::from_parts(&path, &ext),
                perceptual: None,
            },
        }
    }
}

#[derive(Serialize)]
struct RecordRef<'a>(u32, &'a CapabilitySet, &'a [Entry]);

/// Decode a plaintext payload, migrating any legacy shape.
pub fn decode(plaintext: &[u8]) -> Result<LoadedRecord> {
    let record: StoredRecord = serde_json::from_slice(plaintext).map_err(|e| {
        StoreError::Format(format!("payload matches no known record shape ({})", e))
    })?;

    let (version, capabilities, entries) = match record {
        StoredRecord::Current(version, capabilities, entries) => (version, capabilities, entries),
        StoredRecord::Versioned(version, entries) => {
            let mut capabilities = CapabilitySet::new();
            if version > 1 {
                capabilities.insert(Capability::PerceptualHash);
            }
            (version, capabilities, entries)
        }
        StoredRecord::Bare(entries) => (EARLIEST_VERSION, CapabilitySet::new(), entries),
    };

    Ok(LoadedRecord {
        version,
        capabilities,
        entries: entries.into_iter().map(StoredEntry::migrate).collect(),
    })
}

/// Encode the current `[version, capabilities, entries]` shape.
pub fn encode(version: u32, capabilities: &CapabilitySet, entries: &[Entry]) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RecordRef(version, capabilities, entries))?)
}
