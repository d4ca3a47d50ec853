//! Entry and capability types held by the store
//!
//! Everything in here is the migrated, in-memory shape. The on-disk shapes
//! (including the legacy positional tuples) live in [`super::record`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

/// A named optional behaviour fixed per store at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Perceptual digests for images and videos
    #[serde(rename = "EXT_PerceptualHash")]
    PerceptualHash,
    /// SHA-512/256 instead of SHA3-256
    #[serde(rename = "EXT_SHA512")]
    Sha512,
    /// A third block centred on the file midpoint in the short digest
    #[serde(rename = "EXT_IncludeFileMiddleInShortHash")]
    CentredShortHash,
    /// 1 MiB short digest blocks
    #[serde(rename = "EXT_1MiBShortHashBlock")]
    MediumBlock,
    /// 16 MiB short digest blocks
    #[serde(rename = "EXT_16MiBShortHashBlock")]
    LargeBlock,
}

/// Ordered set of capabilities, serialized as a list of tags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Raw bytes of a content or perceptual digest.
///
/// Serialized as a lowercase hex string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(value: &str) -> Option<Self> {
        hex::decode(value).ok().map(Self)
    }

    /// Leading bytes of the digest, used as an index key
    pub fn prefix(&self, len: usize) -> Digest {
        Digest(self.0[..len.min(self.0.len())].to_vec())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("Invalid hex digest"))
    }
}

/// Similarity fingerprint plus the dimensions of the decoded media.
///
/// Width and height are zero for video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerceptualHash {
    pub digest: Digest,
    pub width: u32,
    pub height: u32,
}

impl PerceptualHash {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Where an entry lives, relative to the scanned root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Relative path, always with forward slashes
    pub path: String,
    /// Lower-cased extension without a leading dot
    pub extension: String,
}

impl Identity {
    pub fn new(relative_path: &Path, extension: &str) -> Self {
        Self::from_parts(&relative_path.to_string_lossy(), extension)
    }

    /// Build an identity from already-stringified parts, normalizing both
    pub fn from_parts(relative_path: &str, extension: &str) -> Self {
        Self {
            path: normalize_path(relative_path),
            extension: normalize_extension(extension),
        }
    }
}

/// One recorded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Byte length at hash time, never zero
    pub size: u64,
    pub short_hash: Option<Digest>,
    pub long_hash: Option<Digest>,
    #[serde(flatten)]
    pub identity: Identity,
    pub perceptual: Option<PerceptualHash>,
}

/// Canonical relative path: forward slashes regardless of host platform.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Canonical extension: lower-case, no leading dot.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_lowercase()
}

/// Extension of a file name, taken after the last dot.
///
/// A name without a dot yields the whole name, lower-cased.
pub fn extension_of(file_name: &str) -> String {
    normalize_extension(file_name.rsplit('.').next().unwrap_or(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_normalize_path_uses_forward_slashes() {
        assert_eq!(normalize_path("photos\\2021\\a.jpg"), "photos/2021/a.jpg");
        assert_eq!(normalize_path("photos/2021/a.jpg"), "photos/2021/a.jpg");
    }

    #[test]
    fn test_identity_normalizes_extension() {
        let identity = Identity::new(&PathBuf::from("dir/IMG_0001.JPG"), ".JPG");
        assert_eq!(identity.path, "dir/IMG_0001.JPG");
        assert_eq!(identity.extension, "jpg");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("holiday.Tar.GZ"), "gz");
        assert_eq!(extension_of("Makefile"), "makefile");
        assert_eq!(extension_of(".gitignore"), "gitignore");
    }

    #[test]
    fn test_digest_hex() {
        let digest = Digest::new(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(digest.to_hex(), "deadbeef");
        assert_eq!(Digest::from_hex("deadbeef"), Some(digest.clone()));
        assert!(Digest::from_hex("not hex").is_none());
        assert_eq!(digest.prefix(2).as_bytes(), &[0xde, 0xad]);
        assert_eq!(digest.prefix(16), digest);
    }

    #[test]
    fn test_capability_tags() {
        let caps: CapabilitySet = [Capability::Sha512, Capability::PerceptualHash]
            .into_iter()
            .collect();
        let json = serde_json::to_string(&caps).unwrap();
        assert_eq!(json, r#"["EXT_PerceptualHash","EXT_SHA512"]"#);

        let parsed: CapabilitySet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, caps);
    }

    #[test]
    fn test_unknown_capability_rejected() {
        let parsed: Result<CapabilitySet, _> = serde_json::from_str(r#"["EXT_Teleport"]"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_entry_serializes_flat() {
        let entry = Entry {
            size: 10,
            short_hash: Some(Digest::new(vec![1, 2])),
            long_hash: None,
            identity: Identity::from_parts("a/b.png", "png"),
            perceptual: None,
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["path"], "a/b.png");
        assert_eq!(value["extension"], "png");
        assert_eq!(value["short_hash"], "0102");
        assert!(value["long_hash"].is_null());
    }
}
