//! Key material for the encryption boundary

use crate::core::config::{ensure_config_dir, get_config_dir};
use crate::core::error::{Result, StoreError};
use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use log::{debug, warn};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

/// Length of every symmetric key
pub const KEY_LEN: usize = 32;

/// Length of the password salt prefixed to transport blobs
pub const SALT_LEN: usize = 16;

const MACHINE_KEY_SALT: &[u8] = b"identity-store:machine-key";
const MACHINE_KEY_INFO: &[u8] = b"identity-store:store-key:v1";
const KEY_CACHE_FILE: &str = "localkey";

/// Sources of stable per-machine identity, in preference order
const MACHINE_ID_SOURCES: &[&str] = &[
    "/etc/machine-id",
    "/var/lib/dbus/machine-id",
    "/sys/class/dmi/id/modalias",
];

/// 256-bit symmetric key, zeroed on drop.
pub struct SecretKey(Zeroizing<[u8; KEY_LEN]>);

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self::from_bytes(array))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&"<redacted>").finish()
    }
}

/// Expand arbitrary identifying material into a store key.
pub fn key_from_material(material: &[u8]) -> Result<SecretKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(MACHINE_KEY_SALT), material);
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hkdf.expand(MACHINE_KEY_INFO, okm.as_mut_slice())
        .map_err(|_| StoreError::Crypto("hkdf output length invalid".to_string()))?;
    Ok(SecretKey(okm))
}

/// Load the device-bound key for this machine.
///
/// The key is derived from the OS machine identifier when one is readable.
/// Otherwise a random key is generated once and cached in the config
/// directory, so that later runs on this machine can still open the store.
///
/// This protects against accidental disclosure of a copied store file, not
/// against an attacker with access to the machine.
pub fn machine_key() -> Result<SecretKey> {
    for source in MACHINE_ID_SOURCES {
        match fs::read(source) {
            Ok(material) => {
                let material = first_line(&material);
                if !material.is_empty() {
                    debug!("Deriving store key from {}", source);
                    return key_from_material(material);
                }
            }
            Err(e) => debug!("Machine identifier {} unavailable: {}", source, e),
        }
    }

    warn!("No machine identifier found, falling back to a cached local key");
    cached_key()
}

fn first_line(material: &[u8]) -> &[u8] {
    material.split(|b| *b == b'\n').next().unwrap_or(material)
}

fn cached_key() -> Result<SecretKey> {
    let existing = get_config_dir().map(|dir| dir.join(KEY_CACHE_FILE));
    if let Some(path) = existing.as_deref().filter(|p| p.exists()) {
        return read_cached_key(path);
    }

    let dir = ensure_config_dir()?;
    let path = dir.join(KEY_CACHE_FILE);

    let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(bytes.as_mut_slice());
    fs::write(&path, bytes.as_slice())?;
    debug!("Cached new local key at {}", path.display());

    Ok(SecretKey(bytes))
}

fn read_cached_key(path: &Path) -> Result<SecretKey> {
    let bytes = Zeroizing::new(fs::read(path)?);
    SecretKey::from_slice(&bytes).ok_or_else(|| {
        StoreError::Crypto(format!(
            "cached key at {} has length {}, expected {}",
            path.display(),
            bytes.len(),
            KEY_LEN
        ))
    })
}

/// Derive a transport key from a password with Argon2id.
pub fn password_key(password: &str, salt: &[u8]) -> Result<SecretKey> {
    let params = Params::new(64 * 1024, 3, 1, Some(KEY_LEN))
        .map_err(|e| StoreError::Crypto(format!("argon2 parameters: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(password.as_bytes(), salt, output.as_mut_slice())
        .map_err(|e| StoreError::Crypto(format!("argon2 failure: {}", e)))?;

    Ok(SecretKey(output))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_key_is_deterministic() {
        let a = key_from_material(b"4c4c4544-0042").unwrap();
        let b = key_from_material(b"4c4c4544-0042").unwrap();
        let c = key_from_material(b"4c4c4544-0043").unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_eq!(a.as_bytes().len(), KEY_LEN);
    }

    #[test]
    fn test_first_line_strips_newline() {
        assert_eq!(first_line(b"abc\n"), b"abc");
        assert_eq!(first_line(b"abc"), b"abc");
    }

    #[test]
    fn test_password_key_depends_on_salt() {
        let a = password_key("hunter2", &[1u8; SALT_LEN]).unwrap();
        let b = password_key("hunter2", &[1u8; SALT_LEN]).unwrap();
        let c = password_key("hunter2", &[2u8; SALT_LEN]).unwrap();

        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SecretKey::from_bytes([9u8; KEY_LEN]);
        assert_eq!(format!("{:?}", key), "SecretKey(\"<redacted>\")");
    }
}
