//! Encryption boundary for store files
//!
//! The store treats encryption as an opaque transform over the serialized
//! record: [`Sealer::seal`] before writing, [`Sealer::open`] after reading.
//! Files are laid out as `nonce(24) || ciphertext || tag(16)`.
//!
//! Two kinds of key feed the same AEAD:
//! - [`keys::machine_key`] - device-bound, used for day-to-day stores
//! - [`keys::password_key`] - Argon2id-derived, used only to move a store
//!   between machines ([`export_for_transport`] / [`import_from_transport`])

pub mod keys;

use crate::core::error::{Result, StoreError};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};

pub use keys::{machine_key, password_key, SecretKey, SALT_LEN};

/// Length of the nonce header at the start of every sealed blob
pub const NONCE_LEN: usize = 24;

const STORE_AAD: &[u8] = b"identity-store:v1";

/// Authenticated encryption applied to the whole serialized store.
pub trait Sealer {
    /// Encrypt `plaintext`, returning `header || ciphertext`
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Authenticate and decrypt a blob produced by [`Sealer::seal`]
    fn open(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// XChaCha20-Poly1305 with a random nonce per seal.
pub struct XChaCha20Sealer {
    key: SecretKey,
}

impl XChaCha20Sealer {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.as_bytes()))
    }
}

impl std::fmt::Debug for XChaCha20Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaCha20Sealer")
            .field("key", &self.key)
            .finish()
    }
}

impl Sealer for XChaCha20Sealer {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher()
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: STORE_AAD,
                },
            )
            .map_err(|_| StoreError::Crypto("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(StoreError::Crypto(format!(
                "blob of {} bytes is shorter than the nonce header",
                blob.len()
            )));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: STORE_AAD,
                },
            )
            .map_err(|_| {
                StoreError::Crypto(
                    "authentication failed (wrong key or corrupted store)".to_string(),
                )
            })
    }
}

/// Re-key a machine-sealed store for transport under a password.
///
/// Output is `salt(16) || nonce || ciphertext`. Entry contents are never
/// inspected.
pub fn export_for_transport(
    blob: &[u8],
    machine: &dyn Sealer,
    password: &str,
    salt: Option<[u8; SALT_LEN]>,
) -> Result<Vec<u8>> {
    let salt = salt.unwrap_or_else(|| {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    });

    let plaintext = machine.open(blob)?;
    let sealed = XChaCha20Sealer::new(password_key(password, &salt)?).seal(&plaintext)?;

    let mut out = Vec::with_capacity(SALT_LEN + sealed.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Reverse of [`export_for_transport`]: strip the password layer and seal
/// for this machine.
pub fn import_from_transport(blob: &[u8], password: &str, machine: &dyn Sealer) -> Result<Vec<u8>> {
    if blob.len() < SALT_LEN {
        return Err(StoreError::Crypto("transport blob is missing its salt".to_string()));
    }

    let (salt, sealed) = blob.split_at(SALT_LEN);
    let plaintext = XChaCha20Sealer::new(password_key(password, salt)?).open(sealed)?;
    machine.seal(&plaintext)
}
