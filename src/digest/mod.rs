//! Digest computation
//!
//! Three kinds of digest are computed for each file:
//!
//! - **Short** - head and tail blocks (optionally a centre block), or a
//!   prefix of the decoded pixels for images. Cheap discriminator.
//! - **Long** - the whole file streamed in 64 MiB chunks, or all decoded
//!   pixels for images.
//! - **Perceptual** - a similarity fingerprint for images and videos,
//!   compared by distance rather than equality.
//!
//! # Submodules
//!
//! - `engine` - Capability-driven short/long/perceptual dispatch
//! - `media` - Extension-based media classification
//! - `perceptual` - DCT image hashes and temporal video fingerprints

pub mod engine;
pub mod media;
pub mod perceptual;

pub use engine::{DigestEngine, HashAlgorithm};
pub use media::MediaKind;

use image::{DynamicImage, ImageReader};
use std::io::{BufRead, Seek};

/// Result of trying to decode a file's media content.
///
/// A failed decode is an expected outcome, not an error: callers fall back
/// to digesting the container bytes or skip the perceptual digest.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome<T> {
    Decoded(T),
    DecodeFailed(String),
}

impl<T> DecodeOutcome<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            DecodeOutcome::Decoded(value) => Some(value),
            DecodeOutcome::DecodeFailed(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> DecodeOutcome<U> {
        match self {
            DecodeOutcome::Decoded(value) => DecodeOutcome::Decoded(f(value)),
            DecodeOutcome::DecodeFailed(reason) => DecodeOutcome::DecodeFailed(reason),
        }
    }
}

/// Decode an image, sniffing the format from its content.
pub(crate) fn decode_image<R: BufRead + Seek>(reader: R) -> DecodeOutcome<DynamicImage> {
    let reader = match ImageReader::new(reader).with_guessed_format() {
        Ok(reader) => reader,
        Err(e) => return DecodeOutcome::DecodeFailed(e.to_string()),
    };

    match reader.decode() {
        Ok(image) => DecodeOutcome::Decoded(image),
        Err(e) => DecodeOutcome::DecodeFailed(e.to_string()),
    }
}
