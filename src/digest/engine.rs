//! Capability-driven digest computation
//!
//! The engine is configured once from the store's capability set and then
//! computes short, long and perceptual digests for any seekable reader.

use super::perceptual::{self, FfmpegFrames, FrameSource};
use super::{decode_image, DecodeOutcome, MediaKind};
use crate::core::error::{Result, StoreError};
use crate::store::{Capability, CapabilitySet, Digest, PerceptualHash};
use log::{debug, warn};
use sha2::Digest as _;
use sha2::Sha512_256;
use sha3::Sha3_256;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Short digest block size without a block capability
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024;

/// Short digest block size with [`Capability::MediumBlock`]
pub const MEDIUM_BLOCK_SIZE: u64 = 1024 * 1024;

/// Short digest block size with [`Capability::LargeBlock`]
pub const LARGE_BLOCK_SIZE: u64 = 16 * 1024 * 1024;

/// Read size when streaming a whole file
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Rows of decoded pixels covered by an image short digest
pub const PIXEL_PREFIX_ROWS: usize = 4096;

/// Hash function behind short and long digests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha3_256,
    Sha512_256,
}

impl HashAlgorithm {
    pub fn for_capabilities(capabilities: &CapabilitySet) -> Self {
        if capabilities.contains(Capability::Sha512) {
            HashAlgorithm::Sha512_256
        } else {
            HashAlgorithm::Sha3_256
        }
    }

    fn hasher(self) -> Hasher {
        match self {
            HashAlgorithm::Sha3_256 => Hasher::Sha3(Sha3_256::new()),
            HashAlgorithm::Sha512_256 => Hasher::Sha512(Sha512_256::new()),
        }
    }
}

enum Hasher {
    Sha3(Sha3_256),
    Sha512(Sha512_256),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha3(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Digest {
        match self {
            Hasher::Sha3(h) => Digest::new(h.finalize().to_vec()),
            Hasher::Sha512(h) => Digest::new(h.finalize().to_vec()),
        }
    }
}

/// Computes digests according to a fixed capability set.
pub struct DigestEngine {
    algorithm: HashAlgorithm,
    block_size: u64,
    centred: bool,
    perceptual: bool,
    frames: Box<dyn FrameSource>,
    shutdown: Arc<AtomicBool>,
}

impl std::fmt::Debug for DigestEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestEngine")
            .field("algorithm", &self.algorithm)
            .field("block_size", &self.block_size)
            .field("centred", &self.centred)
            .field("perceptual", &self.perceptual)
            .finish()
    }
}

impl DigestEngine {
    pub fn new(capabilities: &CapabilitySet, shutdown: Arc<AtomicBool>) -> Self {
        let block_size = if capabilities.contains(Capability::LargeBlock) {
            LARGE_BLOCK_SIZE
        } else if capabilities.contains(Capability::MediumBlock) {
            MEDIUM_BLOCK_SIZE
        } else {
            DEFAULT_BLOCK_SIZE
        };

        Self {
            algorithm: HashAlgorithm::for_capabilities(capabilities),
            block_size,
            centred: capabilities.contains(Capability::CentredShortHash),
            perceptual: capabilities.contains(Capability::PerceptualHash),
            frames: Box::new(FfmpegFrames::default()),
            shutdown,
        }
    }

    /// Replace the video frame sampler
    pub fn with_frame_source(mut self, frames: Box<dyn FrameSource>) -> Self {
        self.frames = frames;
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn computes_perceptual(&self) -> bool {
        self.perceptual
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.shutdown.load(Ordering::Relaxed) {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cheap digest: image pixel prefix, or head/tail(/centre) blocks.
    ///
    /// Files no bigger than the blocks themselves get the long digest, so
    /// short and long digests agree for small files.
    pub fn short_digest<R: Read + Seek>(
        &self,
        reader: &mut R,
        size: u64,
        path: &Path,
        extension: &str,
        raw: bool,
    ) -> Result<Digest> {
        if !raw && MediaKind::from_extension(extension) == MediaKind::Image {
            match self.pixel_digest(reader, Some(PIXEL_PREFIX_ROWS))? {
                DecodeOutcome::Decoded(digest) => return Ok(digest),
                DecodeOutcome::DecodeFailed(reason) => {
                    warn!("Possible bad file {}: {}", path.display(), reason)
                }
            }
        }

        self.block_digest(reader, size)
    }

    /// Full digest: all decoded pixels for images, otherwise every byte.
    pub fn long_digest<R: Read + Seek>(
        &self,
        reader: &mut R,
        size: u64,
        path: &Path,
        extension: &str,
        raw: bool,
    ) -> Result<Digest> {
        if !raw && MediaKind::from_extension(extension) == MediaKind::Image {
            match self.pixel_digest(reader, None)? {
                DecodeOutcome::Decoded(digest) => return Ok(digest),
                DecodeOutcome::DecodeFailed(reason) => {
                    warn!("Possible bad file {}: {}", path.display(), reason)
                }
            }
        }

        self.stream_digest(reader, size)
    }

    /// Perceptual fingerprint, if the capability is enabled and the media
    /// decodes. `path` must be openable by external decoders.
    pub fn perceptual_digest<R: Read + Seek>(
        &self,
        reader: &mut R,
        path: &Path,
        extension: &str,
    ) -> Result<Option<PerceptualHash>> {
        if !self.perceptual {
            return Ok(None);
        }

        let outcome = match MediaKind::from_extension(extension) {
            MediaKind::Image => {
                self.check_cancelled()?;
                reader.seek(SeekFrom::Start(0))?;
                let outcome = perceptual::image_fingerprint(BufReader::new(&mut *reader));
                reader.seek(SeekFrom::Start(0))?;
                outcome
            }
            MediaKind::Video => {
                perceptual::video_fingerprint(path, self.frames.as_ref(), &self.shutdown)?
            }
            MediaKind::Other => return Ok(None),
        };

        match outcome {
            DecodeOutcome::Decoded(hash) => Ok(Some(hash)),
            DecodeOutcome::DecodeFailed(reason) => {
                debug!("No perceptual digest for {}: {}", path.display(), reason);
                Ok(None)
            }
        }
    }

    /// Digest decoded pixels, optionally only the first `row_limit` rows.
    fn pixel_digest<R: Read + Seek>(
        &self,
        reader: &mut R,
        row_limit: Option<usize>,
    ) -> Result<DecodeOutcome<Digest>> {
        self.check_cancelled()?;
        reader.seek(SeekFrom::Start(0))?;
        let decoded = decode_image(BufReader::new(&mut *reader));
        reader.seek(SeekFrom::Start(0))?;

        let image = match decoded {
            DecodeOutcome::Decoded(image) => image,
            DecodeOutcome::DecodeFailed(reason) => return Ok(DecodeOutcome::DecodeFailed(reason)),
        };

        let pixels = image.as_bytes();
        let pixels = match row_limit {
            Some(rows) => {
                let row_len = image.width() as usize * usize::from(image.color().bytes_per_pixel());
                &pixels[..rows.saturating_mul(row_len).min(pixels.len())]
            }
            None => pixels,
        };

        let mut hasher = self.algorithm.hasher();
        for chunk in pixels.chunks(STREAM_CHUNK_SIZE) {
            self.check_cancelled()?;
            hasher.update(chunk);
        }

        Ok(DecodeOutcome::Decoded(hasher.finalize()))
    }

    fn block_digest<R: Read + Seek>(&self, reader: &mut R, size: u64) -> Result<Digest> {
        let blocks = if self.centred { 3 } else { 2 };
        if size <= blocks * self.block_size {
            return self.stream_digest(reader, size);
        }

        self.check_cancelled()?;

        let mut block = vec![0u8; self.block_size as usize];
        let mut hasher = self.algorithm.hasher();

        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut block)?;
        hasher.update(&block);

        if self.centred {
            reader.seek(SeekFrom::Start(size / 2 - self.block_size / 2))?;
            reader.read_exact(&mut block)?;
            hasher.update(&block);
        }

        reader.seek(SeekFrom::Start(size - self.block_size))?;
        reader.read_exact(&mut block)?;
        hasher.update(&block);

        reader.seek(SeekFrom::Start(0))?;
        Ok(hasher.finalize())
    }

    fn stream_digest<R: Read + Seek>(&self, reader: &mut R, size: u64) -> Result<Digest> {
        reader.seek(SeekFrom::Start(0))?;

        let chunk_len = size.clamp(1, STREAM_CHUNK_SIZE as u64) as usize;
        let mut buffer = vec![0u8; chunk_len];
        let mut hasher = self.algorithm.hasher();

        loop {
            self.check_cancelled()?;
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        reader.seek(SeekFrom::Start(0))?;
        Ok(hasher.finalize())
    }
}
