//! Perceptual fingerprints
//!
//! Images get a 64-bit DCT mean hash from `image_hasher`. Videos are sampled
//! at a fixed low frame rate through `ffmpeg` as small grayscale frames;
//! each frame is hashed the same way and the per-bit majority across frames
//! forms the temporal fingerprint.
//!
//! Both fingerprints are compared with [`distance`], the normalized Hamming
//! distance in `[0, 1]`.

use super::{decode_image, DecodeOutcome};
use crate::core::error::{Result, StoreError};
use crate::store::{Digest, PerceptualHash};
use image::{DynamicImage, GrayImage};
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use log::debug;
use std::io::{BufRead, ErrorKind, Read, Seek};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

/// Side of the grayscale frames sampled from videos
pub const THUMBNAIL_SIDE: usize = 32;

/// Side of the hash grid, one bit per cell
const HASH_SIDE: u32 = 8;

/// Length of every perceptual digest in bytes
pub const FINGERPRINT_LEN: usize = (HASH_SIDE * HASH_SIDE / 8) as usize;

/// Frames sampled per second of video
pub const VIDEO_SAMPLE_FPS: u32 = 1;

/// Upper bound on sampled frames per video
pub const VIDEO_MAX_FRAMES: usize = 120;

fn hasher() -> Hasher {
    HasherConfig::new()
        .hash_size(HASH_SIDE, HASH_SIDE)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher()
}

fn digest_of(hash: &ImageHash) -> Digest {
    Digest::new(hash.as_bytes().to_vec())
}

/// Normalized Hamming distance between two fingerprints.
///
/// Fingerprints of different lengths are maximally distant.
pub fn distance(a: &Digest, b: &Digest) -> f64 {
    if a.as_bytes().len() != b.as_bytes().len() || a.as_bytes().is_empty() {
        return 1.0;
    }

    let (Ok(a), Ok(b)) = (
        ImageHash::<Box<[u8]>>::from_bytes(a.as_bytes()),
        ImageHash::<Box<[u8]>>::from_bytes(b.as_bytes()),
    ) else {
        return 1.0;
    };

    f64::from(a.dist(&b)) / (a.as_bytes().len() * 8) as f64
}

/// Fingerprint an already decoded image.
pub fn fingerprint_image(image: &DynamicImage) -> PerceptualHash {
    PerceptualHash {
        digest: digest_of(&hasher().hash_image(image)),
        width: image.width(),
        height: image.height(),
    }
}

/// Hash one `THUMBNAIL_SIDE`² luma frame.
fn frame_hash(hasher: &Hasher, frame: Vec<u8>) -> Option<Digest> {
    let side = THUMBNAIL_SIDE as u32;
    let image = GrayImage::from_raw(side, side, frame)?;
    Some(digest_of(&hasher.hash_image(&DynamicImage::ImageLuma8(image))))
}

/// Decode and fingerprint an image.
pub fn image_fingerprint<R: BufRead + Seek>(reader: R) -> DecodeOutcome<PerceptualHash> {
    decode_image(reader).map(|image| fingerprint_image(&image))
}

/// Combine per-frame hashes into one temporal fingerprint by per-bit majority.
pub fn temporal_fingerprint(frame_hashes: &[Digest]) -> Option<Digest> {
    let first = frame_hashes.first()?;
    let bit_count = first.as_bytes().len() * 8;

    let mut votes = vec![0usize; bit_count];
    for hash in frame_hashes {
        for (i, vote) in votes.iter_mut().enumerate() {
            if hash.as_bytes().get(i / 8).is_some_and(|b| b & (0x80 >> (i % 8)) != 0) {
                *vote += 1;
            }
        }
    }

    let mut bits = vec![0u8; first.as_bytes().len()];
    for (i, vote) in votes.iter().enumerate() {
        if vote * 2 > frame_hashes.len() {
            bits[i / 8] |= 0x80 >> (i % 8);
        }
    }

    Some(Digest::new(bits))
}

/// Supplies sampled grayscale video frames for fingerprinting.
pub trait FrameSource {
    /// Return `THUMBNAIL_SIDE`² byte luma frames sampled from `path`.
    ///
    /// Must poll `shutdown` between frames and return
    /// [`StoreError::Cancelled`] once it is set.
    fn sample(&self, path: &Path, shutdown: &AtomicBool) -> Result<DecodeOutcome<Vec<Vec<u8>>>>;
}

/// Samples frames by piping raw gray video out of an `ffmpeg` process.
#[derive(Debug, Clone)]
pub struct FfmpegFrames {
    pub program: PathBuf,
    pub fps: u32,
    pub max_frames: usize,
}

impl Default for FfmpegFrames {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            fps: VIDEO_SAMPLE_FPS,
            max_frames: VIDEO_MAX_FRAMES,
        }
    }
}

impl FfmpegFrames {
    fn spawn(&self, path: &Path) -> std::io::Result<Child> {
        let filter = format!(
            "fps={},scale={side}:{side},format=gray",
            self.fps,
            side = THUMBNAIL_SIDE
        );

        Command::new(&self.program)
            .args(["-v", "error", "-nostdin", "-i"])
            .arg(path)
            .args(["-vf", &filter])
            .args(["-frames:v", &self.max_frames.to_string()])
            .args(["-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl FrameSource for FfmpegFrames {
    fn sample(&self, path: &Path, shutdown: &AtomicBool) -> Result<DecodeOutcome<Vec<Vec<u8>>>> {
        let mut child = match self.spawn(path) {
            Ok(child) => child,
            Err(e) => {
                return Ok(DecodeOutcome::DecodeFailed(format!(
                    "cannot run {}: {}",
                    self.program.display(),
                    e
                )))
            }
        };

        let Some(mut stdout) = child.stdout.take() else {
            reap(&mut child);
            return Ok(DecodeOutcome::DecodeFailed("no frame pipe".to_string()));
        };

        let mut frames = Vec::new();
        while frames.len() < self.max_frames {
            if shutdown.load(Ordering::Relaxed) {
                drop(stdout);
                reap(&mut child);
                return Err(StoreError::Cancelled);
            }

            let mut frame = vec![0u8; THUMBNAIL_SIDE * THUMBNAIL_SIDE];
            match stdout.read_exact(&mut frame) {
                Ok(()) => frames.push(frame),
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    drop(stdout);
                    reap(&mut child);
                    return Ok(DecodeOutcome::DecodeFailed(e.to_string()));
                }
            }
        }

        drop(stdout);
        let status = child.wait()?;

        if frames.is_empty() {
            return Ok(DecodeOutcome::DecodeFailed(format!(
                "no frames decoded ({})",
                status
            )));
        }

        debug!("Sampled {} frames from {}", frames.len(), path.display());
        Ok(DecodeOutcome::Decoded(frames))
    }
}

/// Sample and fingerprint a video. Width and height are reported as zero.
pub fn video_fingerprint(
    path: &Path,
    source: &dyn FrameSource,
    shutdown: &AtomicBool,
) -> Result<DecodeOutcome<PerceptualHash>> {
    let frames = match source.sample(path, shutdown)? {
        DecodeOutcome::Decoded(frames) => frames,
        DecodeOutcome::DecodeFailed(reason) => return Ok(DecodeOutcome::DecodeFailed(reason)),
    };

    let hasher = hasher();
    let hashes: Vec<Digest> = frames
        .into_iter()
        .filter_map(|frame| frame_hash(&hasher, frame))
        .collect();

    Ok(match temporal_fingerprint(&hashes) {
        Some(digest) => DecodeOutcome::Decoded(PerceptualHash {
            digest,
            width: 0,
            height: 0,
        }),
        None => DecodeOutcome::DecodeFailed("frames had unexpected size".to_string()),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::imageops::FilterType;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Overlapping low-frequency waves, so no DCT coefficient sits idle
    pub(crate) fn pattern(width: u32, height: u32) -> DynamicImage {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let fx = x as f64 / width as f64;
            let fy = y as f64 / height as f64;
            let value = 128.0
                + 50.0 * (3.1 * fx + 1.7 * fy).sin()
                + 40.0 * (5.3 * fx * fy + 0.4).cos()
                + 30.0 * (7.7 * fy - 2.2 * fx).sin();
            let value = value.clamp(0.0, 255.0) as u8;
            Rgb([value, value / 2 + 40, 255 - value])
        });
        DynamicImage::ImageRgb8(image)
    }

    fn encode_png(image: &DynamicImage) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    struct FixedFrames(Vec<Vec<u8>>);

    impl FrameSource for FixedFrames {
        fn sample(&self, _: &Path, shutdown: &AtomicBool) -> Result<DecodeOutcome<Vec<Vec<u8>>>> {
            if shutdown.load(Ordering::Relaxed) {
                return Err(StoreError::Cancelled);
            }
            Ok(DecodeOutcome::Decoded(self.0.clone()))
        }
    }

    fn luma_frame() -> Vec<u8> {
        (0..THUMBNAIL_SIDE * THUMBNAIL_SIDE)
            .map(|i| {
                let (x, y) = ((i % THUMBNAIL_SIDE) as f64, (i / THUMBNAIL_SIDE) as f64);
                (128.0 + 60.0 * (x / 5.0).sin() + 50.0 * (y / 7.0 + x / 11.0).cos()) as u8
            })
            .collect()
    }

    #[test]
    fn test_frame_hash_is_64_bits() {
        let hasher = hasher();
        let hash = frame_hash(&hasher, luma_frame()).unwrap();
        assert_eq!(hash.as_bytes().len(), FINGERPRINT_LEN);
        assert_eq!(Some(hash), frame_hash(&hasher, luma_frame()));
        assert_eq!(frame_hash(&hasher, vec![0u8; 10]), None);
    }

    #[test]
    fn test_image_fingerprint_is_64_bits() {
        let hash = fingerprint_image(&pattern(120, 90));
        assert_eq!(hash.digest.as_bytes().len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_distance() {
        let a = Digest::new(vec![0b1111_0000; 8]);
        let b = Digest::new(vec![0b1111_0000; 8]);
        let c = Digest::new(vec![0b0000_1111; 8]);
        let d = Digest::new(vec![0b1111_0001, 0b1111_0000, 0b1111_0000, 0b1111_0000, 0b1111_0000, 0b1111_0000, 0b1111_0000, 0b1111_0000]);

        assert_eq!(distance(&a, &b), 0.0);
        assert_eq!(distance(&a, &c), 1.0);
        assert_eq!(distance(&a, &d), 1.0 / 64.0);
        assert_eq!(distance(&a, &Digest::new(vec![0; 4])), 1.0);
    }

    #[test]
    fn test_identical_pixels_identical_fingerprint() {
        let image = pattern(320, 240);
        let a = fingerprint_image(&image);
        let b = image_fingerprint(Cursor::new(encode_png(&image))).ok().unwrap();

        assert_eq!(a, b);
        assert_eq!((b.width, b.height), (320, 240));
    }

    #[test]
    fn test_resized_image_is_near() {
        let large = fingerprint_image(&pattern(800, 600));
        let small = fingerprint_image(&pattern(800, 600).resize_exact(400, 300, FilterType::Triangle));

        assert!(distance(&large.digest, &small.digest) < 0.1);
        assert_eq!((small.width, small.height), (400, 300));
    }

    #[test]
    fn test_different_images_are_far() {
        let a = fingerprint_image(&pattern(256, 256));
        let mut inverted = pattern(256, 256);
        inverted.invert();
        let b = fingerprint_image(&inverted);
        assert!(distance(&a.digest, &b.digest) > 0.1);
    }

    #[test]
    fn test_undecodable_image_fails_softly() {
        let outcome = image_fingerprint(Cursor::new(b"definitely not an image".to_vec()));
        assert!(matches!(outcome, DecodeOutcome::DecodeFailed(_)));
    }

    #[test]
    fn test_temporal_majority() {
        let frames = [
            Digest::new(vec![0b1100_0000]),
            Digest::new(vec![0b1000_0001]),
            Digest::new(vec![0b1110_0000]),
        ];
        assert_eq!(temporal_fingerprint(&frames), Some(Digest::new(vec![0b1100_0000])));
        assert_eq!(temporal_fingerprint(&[]), None);
    }

    #[test]
    fn test_video_fingerprint_from_frames() {
        let frame = luma_frame();
        let source = FixedFrames(vec![frame.clone(), frame.clone(), vec![1, 2, 3]]);
        let shutdown = AtomicBool::new(false);

        let outcome = video_fingerprint(Path::new("clip.mp4"), &source, &shutdown).unwrap();
        let hash = outcome.ok().unwrap();

        assert_eq!(Some(hash.digest), frame_hash(&hasher(), frame));
        assert_eq!((hash.width, hash.height), (0, 0));
    }

    #[test]
    fn test_video_fingerprint_cancelled() {
        let source = FixedFrames(vec![]);
        let shutdown = AtomicBool::new(true);
        let result = video_fingerprint(Path::new("clip.mp4"), &source, &shutdown);
        assert!(matches!(result, Err(StoreError::Cancelled)));
    }

    #[test]
    fn test_missing_ffmpeg_is_decode_failure() {
        let source = FfmpegFrames {
            program: PathBuf::from("/nonexistent/ffmpeg-binary"),
            ..FfmpegFrames::default()
        };
        let shutdown = AtomicBool::new(false);

        let outcome = source.sample(Path::new("clip.mp4"), &shutdown).unwrap();
        assert!(matches!(outcome, DecodeOutcome::DecodeFailed(_)));
    }
}
