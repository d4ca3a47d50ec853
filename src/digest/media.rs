//! Coarse media classification by file extension

use serde::{Deserialize, Serialize};

/// Extensions decoded as still images
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "bmp", "gif", "ico", "jpeg", "jpg", "png", "ppm", "pgm", "pbm", "pnm", "tga", "tiff", "tif",
    "webp",
];

/// Extensions fingerprinted as video
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "m4v", "wmv", "flv", "3gp", "mpg", "mpeg",
];

/// Coarse media type used to scope perceptual scans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify a normalized (lower-case, dotless) extension
    pub fn from_extension(extension: &str) -> Self {
        if IMAGE_EXTENSIONS.contains(&extension) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&extension) {
            MediaKind::Video
        } else {
            MediaKind::Other
        }
    }

    /// Whether perceptual digests apply to this kind
    pub fn is_visual(self) -> bool {
        !matches!(self, MediaKind::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(MediaKind::from_extension("jpg"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("png"), MediaKind::Image);
        assert_eq!(MediaKind::from_extension("mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("mkv"), MediaKind::Video);
        assert_eq!(MediaKind::from_extension("txt"), MediaKind::Other);
        assert_eq!(MediaKind::from_extension(""), MediaKind::Other);
    }

    #[test]
    fn test_is_visual() {
        assert!(MediaKind::Image.is_visual());
        assert!(MediaKind::Video.is_visual());
        assert!(!MediaKind::Other.is_visual());
    }
}
