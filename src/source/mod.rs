//! # Image Source Module
//!
//! Frames the generation loop feeds into the pipeline. A source must be
//! readable at any time; the loop takes one snapshot per cycle and holds it
//! for the whole pipeline invocation.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::{Rgba, RgbaImage};

use crate::core::blit::blit;
use crate::core::page::Resolution;
use crate::error::{FlipbookError, FlipbookResult};

/// Current-frame provider.
pub trait ImageSource: Send + Sync {
    /// The frame as of now.
    fn snapshot(&self) -> Arc<RgbaImage>;
}

impl<S: ImageSource + ?Sized> ImageSource for Arc<S> {
    fn snapshot(&self) -> Arc<RgbaImage> {
        (**self).snapshot()
    }
}

/// A single still image.
#[derive(Debug, Clone)]
pub struct StillImageSource {
    image: Arc<RgbaImage>,
}

impl StillImageSource {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// Load an image file and scale it to `resolution`.
    pub fn open(path: impl AsRef<Path>, resolution: Resolution) -> FlipbookResult<Self> {
        let path = path.as_ref();
        let loaded = image::open(path)
            .map_err(|e| {
                FlipbookError::external("image", e).with_context(path.display().to_string())
            })?
            .to_rgba8();

        let mut fitted = RgbaImage::new(resolution.width, resolution.height);
        blit(&loaded, &mut fitted)?;
        Ok(Self::new(fitted))
    }
}

impl ImageSource for StillImageSource {
    fn snapshot(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }
}

/// Procedural checkerboard whose colour advances on every snapshot, so
/// consecutive pages are told apart without a camera or file.
#[derive(Debug)]
pub struct TestPatternSource {
    resolution: Resolution,
    frame: AtomicU64,
}

impl TestPatternSource {
    const PALETTE: [[u8; 3]; 6] = [
        [230, 57, 70],
        [241, 250, 238],
        [168, 218, 220],
        [69, 123, 157],
        [29, 53, 87],
        [255, 183, 3],
    ];
    const CELL: u32 = 32;

    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            frame: AtomicU64::new(0),
        }
    }

    /// Number of snapshots taken so far.
    pub fn frames_served(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// The frame a given snapshot index produces.
    pub fn render(resolution: Resolution, frame: u64) -> RgbaImage {
        let palette = Self::PALETTE.len() as u64;
        let [r, g, b] = Self::PALETTE[(frame % palette) as usize];
        let [r2, g2, b2] = Self::PALETTE[((frame + 3) % palette) as usize];

        RgbaImage::from_fn(resolution.width, resolution.height, |x, y| {
            if (x / Self::CELL + y / Self::CELL) % 2 == 0 {
                Rgba([r, g, b, 255])
            } else {
                Rgba([r2, g2, b2, 255])
            }
        })
    }
}

impl ImageSource for TestPatternSource {
    fn snapshot(&self) -> Arc<RgbaImage> {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self::render(self.resolution, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_advances_per_snapshot() {
        let source = TestPatternSource::new(Resolution::new(64, 64));
        let first = source.snapshot();
        let second = source.snapshot();

        assert_ne!(first, second);
        assert_eq!(source.frames_served(), 2);
        assert_eq!(*first, TestPatternSource::render(Resolution::new(64, 64), 0));
    }

    #[test]
    fn test_still_image_is_shared_not_copied() {
        let source = StillImageSource::new(RgbaImage::new(4, 4));
        assert!(Arc::ptr_eq(&source.snapshot(), &source.snapshot()));
    }

    #[test]
    fn test_open_scales_to_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.png");
        RgbaImage::from_pixel(40, 20, Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();

        let source = StillImageSource::open(&path, Resolution::new(8, 8)).unwrap();
        assert_eq!(source.snapshot().dimensions(), (8, 8));
    }

    #[test]
    fn test_open_missing_file() {
        let err = StillImageSource::open("/nonexistent.png", Resolution::default()).unwrap_err();
        assert_eq!(err.category(), "external");
    }
}
