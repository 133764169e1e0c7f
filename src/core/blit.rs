//! Copy an RGBA image into a fixed-size destination, scaling when the sizes
//! differ. Scaling runs on fast_image_resize's SIMD convolution.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{ResizeOptions, Resizer};
use image::RgbaImage;

use crate::error::{FlipbookError, FlipbookResult};

/// Write `src` into `dst` without changing `dst`'s dimensions.
pub fn blit(src: &RgbaImage, dst: &mut RgbaImage) -> FlipbookResult<()> {
    if src.dimensions() == dst.dimensions() {
        dst.copy_from_slice(src.as_raw());
        return Ok(());
    }

    let (src_w, src_h) = src.dimensions();
    let (dst_w, dst_h) = dst.dimensions();

    let src_view = TypedImageRef::<U8x4>::from_buffer(src_w, src_h, src.as_raw())
        .map_err(|e| FlipbookError::external("fast_image_resize", e))?;
    let dst_bytes: &mut [u8] = dst;
    let mut dst_view = TypedImage::<U8x4>::from_buffer(dst_w, dst_h, dst_bytes)
        .map_err(|e| FlipbookError::external("fast_image_resize", e))?;

    // Frames are opaque, skip alpha premultiplication.
    let opts = ResizeOptions::new().use_alpha(false);
    let mut resizer = Resizer::new();
    resizer
        .resize_typed::<U8x4>(&src_view, &mut dst_view, &opts)
        .map_err(|e| FlipbookError::external("fast_image_resize", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_same_size_is_exact_copy() {
        let src = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let mut dst = RgbaImage::new(4, 3);
        blit(&src, &mut dst).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_scaling_keeps_destination_size() {
        let src = RgbaImage::from_pixel(16, 8, Rgba([200, 100, 50, 255]));
        let mut dst = RgbaImage::new(4, 4);
        blit(&src, &mut dst).unwrap();

        assert_eq!(dst.dimensions(), (4, 4));
        // A uniform image stays uniform after resampling.
        assert!(dst.pixels().all(|p| *p == Rgba([200, 100, 50, 255])));
    }
}
