//! Page bitmaps and the pixel operations the canvas needs on them

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::geometry::Rect;

/// Rendered page or note layer, always straight RGBA8
pub type Bitmap = RgbaImage;

/// Pixel count above which colour inversion is spread over the rayon pool
const PARALLEL_PIXEL_THRESHOLD: u64 = 200_000;

const LIGHT_BACKGROUND: Rgba<u8> = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);
const DARK_BACKGROUND: Rgba<u8> = Rgba([0x00, 0x00, 0x00, 0xFF]);
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Background fill for document pages under the current theme.
///
/// Dark mode shows inverted pages, so blank regions use inverted white.
#[must_use]
pub fn page_background(dark_mode: bool) -> Rgba<u8> {
    if dark_mode {
        DARK_BACKGROUND
    } else {
        LIGHT_BACKGROUND
    }
}

/// Bitmap of the given size filled with one colour
#[must_use]
pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Bitmap {
    RgbaImage::from_pixel(width, height, color)
}

/// Invert RGB channels in place, leaving alpha untouched
pub fn invert_rgb(bitmap: &mut Bitmap) {
    let total_pixels = u64::from(bitmap.width()) * u64::from(bitmap.height());
    let samples: &mut [u8] = bitmap;

    if total_pixels < PARALLEL_PIXEL_THRESHOLD {
        samples.chunks_exact_mut(4).for_each(invert_pixel);
        return;
    }

    samples.par_chunks_mut(4).for_each(invert_pixel);
}

#[inline]
fn invert_pixel(px: &mut [u8]) {
    px[0] = 255 - px[0];
    px[1] = 255 - px[1];
    px[2] = 255 - px[2];
}

/// Alpha-composite `src` over `dst` (source-over), both anchored at the origin.
///
/// Fully transparent source pixels leave `dst` untouched and fully opaque ones
/// replace it, so ink over a page never picks up rounding noise.
pub fn composite_over(dst: &mut Bitmap, src: &Bitmap) {
    let width = dst.width().min(src.width()) as usize;
    let height = dst.height().min(src.height()) as usize;
    if width == 0 || height == 0 {
        return;
    }

    let dst_stride = dst.width() as usize * 4;
    let src_stride = src.width() as usize * 4;
    let src_samples: &[u8] = src;
    let dst_samples: &mut [u8] = dst;
    let blend_row = |(dst_row, src_row): (&mut [u8], &[u8])| {
        dst_row[..width * 4]
            .chunks_exact_mut(4)
            .zip(src_row[..width * 4].chunks_exact(4))
            .for_each(|(d, s)| blend_pixel(d, s));
    };

    let rows = dst_samples
        .chunks_exact_mut(dst_stride)
        .take(height)
        .zip(src_samples.chunks_exact(src_stride));
    if ((width * height) as u64) < PARALLEL_PIXEL_THRESHOLD {
        rows.for_each(blend_row);
        return;
    }

    dst_samples
        .par_chunks_exact_mut(dst_stride)
        .take(height)
        .zip(src_samples.par_chunks_exact(src_stride))
        .for_each(blend_row);
}

#[inline]
fn blend_pixel(dst: &mut [u8], src: &[u8]) {
    let src_a = u32::from(src[3]);
    match src_a {
        0 => {}
        255 => dst.copy_from_slice(src),
        _ => {
            let dst_a = u32::from(dst[3]);
            let inv = 255 - src_a;
            // Alpha scaled by 255: out_a = src_a + dst_a * (1 - src_a)
            let out_a = src_a * 255 + dst_a * inv;
            for c in 0..3 {
                let premul = u32::from(src[c]) * src_a * 255 + u32::from(dst[c]) * dst_a * inv;
                dst[c] = ((premul + out_a / 2) / out_a) as u8;
            }
            dst[3] = ((out_a + 127) / 255) as u8;
        }
    }
}

/// Copy `src` onto `dst` at the given offset, clipping to `dst`
pub fn blit(dst: &mut Bitmap, src: &Bitmap, x: i64, y: i64) {
    imageops::replace(dst, src, x, y);
}

/// Copy of the part of `bitmap` covered by `rect`, clipped to the bitmap bounds.
///
/// Returns `None` when the clipped region is empty.
#[must_use]
pub fn crop(bitmap: &Bitmap, rect: Rect) -> Option<Bitmap> {
    let bounds = Rect::new(
        0.0,
        0.0,
        f64::from(bitmap.width()),
        f64::from(bitmap.height()),
    );
    let clipped = bounds.intersection(&rect);
    if clipped.is_empty() {
        return None;
    }

    let x = clipped.x.floor() as u32;
    let y = clipped.y.floor() as u32;
    let width = (clipped.right().ceil() as u32).min(bitmap.width()) - x;
    let height = (clipped.bottom().ceil() as u32).min(bitmap.height()) - y;
    if width == 0 || height == 0 {
        return None;
    }

    Some(imageops::crop_imm(bitmap, x, y, width, height).to_image())
}

/// Check whether every pixel in a horizontal band equals `color`
#[must_use]
pub fn band_is_solid(bitmap: &Bitmap, y0: u32, y1: u32, color: Rgba<u8>) -> bool {
    let y1 = y1.min(bitmap.height());
    (y0..y1).all(|y| (0..bitmap.width()).all(|x| *bitmap.get_pixel(x, y) == color))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invert_keeps_alpha() {
        let mut bitmap = filled(2, 2, Rgba([10, 20, 30, 40]));
        invert_rgb(&mut bitmap);
        assert!(bitmap.pixels().all(|p| *p == Rgba([245, 235, 225, 40])));
    }

    #[test]
    fn parallel_invert_matches_scalar() {
        let mut large = filled(600, 400, Rgba([200, 100, 0, 255]));
        invert_rgb(&mut large);
        assert!(large.pixels().all(|p| *p == Rgba([55, 155, 255, 255])));
    }

    #[test]
    fn crop_clips_to_bounds() {
        let mut bitmap = filled(10, 10, Rgba([0, 0, 0, 255]));
        bitmap.put_pixel(9, 9, Rgba([1, 2, 3, 255]));

        let cropped = crop(&bitmap, Rect::new(8.0, 8.0, 50.0, 50.0)).unwrap();
        assert_eq!(cropped.dimensions(), (2, 2));
        assert_eq!(*cropped.get_pixel(1, 1), Rgba([1, 2, 3, 255]));

        assert!(crop(&bitmap, Rect::new(20.0, 20.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn blit_clips_overflow() {
        let mut dst = filled(4, 4, TRANSPARENT);
        let src = filled(4, 4, Rgba([9, 9, 9, 255]));
        blit(&mut dst, &src, 2, 2);

        assert_eq!(*dst.get_pixel(3, 3), Rgba([9, 9, 9, 255]));
        assert_eq!(*dst.get_pixel(1, 1), TRANSPARENT);
    }

    #[test]
    fn composite_over_blends_by_alpha() {
        let mut dst = filled(3, 1, Rgba([200, 100, 50, 255]));
        let mut src = filled(3, 1, TRANSPARENT);
        src.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        src.put_pixel(2, 0, Rgba([0, 0, 0, 128]));
        composite_over(&mut dst, &src);

        assert_eq!(*dst.get_pixel(0, 0), Rgba([200, 100, 50, 255]));
        assert_eq!(*dst.get_pixel(1, 0), Rgba([0, 0, 0, 255]));
        assert_eq!(*dst.get_pixel(2, 0), Rgba([100, 50, 25, 255]));
    }

    #[test]
    fn composite_over_clips_to_smaller_layer() {
        let mut dst = filled(4, 4, Rgba([255, 255, 255, 255]));
        let src = filled(2, 6, Rgba([1, 1, 1, 255]));
        composite_over(&mut dst, &src);

        assert_eq!(*dst.get_pixel(1, 3), Rgba([1, 1, 1, 255]));
        assert_eq!(*dst.get_pixel(2, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn theme_background() {
        assert_eq!(page_background(false), Rgba([255, 255, 255, 255]));
        assert_eq!(page_background(true), Rgba([0, 0, 0, 255]));
    }
}
