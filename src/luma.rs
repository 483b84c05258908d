//! Integer luma helpers shared by grayscale conversion and binarization.

use wide::u16x8;

// BT.601 weights scaled so the per-channel products and their sum stay
// within u16 (255 * 256 = 65280).
pub const LUMA_R: u16 = 77;
pub const LUMA_G: u16 = 150;
pub const LUMA_B: u16 = 29;

/// 8-bit luma of a single RGB pixel.
#[inline]
#[must_use]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((u16::from(r) * LUMA_R + u16::from(g) * LUMA_G + u16::from(b) * LUMA_B) >> 8) as u8
}

/// Convert a packed RGB row into 8-bit luma samples, 8 pixels per SIMD batch.
///
/// `rgb` must hold exactly `out.len() * 3` bytes.
pub fn luma_row(rgb: &[u8], out: &mut [u8]) {
    debug_assert_eq!(rgb.len(), out.len() * 3);

    let simd_pixels = out.len() / 8 * 8;
    let (rgb_simd, rgb_rest) = rgb.split_at(simd_pixels * 3);
    let (out_simd, out_rest) = out.split_at_mut(simd_pixels);

    for (chunk, dst) in rgb_simd
        .chunks_exact(24)
        .zip(out_simd.chunks_exact_mut(8))
    {
        let r = u16x8::new([
            u16::from(chunk[0]),
            u16::from(chunk[3]),
            u16::from(chunk[6]),
            u16::from(chunk[9]),
            u16::from(chunk[12]),
            u16::from(chunk[15]),
            u16::from(chunk[18]),
            u16::from(chunk[21]),
        ]);
        let g = u16x8::new([
            u16::from(chunk[1]),
            u16::from(chunk[4]),
            u16::from(chunk[7]),
            u16::from(chunk[10]),
            u16::from(chunk[13]),
            u16::from(chunk[16]),
            u16::from(chunk[19]),
            u16::from(chunk[22]),
        ]);
        let b = u16x8::new([
            u16::from(chunk[2]),
            u16::from(chunk[5]),
            u16::from(chunk[8]),
            u16::from(chunk[11]),
            u16::from(chunk[14]),
            u16::from(chunk[17]),
            u16::from(chunk[20]),
            u16::from(chunk[23]),
        ]);

        let l: u16x8 =
            (r * u16x8::splat(LUMA_R) + g * u16x8::splat(LUMA_G) + b * u16x8::splat(LUMA_B)) >> 8;

        for (dst, l) in dst.iter_mut().zip(l.to_array()) {
            *dst = l as u8;
        }
    }

    for (px, dst) in rgb_rest.chunks_exact(3).zip(out_rest.iter_mut()) {
        *dst = luma(px[0], px[1], px[2]);
    }
}
