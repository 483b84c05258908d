//! Pure enhancement pipeline applied to rasterized pages.
//!
//! The operation order is fixed: denoise, contrast, brightness, sharpen,
//! then color reduction. Deterministic for a given bitmap and settings.

use image::{GrayImage, RgbImage};
use rayon::prelude::*;

use crate::luma;
use crate::settings::Settings;

/// Pixel count above which per-row loops move onto the rayon pool.
const PARALLEL_PIXEL_THRESHOLD: u64 = 200_000;

/// PIL-style sharpen kernel (center-weighted, normalized by 16).
const SHARPEN_KERNEL: [f32; 9] = [
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    32.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
    -2.0 / 16.0,
];

/// Encoded payload format chosen for a transformed page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
}

/// A transformed page bitmap with its colorspace made explicit.
///
/// Closed set: downstream encoding dispatches on the variant instead of
/// inspecting sample data.
#[derive(Clone, Debug, PartialEq)]
pub enum TransformedImage {
    Rgb(RgbImage),
    Gray(GrayImage),
    /// Single-channel with exactly two sample values (0 and 255).
    Binary(GrayImage),
}

impl TransformedImage {
    /// Binarized pages must stay lossless; everything else goes to JPEG.
    #[must_use]
    pub fn output_format(&self) -> OutputFormat {
        match self {
            TransformedImage::Binary(_) => OutputFormat::Png,
            TransformedImage::Rgb(_) | TransformedImage::Gray(_) => OutputFormat::Jpeg,
        }
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            TransformedImage::Rgb(img) => img.dimensions(),
            TransformedImage::Gray(img) | TransformedImage::Binary(img) => img.dimensions(),
        }
    }
}

/// Apply the enhancement pipeline to a page bitmap.
#[must_use]
pub fn apply(mut img: RgbImage, settings: &Settings) -> TransformedImage {
    if settings.denoise {
        img = imageproc::filter::median_filter(&img, 1, 1);
    }
    if settings.enhance_contrast {
        adjust_contrast(&mut img, settings.contrast_factor);
    }
    if settings.enhance_brightness {
        adjust_brightness(&mut img, settings.brightness_factor);
    }
    if settings.sharpen {
        img = image::imageops::filter3x3(&img, &SHARPEN_KERNEL);
    }

    // Binarize wins over grayscale when both are requested.
    if settings.binarize {
        let mut gray = to_gray(&img);
        binarize_in_place(&mut gray, settings.binarize_threshold);
        TransformedImage::Binary(gray)
    } else if settings.grayscale {
        TransformedImage::Gray(to_gray(&img))
    } else {
        TransformedImage::Rgb(img)
    }
}

/// Scale samples away from the image's mean luma. Factor 1.0 is identity.
fn adjust_contrast(img: &mut RgbImage, factor: f32) {
    let pivot = mean_luma(img).round();
    map_samples(img, |v| pivot + (f32::from(v) - pivot) * factor);
}

/// Scale samples towards/away from black. Factor 1.0 is identity.
fn adjust_brightness(img: &mut RgbImage, factor: f32) {
    map_samples(img, |v| f32::from(v) * factor);
}

fn mean_luma(img: &RgbImage) -> f32 {
    let (width, height) = img.dimensions();
    let pixels = u64::from(width) * u64::from(height);
    if pixels == 0 {
        return 0.0;
    }

    let sum: u64 = img
        .pixels()
        .map(|px| u64::from(luma::luma(px[0], px[1], px[2])))
        .sum();
    sum as f32 / pixels as f32
}

fn map_samples(img: &mut RgbImage, f: impl Fn(u8) -> f32 + Sync) {
    let (width, height) = img.dimensions();
    let row_bytes = width as usize * 3;
    let large = u64::from(width) * u64::from(height) >= PARALLEL_PIXEL_THRESHOLD;
    let samples: &mut [u8] = img;

    if large && height >= 4 {
        samples.par_chunks_mut(row_bytes).for_each(|row| {
            for v in row {
                *v = clamp_sample(f(*v));
            }
        });
    } else {
        for v in samples {
            *v = clamp_sample(f(*v));
        }
    }
}

#[inline]
fn clamp_sample(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

fn to_gray(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let row_px = width as usize;
    let mut out = vec![0u8; row_px * height as usize];
    let src: &[u8] = img;
    let large = u64::from(width) * u64::from(height) >= PARALLEL_PIXEL_THRESHOLD;

    if large && height >= 4 {
        src.par_chunks(row_px * 3)
            .zip(out.par_chunks_mut(row_px))
            .for_each(|(rgb, gray)| luma::luma_row(rgb, gray));
    } else {
        for (rgb, gray) in src.chunks_exact(row_px * 3).zip(out.chunks_mut(row_px)) {
            luma::luma_row(rgb, gray);
        }
    }

    GrayImage::from_raw(width, height, out).expect("luma buffer matches dimensions")
}

fn binarize_in_place(gray: &mut GrayImage, threshold: u8) {
    let samples: &mut [u8] = gray;
    for v in samples {
        *v = if *v < threshold { 0 } else { 255 };
    }
}
