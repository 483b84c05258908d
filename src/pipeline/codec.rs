//! Page rasterization and encoding.
//!
//! Every operation opens its own document handle; mupdf parser state is
//! never shared across threads.

use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, GrayImage, RgbImage};
use log::{debug, error, warn};
use mupdf::{Colorspace, Document, Matrix, Pixmap};

use super::PREVIEW_ORIGINAL_DPI;
use super::request::{PreviewImage, PreviewSlot};
use crate::settings::Settings;
use crate::transform::{self, OutputFormat, TransformedImage};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to open document {path:?}: {source}")]
    DocumentOpen {
        path: PathBuf,
        source: mupdf::error::Error,
    },

    #[error("page {page} out of range, document has {page_count} pages")]
    PageNotFound { page: usize, page_count: usize },

    #[error("PDF engine: {0}")]
    Engine(#[from] mupdf::error::Error),

    #[error("image encoding: {0}")]
    Encode(#[from] image::ImageError),

    #[error("PNG encoding: {0}")]
    Png(#[from] png::EncodingError),

    #[error("{0}")]
    Pixmap(String),
}

/// Original page geometry in page-space points (1/72 inch), independent of
/// the rendering resolution. Recorded so the assembler can rebuild pages at
/// their true size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageSizePts {
    pub width: f32,
    pub height: f32,
}

/// Encoded payload for one page.
#[derive(Clone, Debug)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub width_px: u32,
    pub height_px: u32,
    /// Single-channel payload (DeviceGray in the output PDF).
    pub gray: bool,
}

/// Outcome of processing one page. Produced exactly once per job and
/// immutable afterwards; a missing `image` marks a failed page.
#[derive(Clone, Debug)]
pub struct PageResult {
    pub page_index: usize,
    pub size: Option<PageSizePts>,
    pub image: Option<EncodedImage>,
}

impl PageResult {
    #[must_use]
    pub fn failed(page_index: usize) -> Self {
        Self {
            page_index,
            size: None,
            image: None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.image.is_some()
    }
}

/// Seam between the pipeline and the PDF engine. The pool and preview
/// service only ever talk to this trait, so they can be exercised with a
/// stub codec.
pub trait PageCodec: Send + Sync {
    /// Page count of the document, failing if it cannot be opened.
    fn page_count(&self, path: &Path) -> Result<usize, CodecError>;

    /// Render, enhance and encode one page. Page-level failures are
    /// expected conditions: they come back as a failure-marked result,
    /// never as a panic or error.
    fn compress_page(&self, path: &Path, page: usize, settings: &Settings) -> PageResult;

    /// Render one preview surface for a page.
    fn render_preview(
        &self,
        path: &Path,
        page: usize,
        slot: PreviewSlot,
        settings: &Settings,
    ) -> Result<PreviewImage, CodecError>;
}

/// Production codec backed by mupdf.
pub struct MupdfCodec;

impl MupdfCodec {
    fn open(path: &Path) -> Result<Document, CodecError> {
        Document::open(path.to_string_lossy().as_ref()).map_err(|source| {
            CodecError::DocumentOpen {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Rasterize one page at `dpi` into packed RGB, recording page-space
    /// geometry. Zoom is derived against the PDF's 72-dpi page space.
    fn render_page(
        path: &Path,
        page: usize,
        dpi: u32,
    ) -> Result<(RgbImage, PageSizePts), CodecError> {
        let doc = Self::open(path)?;
        let page_count = doc.page_count()? as usize;
        if page >= page_count {
            return Err(CodecError::PageNotFound { page, page_count });
        }

        let pg = doc.load_page(page as i32)?;
        let bounds = pg.bounds()?;
        let size = PageSizePts {
            width: bounds.x1 - bounds.x0,
            height: bounds.y1 - bounds.y0,
        };

        let zoom = dpi as f32 / 72.0;
        let matrix = Matrix::new_scale(zoom, zoom);
        let rgb = Colorspace::device_rgb();
        let pixmap = pg.to_pixmap(&matrix, &rgb, false, false)?;

        Ok((pixmap_to_rgb_image(&pixmap)?, size))
    }
}

impl PageCodec for MupdfCodec {
    fn page_count(&self, path: &Path) -> Result<usize, CodecError> {
        let doc = Self::open(path)?;
        Ok(doc.page_count()? as usize)
    }

    fn compress_page(&self, path: &Path, page: usize, settings: &Settings) -> PageResult {
        debug!(
            "compressing page {page} of {path:?}: dpi={}, quality={}, grayscale={}, binarize={}",
            settings.dpi, settings.quality, settings.grayscale, settings.binarize,
        );

        let (img, size) = match Self::render_page(path, page, settings.dpi) {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!("page {page} of {path:?} failed to render: {e}");
                return PageResult::failed(page);
            }
        };

        let transformed = transform::apply(img, settings);
        match encode(&transformed, settings.quality) {
            Ok(image) => {
                debug!(
                    "page {page} encoded as {:?}, {} bytes",
                    image.format,
                    image.bytes.len()
                );
                PageResult {
                    page_index: page,
                    size: Some(size),
                    image: Some(image),
                }
            }
            Err(e) => {
                error!("page {page} of {path:?} failed to encode: {e}");
                PageResult {
                    page_index: page,
                    size: Some(size),
                    image: None,
                }
            }
        }
    }

    fn render_preview(
        &self,
        path: &Path,
        page: usize,
        slot: PreviewSlot,
        settings: &Settings,
    ) -> Result<PreviewImage, CodecError> {
        match slot {
            PreviewSlot::Original => {
                let (img, _) = Self::render_page(path, page, PREVIEW_ORIGINAL_DPI)?;
                Ok(preview_from_rgb(img))
            }
            PreviewSlot::Processed => {
                let (img, _) = Self::render_page(path, page, settings.dpi)?;
                let transformed = transform::apply(img, settings);
                let simulated = simulate_jpeg_roundtrip(&transformed, settings.quality)?;
                Ok(preview_from_rgb(simulated))
            }
        }
    }
}

/// Encode a transformed bitmap into its output payload.
pub fn encode(image: &TransformedImage, quality: u8) -> Result<EncodedImage, CodecError> {
    match image {
        TransformedImage::Rgb(img) => {
            let mut bytes = Vec::new();
            JpegEncoder::new_with_quality(&mut bytes, quality).encode(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::Rgb8,
            )?;
            Ok(EncodedImage {
                bytes,
                format: OutputFormat::Jpeg,
                width_px: img.width(),
                height_px: img.height(),
                gray: false,
            })
        }
        TransformedImage::Gray(img) => {
            let mut bytes = Vec::new();
            JpegEncoder::new_with_quality(&mut bytes, quality).encode(
                img.as_raw(),
                img.width(),
                img.height(),
                ExtendedColorType::L8,
            )?;
            Ok(EncodedImage {
                bytes,
                format: OutputFormat::Jpeg,
                width_px: img.width(),
                height_px: img.height(),
                gray: true,
            })
        }
        TransformedImage::Binary(img) => Ok(EncodedImage {
            bytes: encode_png_1bit(img)?,
            format: OutputFormat::Png,
            width_px: img.width(),
            height_px: img.height(),
            gray: true,
        }),
    }
}

/// Pack a two-valued grayscale bitmap into 1-bit rows, MSB first, each row
/// starting on a byte boundary. Set bits are white.
#[must_use]
pub fn pack_bilevel_rows(img: &GrayImage) -> Vec<u8> {
    let (width, height) = img.dimensions();
    let row_bytes = (width as usize).div_ceil(8);
    let mut packed = vec![0u8; row_bytes * height as usize];

    for (row, out_row) in img
        .as_raw()
        .chunks_exact(width as usize)
        .zip(packed.chunks_exact_mut(row_bytes))
    {
        for (x, &v) in row.iter().enumerate() {
            if v >= 128 {
                out_row[x / 8] |= 0x80 >> (x % 8);
            }
        }
    }

    packed
}

fn encode_png_1bit(img: &GrayImage) -> Result<Vec<u8>, CodecError> {
    let (width, height) = img.dimensions();
    let packed = pack_bilevel_rows(img);

    let mut bytes = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut bytes, width, height);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::One);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&packed)?;
    }
    Ok(bytes)
}

/// Re-encode through JPEG at the target quality so the preview shows real
/// compression artifacts. Applies regardless of the final output format;
/// bilevel bitmaps are widened to RGB first since JPEG has no 1-bit mode.
fn simulate_jpeg_roundtrip(
    image: &TransformedImage,
    quality: u8,
) -> Result<RgbImage, CodecError> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    match image {
        TransformedImage::Rgb(img) => encoder.encode(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        )?,
        TransformedImage::Gray(img) => encoder.encode(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::L8,
        )?,
        TransformedImage::Binary(img) => {
            let rgb = gray_to_rgb(img);
            encoder.encode(
                rgb.as_raw(),
                rgb.width(),
                rgb.height(),
                ExtendedColorType::Rgb8,
            )?;
        }
    }

    Ok(image::load_from_memory(&bytes)?.to_rgb8())
}

fn gray_to_rgb(img: &GrayImage) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y)[0];
        image::Rgb([v, v, v])
    })
}

fn preview_from_rgb(img: RgbImage) -> PreviewImage {
    PreviewImage {
        width: img.width(),
        height: img.height(),
        pixels: img.into_raw(),
    }
}

/// Repack a mupdf pixmap (possibly strided, possibly with extra channels)
/// into tight RGB samples.
fn pixmap_to_rgb_image(pixmap: &Pixmap) -> Result<RgbImage, CodecError> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(CodecError::Pixmap(format!(
            "unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    let expected_min = stride.saturating_mul(height);
    if samples.len() < expected_min || row_bytes > stride {
        return Err(CodecError::Pixmap("pixmap buffer size mismatch".into()));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row_start = y * stride;
        let row = &samples[row_start..row_start + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }

    RgbImage::from_raw(width as u32, height as u32, out)
        .ok_or_else(|| CodecError::Pixmap("pixmap buffer size mismatch".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            image::Luma([if (x + y) % 2 == 0 { 0 } else { 255 }])
        })
    }

    #[test]
    fn rgb_encodes_to_jpeg() {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([10, 120, 230]));
        let encoded = encode(&TransformedImage::Rgb(img), 80).unwrap();

        assert_eq!(encoded.format, OutputFormat::Jpeg);
        assert!(!encoded.gray);
        assert_eq!(&encoded.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn binary_encodes_to_bilevel_png() {
        let encoded = encode(&TransformedImage::Binary(checkerboard(10, 6)), 80).unwrap();

        assert_eq!(encoded.format, OutputFormat::Png);
        assert!(encoded.gray);
        assert_eq!(&encoded.bytes[1..4], b"PNG");

        // Decodes back to exactly two sample values
        let decoded = image::load_from_memory(&encoded.bytes).unwrap().to_luma8();
        assert_eq!(decoded.dimensions(), (10, 6));
        let mut values: Vec<u8> = decoded.as_raw().clone();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values, vec![0, 255]);
    }

    #[test]
    fn bilevel_packing_pads_rows_to_byte_boundaries() {
        // width 10 -> two bytes per row
        let packed = pack_bilevel_rows(&checkerboard(10, 2));
        assert_eq!(packed.len(), 4);
        // row 0 starts black: 01010101 01......
        assert_eq!(packed[0], 0b0101_0101);
        assert_eq!(packed[1], 0b0100_0000);
        // row 1 starts white
        assert_eq!(packed[2], 0b1010_1010);
        assert_eq!(packed[3], 0b1000_0000);
    }

    #[test]
    fn jpeg_roundtrip_preserves_dimensions() {
        let img = RgbImage::from_fn(12, 9, |x, y| image::Rgb([(x * 20) as u8, (y * 25) as u8, 90]));
        let out = simulate_jpeg_roundtrip(&TransformedImage::Rgb(img), 60).unwrap();
        assert_eq!(out.dimensions(), (12, 9));
    }
}
