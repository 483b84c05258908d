//! Output PDF assembly.
//!
//! Consumes per-page encoded results and rebuilds a single PDF, iterating
//! page indices in ascending order so output order and count always match
//! the input document, no matter how completions raced.

use std::collections::BTreeMap;
use std::io::Write;

use log::warn;
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use crate::pipeline::{EncodedImage, PageResult, pack_bilevel_rows};
use crate::transform::OutputFormat;

/// Fallback page geometry (A4 portrait, points) for failed pages whose
/// dimensions were never seen.
pub const FALLBACK_PAGE_WIDTH_PTS: f32 = 595.0;
pub const FALLBACK_PAGE_HEIGHT_PTS: f32 = 842.0;

#[derive(Debug, thiserror::Error)]
enum EmbedError {
    #[error("image payload decode: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image stream compression: {0}")]
    Compress(#[from] std::io::Error),
}

/// Rebuild the output document from per-page results.
///
/// Always produces exactly `page_count` pages. Pages with no usable result
/// become blank pages sized to the page's own recorded dimensions when
/// known, else the last known page size, else A4. A page whose image fails
/// to embed degrades to a blank page as well instead of failing the run.
#[must_use]
pub fn assemble(results: &BTreeMap<usize, PageResult>, page_count: usize) -> Document {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(page_count);
    let mut last_size = (FALLBACK_PAGE_WIDTH_PTS, FALLBACK_PAGE_HEIGHT_PTS);

    for index in 0..page_count {
        let result = results.get(&index);
        if let Some(size) = result.and_then(|r| r.size) {
            last_size = (size.width, size.height);
        }
        let (width, height) = last_size;

        let page_id = match result.and_then(|r| r.image.as_ref()) {
            Some(image) => match add_image_page(&mut doc, pages_id, width, height, image) {
                Ok(id) => id,
                Err(e) => {
                    warn!("failed to embed image for page {index}: {e}; inserting blank page");
                    add_blank_page(&mut doc, pages_id, width, height)
                }
            },
            None => {
                warn!("no processed image for page {index}; inserting blank page");
                add_blank_page(&mut doc, pages_id, width, height)
            }
        };
        kids.push(page_id.into());
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_count as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    // Compacts the container: deflates filterless streams, renumbers
    // objects. Image streams keep their own filters.
    doc.compress();
    doc
}

fn add_image_page(
    doc: &mut Document,
    pages_id: ObjectId,
    width: f32,
    height: f32,
    image: &EncodedImage,
) -> Result<ObjectId, EmbedError> {
    let xobject = match image.format {
        OutputFormat::Jpeg => jpeg_xobject(image),
        OutputFormat::Png => bilevel_xobject(image)?,
    };
    let image_id = doc.add_object(xobject);

    // Scale the unit image square to fill the page exactly
    let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    Ok(doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box(width, height),
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    }))
}

fn add_blank_page(doc: &mut Document, pages_id: ObjectId, width: f32, height: f32) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box(width, height),
    })
}

fn media_box(width: f32, height: f32) -> Vec<Object> {
    vec![
        Object::Real(0.0),
        Object::Real(0.0),
        Object::Real(width),
        Object::Real(height),
    ]
}

/// JPEG payloads pass straight through as DCTDecode streams.
fn jpeg_xobject(image: &EncodedImage) -> Stream {
    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(image.width_px),
        "Height" => i64::from(image.height_px),
        "ColorSpace" => if image.gray { "DeviceGray" } else { "DeviceRGB" },
        "BitsPerComponent" => 8i64,
        "Filter" => "DCTDecode",
    };
    Stream::new(dict, image.bytes.clone())
}

/// Binarized pages arrive as 1-bit PNG; PDF images do not take PNG
/// containers, so the samples are repacked into a FlateDecode DeviceGray
/// stream at one bit per component.
fn bilevel_xobject(image: &EncodedImage) -> Result<Stream, EmbedError> {
    let gray = image::load_from_memory(&image.bytes)?.to_luma8();
    let packed = pack_bilevel_rows(&gray);

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::best());
    encoder.write_all(&packed)?;
    let data = encoder.finish()?;

    let dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => i64::from(gray.width()),
        "Height" => i64::from(gray.height()),
        "ColorSpace" => "DeviceGray",
        "BitsPerComponent" => 1i64,
        "Filter" => "FlateDecode",
    };
    Ok(Stream::new(dict, data))
}
