//! Image encoding helpers: PNG bytes → base64.
//!
//! PNG keeps rendered text lossless. Two consumers share this: the HTTP
//! provider backend (page files as [`ImageData`]) and figure embedding
//! (crops as `data:image/png;base64,...` URIs).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

pub const PNG_MIME: &str = "image/png";
pub const JPEG_MIME: &str = "image/jpeg";

/// Encode an image as PNG bytes.
pub fn png_bytes(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as base64 PNG.
pub fn png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let b64 = STANDARD.encode(png_bytes(img)?);
    debug!(
        "Encoded {}x{} image → {} bytes base64",
        img.width(),
        img.height(),
        b64.len()
    );
    Ok(b64)
}

/// `data:` URI suitable for a Markdown image link.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    Ok(format!("data:{PNG_MIME};base64,{}", png_base64(img)?))
}

/// MIME type of a page file, by extension.
pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => JPEG_MIME,
        _ => PNG_MIME,
    }
}

/// Wrap an encoded page file for a multimodal chat request, without
/// decoding it.
pub fn page_image_data(path: &Path, bytes: &[u8]) -> ImageData {
    ImageData::new(STANDARD.encode(bytes), mime_for(path))
}
