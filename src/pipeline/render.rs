//! PDF rasterisation: render selected pages to PNG files via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so the
//! Tokio worker threads never stall during CPU-heavy rendering.
//!
//! ## Why write pages to disk?
//!
//! The `ollama` CLI takes an image *path*, so every page has to exist as a
//! file anyway. Pages are written as `page_{n}.png` into the caller's scratch
//! directory and dropped from memory right away; a 300-page scan at 200 DPI
//! would otherwise hold gigabytes of bitmaps.

use crate::config::ConversionConfig;
use crate::error::Ocr2MdError;
use crate::output::DocumentMetadata;
use image::ImageFormat;
use pdfium_loader::FetchPolicy;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Dependency name reported when the pdfium library cannot be bound.
pub const PDFIUM: &str = "pdfium";

/// One page image on disk, ready for the OCR engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-indexed page number in the source document.
    pub page_num: usize,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// Pages produced from a PDF plus the document's full page count.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub total_pages: usize,
    pub pages: Vec<PageImage>,
}

/// Rasterise the selected pages of a PDF into `out_dir/page_{n}.png`.
pub async fn render_pdf(
    pdf_path: &Path,
    config: &ConversionConfig,
    out_dir: &Path,
) -> Result<RenderedPdf, Ocr2MdError> {
    let path = pdf_path.to_path_buf();
    let out_dir = out_dir.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let selection = config.pages.clone();
    let policy = fetch_policy(config);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(policy)?;
        let document = open_document(&pdfium, &path)?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices = selection.to_indices(total_pages);
        if indices.is_empty() {
            return Err(Ocr2MdError::PageOutOfRange { total: total_pages });
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);

        let mut rendered = Vec::with_capacity(indices.len());
        for idx in indices {
            let page_num = idx + 1;
            let raster_err = |e: PdfiumError| Ocr2MdError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            };
            let page = pages.get(idx as u16).map_err(raster_err)?;
            let bitmap = page.render_with_config(&render_config).map_err(raster_err)?;
            let image = bitmap.as_image();

            let file = out_dir.join(format!("page_{page_num}.png"));
            image
                .save_with_format(&file, ImageFormat::Png)
                .map_err(|e| Ocr2MdError::ImageFailed {
                    path: file.clone(),
                    detail: e.to_string(),
                })?;
            debug!(
                "Rendered page {} → {}x{} px ({})",
                page_num,
                image.width(),
                image.height(),
                file.display()
            );

            rendered.push(PageImage {
                page_num,
                path: file,
                width: image.width(),
                height: image.height(),
            });
        }

        Ok(RenderedPdf {
            total_pages,
            pages: rendered,
        })
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("Render task panicked: {}", e)))?
}

/// Describe a raster image input as a single page, reading only its header.
pub fn load_image(path: &Path) -> Result<PageImage, Ocr2MdError> {
    let (width, height) =
        image::image_dimensions(path).map_err(|e| Ocr2MdError::ImageFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    if width == 0 || height == 0 {
        return Err(Ocr2MdError::ImageFailed {
            path: path.to_path_buf(),
            detail: "image has zero size".into(),
        });
    }
    Ok(PageImage {
        page_num: 1,
        path: path.to_path_buf(),
        width,
        height,
    })
}

/// Extract document metadata from a PDF without rendering pages.
pub async fn extract_metadata(
    pdf_path: &Path,
    config: &ConversionConfig,
) -> Result<DocumentMetadata, Ocr2MdError> {
    let path = pdf_path.to_path_buf();
    let policy = fetch_policy(config);

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(policy)?;
        let document = open_document(&pdfium, &path)?;
        let metadata = document.metadata();

        let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
            metadata
                .get(tag)
                .map(|t| t.value().trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(DocumentMetadata {
            title: get_meta(PdfDocumentMetadataTagType::Title),
            author: get_meta(PdfDocumentMetadataTagType::Author),
            subject: get_meta(PdfDocumentMetadataTagType::Subject),
            creator: get_meta(PdfDocumentMetadataTagType::Creator),
            producer: get_meta(PdfDocumentMetadataTagType::Producer),
            page_count: document.pages().len() as usize,
            pdf_version: format!("{:?}", document.version()),
        })
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn fetch_policy(config: &ConversionConfig) -> FetchPolicy {
    if config.fetch_pdfium {
        FetchPolicy::IfMissing
    } else {
        FetchPolicy::Never
    }
}

fn bind_pdfium(policy: FetchPolicy) -> Result<Pdfium, Ocr2MdError> {
    pdfium_loader::bind(policy).map_err(|e| Ocr2MdError::MissingDependency {
        name: PDFIUM.to_string(),
        hint: format!(
            "{e}. Install pdfium or point {} at libpdfium",
            pdfium_loader::LIB_PATH_ENV
        ),
    })
}

fn open_document<'a>(pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, Ocr2MdError> {
    pdfium.load_pdf_from_file(path, None).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.contains("Password") || detail.contains("password") {
            Ocr2MdError::PasswordRequired {
                path: path.to_path_buf(),
            }
        } else {
            Ocr2MdError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}
