//! Pipeline stages for document-to-Markdown conversion.
//!
//! Each submodule implements one transformation step and is tested on its own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ engine ──▶ postprocess
//! (path/URL)  (pdfium)  (OCR model)  (embed + clean)
//! ```
//!
//! 1. [`input`] resolves the path or URL to a local file and classifies it
//!    as PDF or image
//! 2. [`render`] rasterises PDF pages to PNG files in a scratch directory;
//!    running in `spawn_blocking` because pdfium is not async-safe
//! 3. [`engine`] hands each page image to the OCR model; the only stage
//!    that talks to an external runtime
//! 4. [`postprocess`] crops referenced figures back into the text, then
//!    strips marker tokens and normalises LaTeX and blank lines
//!
//! [`encode`] holds the PNG/base64 helpers shared by the provider backend and
//! image embedding.

pub mod encode;
pub mod engine;
pub mod input;
pub mod postprocess;
pub mod render;
