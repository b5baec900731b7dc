//! # ocr2md
//!
//! Convert PDFs and scanned images to Markdown with the DeepSeek-OCR vision
//! model running in a local runtime (Ollama).
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / PNG / JPEG
//!  │
//!  ├─ 1. Input    resolve local file or download from URL, check file type
//!  ├─ 2. Render   rasterise PDF pages to PNG via pdfium (spawn_blocking)
//!  ├─ 3. OCR      one model call per page (`ollama run deepseek-ocr`)
//!  ├─ 4. Polish   crop figures into data URIs, strip model markup, fix LaTeX
//!  └─ 5. Output   header comment + page markers + page text
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr2md::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Requires `ollama pull deepseek-ocr` beforehand.
//!     let config = ConversionConfig::default();
//!     let output = convert("scan.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `ocr2md` binary (clap + anyhow + tracing-subscriber) |
//! | `server` | on      | HTTP API and web UI (`ocr2md serve`), built on axum |
//!
//! Disable both when using only the library:
//! ```toml
//! ocr2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Backend, ConversionConfig, ConversionConfigBuilder, PageSelection};
pub use convert::{
    assemble_document, convert, convert_bytes, convert_pages, convert_sync, convert_to_file,
    inspect, write_markdown,
};
pub use error::{ErrorClass, Ocr2MdError};
pub use output::{ConversionOutput, ConversionStats, DocumentMetadata, PageResult};
pub use pipeline::engine::{OcrEngine, OllamaCli, VisionProvider};
pub use pipeline::input::InputKind;
pub use pipeline::postprocess::{clean_text, embed_images};
pub use pipeline::render::PageImage;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
