//! Result types returned by the conversion entry points.

use serde::{Deserialize, Serialize};

/// Markdown produced for one page (or for the single page of an image input).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number within the source document.
    pub page_num: usize,
    /// Text exactly as the model returned it (trimmed).
    pub raw: String,
    /// Text after post-processing; equal to `raw` when cleaning is disabled.
    pub markdown: String,
    /// Wall-clock time of the model call.
    pub duration_ms: u64,
}

/// Timing and volume figures for a conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages in the source document (1 for images).
    pub total_pages: usize,
    /// Pages sent to the model.
    pub processed_pages: usize,
    /// Time spent rasterising or loading images.
    pub render_duration_ms: u64,
    /// Time spent waiting on the model.
    pub model_duration_ms: u64,
    /// End-to-end wall-clock time.
    pub total_duration_ms: u64,
}

/// Everything a front end needs after a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Assembled document.
    pub markdown: String,
    /// Per-page results in page order.
    pub pages: Vec<PageResult>,
    /// File name of the input, used in the header comment and download names.
    pub source_name: String,
    pub stats: ConversionStats,
}

/// PDF document information, available without invoking the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
    pub page_count: usize,
    pub pdf_version: String,
}
