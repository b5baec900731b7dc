//! Configuration types for document-to-Markdown conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. The three front ends (CLI, HTTP API,
//! web UI) share one config value and only override per-request fields such
//! as the DPI, prompt and cleaning flag.

use crate::error::Ocr2MdError;
use crate::pipeline::engine::OcrEngine;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_PROMPT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lowest accepted rendering DPI.
pub const MIN_DPI: u32 = 72;
/// Highest accepted rendering DPI.
pub const MAX_DPI: u32 = 600;
/// Default model tag served by the local runtime.
pub const DEFAULT_MODEL: &str = "deepseek-ocr";

/// Configuration for a conversion.
///
/// # Example
/// ```rust
/// use ocr2md::{Backend, ConversionConfig};
///
/// let config = ConversionConfig::builder()
///     .dpi(300)
///     .backend(Backend::Provider)
///     .clean(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Rendering DPI for PDF pages. Range: 72–600. Default: 200.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 4096.
    ///
    /// Applied after the DPI scale so a poster-sized page cannot exhaust memory.
    pub max_rendered_pixels: u32,

    /// Prompt sent alongside every page image.
    pub prompt: String,

    /// Strip marker tokens and rewrite LaTeX delimiters. Default: true.
    pub clean: bool,

    /// Replace `image` reference regions with cropped, inlined PNGs. Default: true.
    ///
    /// Only takes effect when `clean` is set, since the regions are located
    /// through the marker tokens that cleaning removes.
    pub embed_images: bool,

    /// Which model runtime interface to use. Default: [`Backend::OllamaCli`].
    pub backend: Backend,

    /// Model tag. Default: `deepseek-ocr`.
    pub model: String,

    /// Executable used by [`Backend::OllamaCli`]. Default: `ollama`.
    pub ollama_bin: PathBuf,

    /// edgequake-llm provider name used by [`Backend::Provider`]. Default: `ollama`.
    pub provider_name: String,

    /// Pre-constructed engine. Takes precedence over `backend`.
    pub engine: Option<Arc<dyn OcrEngine>>,

    /// Sampling temperature ([`Backend::Provider`] only). Default: 0.0.
    pub temperature: f32,

    /// Maximum generated tokens per page ([`Backend::Provider`] only). Default: 8192.
    pub max_tokens: usize,

    /// Page selection for PDFs. Default: all pages.
    pub pages: PageSelection,

    /// Emit `<!-- Page N -->` before each page of multi-page output. Default: true.
    pub page_markers: bool,

    /// Emit the `<!-- Generated by ocr2md from NAME -->` header. Default: true.
    pub source_comment: bool,

    /// Model calls in flight at once. Output order is unaffected. Default: 1.
    ///
    /// A local runtime usually serialises requests on one GPU anyway; raise
    /// this only for runtimes that batch.
    pub concurrency: usize,

    /// Per-page wall-clock limit on a single model call, in seconds. Default: 600.
    pub model_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Allow fetching PDFium on first use when it is not installed. Default: true.
    pub fetch_pdfium: bool,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            max_rendered_pixels: 4096,
            prompt: DEFAULT_PROMPT.to_string(),
            clean: true,
            embed_images: true,
            backend: Backend::default(),
            model: DEFAULT_MODEL.to_string(),
            ollama_bin: PathBuf::from("ollama"),
            provider_name: "ollama".to_string(),
            engine: None,
            temperature: 0.0,
            max_tokens: 8192,
            pages: PageSelection::default(),
            page_markers: true,
            source_comment: true,
            concurrency: 1,
            model_timeout_secs: 600,
            download_timeout_secs: 120,
            fetch_pdfium: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("prompt", &self.prompt)
            .field("clean", &self.clean)
            .field("embed_images", &self.embed_images)
            .field("backend", &self.backend)
            .field("model", &self.model)
            .field("ollama_bin", &self.ollama_bin)
            .field("provider_name", &self.provider_name)
            .field("engine", &self.engine.as_ref().map(|e| e.name().to_string()))
            .field("pages", &self.pages)
            .field("page_markers", &self.page_markers)
            .field("concurrency", &self.concurrency)
            .field("model_timeout_secs", &self.model_timeout_secs)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Continue building from an existing config (per-request overrides).
    pub fn to_builder(&self) -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: self.clone(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    pub fn clean(mut self, v: bool) -> Self {
        self.config.clean = v;
        self
    }

    pub fn embed_images(mut self, v: bool) -> Self {
        self.config.embed_images = v;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn ollama_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.ollama_bin = bin.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = name.into();
        self
    }

    pub fn engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.engine = Some(engine);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_markers(mut self, v: bool) -> Self {
        self.config.page_markers = v;
        self
    }

    pub fn source_comment(mut self, v: bool) -> Self {
        self.config.source_comment = v;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.config.model_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn fetch_pdfium(mut self, v: bool) -> Self {
        self.config.fetch_pdfium = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Ocr2MdError> {
        let c = &self.config;
        if !(MIN_DPI..=MAX_DPI).contains(&c.dpi) {
            return Err(Ocr2MdError::InvalidConfig(format!(
                "DPI must be {MIN_DPI}–{MAX_DPI}, got {}",
                c.dpi
            )));
        }
        if c.prompt.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig("Prompt must not be empty".into()));
        }
        if c.model.trim().is_empty() {
            return Err(Ocr2MdError::InvalidConfig("Model must not be empty".into()));
        }
        if c.model_timeout_secs == 0 {
            return Err(Ocr2MdError::InvalidConfig(
                "Model timeout must be at least 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the local model runtime is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Spawn `ollama run MODEL` once per page (default).
    #[default]
    OllamaCli,
    /// Call a local HTTP runtime through an edgequake-llm provider.
    Provider,
}

/// Specifies which pages of a PDF to convert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageSelection {
    /// Convert all pages (default).
    #[default]
    All,
    /// Convert a single page (1-indexed).
    Single(usize),
    /// Convert a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Convert specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

impl std::str::FromStr for PageSelection {
    type Err = Ocr2MdError;

    /// Parse `all`, `5`, `3-15` or `1,3,5`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let invalid = |reason: String| Ocr2MdError::InvalidConfig(format!("pages '{s}': {reason}"));
        let page = |p: &str| -> Result<usize, Ocr2MdError> {
            match p.trim().parse::<usize>() {
                Ok(0) => Err(invalid("pages are 1-indexed".into())),
                Ok(n) => Ok(n),
                Err(_) => Err(invalid(format!("'{}' is not a page number", p.trim()))),
            }
        };

        if s == "all" {
            return Ok(PageSelection::All);
        }
        if let Some((start, end)) = s.split_once('-') {
            let (start, end) = (page(start)?, page(end)?);
            if start > end {
                return Err(invalid("start must be <= end".into()));
            }
            return Ok(PageSelection::Range(start, end));
        }
        if s.contains(',') {
            let pages = s.split(',').map(page).collect::<Result<Vec<_>, _>>()?;
            return Ok(PageSelection::Set(pages));
        }
        Ok(PageSelection::Single(page(&s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ConversionConfig::default();
        assert_eq!(c.dpi, 200);
        assert!(c.clean);
        assert!(c.embed_images);
        assert_eq!(c.model, "deepseek-ocr");
        assert_eq!(c.backend, Backend::OllamaCli);
        assert_eq!(c.prompt, DEFAULT_PROMPT);
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn builder_rejects_out_of_range_dpi() {
        for dpi in [10, MIN_DPI - 1, MAX_DPI + 1, 10_000] {
            let err = ConversionConfig::builder().dpi(dpi).build().unwrap_err();
            assert!(matches!(err, Ocr2MdError::InvalidConfig(_)), "dpi {dpi}: {err:?}");
        }
        for dpi in [MIN_DPI, MAX_DPI] {
            assert_eq!(ConversionConfig::builder().dpi(dpi).build().unwrap().dpi, dpi);
        }
    }

    #[test]
    fn builder_rejects_blank_prompt() {
        let err = ConversionConfig::builder().prompt("   ").build().unwrap_err();
        assert!(matches!(err, Ocr2MdError::InvalidConfig(_)));
    }

    #[test]
    fn to_builder_keeps_existing_fields() {
        let base = ConversionConfig::builder().model("custom-ocr").build().unwrap();
        let derived = base.to_builder().dpi(300).build().unwrap();
        assert_eq!(derived.model, "custom-ocr");
        assert_eq!(derived.dpi, 300);
    }

    #[test]
    fn page_selection_to_indices() {
        assert_eq!(PageSelection::All.to_indices(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(PageSelection::Single(3).to_indices(5), vec![2]);
        assert_eq!(PageSelection::Single(6).to_indices(5), Vec::<usize>::new());
        assert_eq!(PageSelection::Range(2, 4).to_indices(5), vec![1, 2, 3]);
        assert_eq!(PageSelection::Range(3, 10).to_indices(4), vec![2, 3]);
        assert_eq!(PageSelection::Set(vec![3, 1, 3]).to_indices(5), vec![0, 2]);
    }

    #[test]
    fn page_selection_parses() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("4".parse::<PageSelection>().unwrap(), PageSelection::Single(4));
        assert_eq!(
            "2-6".parse::<PageSelection>().unwrap(),
            PageSelection::Range(2, 6)
        );
        assert_eq!(
            "1, 3,5".parse::<PageSelection>().unwrap(),
            PageSelection::Set(vec![1, 3, 5])
        );
        assert!("0".parse::<PageSelection>().is_err());
        assert!("5-2".parse::<PageSelection>().is_err());
        assert!("x".parse::<PageSelection>().is_err());
    }
}
