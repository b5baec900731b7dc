//! Conversion entry points.
//!
//! A conversion is all-or-nothing: pages are recognised in order (up to
//! `concurrency` model calls in flight) and the first failing page aborts the
//! whole document. Page images live in a scratch `TempDir` that is removed
//! when the conversion returns, successfully or not.

use crate::config::ConversionConfig;
use crate::error::Ocr2MdError;
use crate::output::{ConversionOutput, ConversionStats, DocumentMetadata, PageResult};
use crate::pipeline::engine::{self, OcrEngine};
use crate::pipeline::input::{self, InputKind};
use crate::pipeline::postprocess;
use crate::pipeline::render::{self, PageImage};
use crate::progress::ProgressCallback;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info};

/// Convert a PDF or image (path or URL) to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Any failure is fatal; there is no partial output. Model failures on a
/// page come back as [`Ocr2MdError::PageFailed`] naming the page.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let total_start = Instant::now();
    let input_str = input_str.as_ref();
    info!("Starting conversion: {}", input_str);

    // ── Step 1: Resolve and classify input ───────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let path = resolved.path().to_path_buf();
    let kind = input::detect_kind(&path)?;
    let source_name = input::source_name(input_str);

    // ── Step 2: Pick the engine ──────────────────────────────────────────
    let engine = engine::resolve_engine(config)?;

    // ── Step 3: Rasterise or load ────────────────────────────────────────
    let scratch = TempDir::new().map_err(|e| Ocr2MdError::Internal(format!("tempdir: {e}")))?;
    let render_start = Instant::now();
    let (total_pages, pages) = match kind {
        InputKind::Pdf => {
            let rendered = render::render_pdf(&path, config, scratch.path()).await?;
            (rendered.total_pages, rendered.pages)
        }
        InputKind::Image(_) => (1, vec![render::load_image(&path)?]),
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;
    info!("Prepared {} page image(s) in {}ms", pages.len(), render_duration_ms);

    // ── Step 4: Recognise and post-process ───────────────────────────────
    let model_start = Instant::now();
    let results = convert_pages(&pages, engine.as_ref(), config).await?;
    let model_duration_ms = model_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble ─────────────────────────────────────────────────
    let markdown = assemble_document(&results, &source_name, config);
    let stats = ConversionStats {
        total_pages,
        processed_pages: results.len(),
        render_duration_ms,
        model_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Conversion complete: {}/{} pages, {}ms total",
        stats.processed_pages, total_pages, stats.total_duration_ms
    );

    Ok(ConversionOutput {
        markdown,
        pages: results,
        source_name,
        stats,
    })
}

/// Convert an uploaded file held in memory.
///
/// `file_name` is reduced to its base name (see
/// [`input::sanitize_file_name`]) and decides the file type, exactly as for a
/// path on disk.
pub async fn convert_bytes(
    file_name: &str,
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    let dir = TempDir::new().map_err(|e| Ocr2MdError::Internal(format!("tempdir: {e}")))?;
    let path = dir.path().join(input::sanitize_file_name(file_name));
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| Ocr2MdError::Internal(format!("tempfile write: {e}")))?;
    debug!("Staged {} bytes as {}", bytes.len(), path.display());
    // `dir` is dropped (and the upload deleted) when `convert` returns
    convert(path.to_string_lossy(), config).await
}

/// Convert and write the Markdown to `output_path`.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, Ocr2MdError> {
    let output = convert(input_str, config).await?;
    write_markdown(output_path.as_ref(), &output.markdown).await?;
    Ok(output.stats)
}

/// Write `markdown` to `path` atomically (temp file + rename), creating
/// parent directories as needed.
pub async fn write_markdown(path: &Path, markdown: &str) -> Result<(), Ocr2MdError> {
    let write_err = |e| Ocr2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, markdown).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Ocr2MdError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Ocr2MdError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, config))
}

/// Extract PDF metadata without converting content.
///
/// Does not touch the model runtime.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<DocumentMetadata, Ocr2MdError> {
    let input_str = input_str.as_ref();
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    match input::detect_kind(resolved.path())? {
        InputKind::Pdf => render::extract_metadata(resolved.path(), config).await,
        InputKind::Image(_) => Err(Ocr2MdError::InvalidInput {
            input: input_str.to_string(),
            reason: "metadata is only available for PDF files".into(),
        }),
    }
}

/// Run prepared page images through `engine` and post-process each result.
///
/// Results come back in the order of `pages` regardless of `concurrency`.
/// The first failure stops the run; model calls still in flight are dropped.
pub async fn convert_pages(
    pages: &[PageImage],
    engine: &dyn OcrEngine,
    config: &ConversionConfig,
) -> Result<Vec<PageResult>, Ocr2MdError> {
    let total = pages.len();
    let task = PageTask {
        engine,
        prompt: Arc::from(config.prompt.as_str()),
        timeout: Duration::from_secs(config.model_timeout_secs),
        clean: config.clean,
        embed_images: config.embed_images,
        callback: config.progress_callback.clone(),
        total,
    };

    if let Some(cb) = &task.callback {
        cb.on_conversion_start(total);
    }

    // Each page future owns its inputs so the whole conversion stays `Send`
    // for axum handlers and `tokio::spawn`.
    let results: Vec<PageResult> = stream::iter(pages.iter().cloned())
        .map(|page| task.clone().run(page).boxed())
        .buffered(config.concurrency.max(1))
        .try_collect()
        .await?;

    if let Some(cb) = &task.callback {
        cb.on_conversion_complete(total);
    }
    Ok(results)
}

/// Everything one page needs, shared by all pages of a conversion.
#[derive(Clone)]
struct PageTask<'a> {
    engine: &'a dyn OcrEngine,
    prompt: Arc<str>,
    timeout: Duration,
    clean: bool,
    embed_images: bool,
    callback: Option<ProgressCallback>,
    total: usize,
}

impl<'a> PageTask<'a> {
    async fn run(self, page: PageImage) -> Result<PageResult, Ocr2MdError> {
        if let Some(cb) = &self.callback {
            cb.on_page_start(page.page_num, self.total);
        }
        let start = Instant::now();
        let outcome =
            match engine::recognize_page(self.engine, &page, &self.prompt, self.timeout).await {
                Ok(raw) => {
                    postprocess_page(raw, page.path.clone(), self.clean, self.embed_images).await
                }
                Err(e) => Err(e),
            };
        match outcome {
            Ok((raw, markdown)) => {
                if let Some(cb) = &self.callback {
                    cb.on_page_complete(page.page_num, self.total, markdown.len());
                }
                Ok(PageResult {
                    page_num: page.page_num,
                    raw,
                    markdown,
                    duration_ms: start.elapsed().as_millis() as u64,
                })
            }
            Err(e) => {
                if let Some(cb) = &self.callback {
                    cb.on_page_error(page.page_num, self.total, &e.to_string());
                }
                Err(Ocr2MdError::PageFailed {
                    page: page.page_num,
                    source: Box::new(e),
                })
            }
        }
    }
}

/// Figure embedding decodes the page PNG, so it runs on the blocking pool.
async fn postprocess_page(
    raw: String,
    page_path: PathBuf,
    clean: bool,
    embed_images: bool,
) -> Result<(String, String), Ocr2MdError> {
    if !clean {
        return Ok((raw.clone(), raw));
    }
    tokio::task::spawn_blocking(move || {
        let text = if embed_images {
            postprocess::embed_images_from_file(&raw, &page_path)
        } else {
            raw.clone()
        };
        let markdown = postprocess::clean_text(&text);
        (raw, markdown)
    })
    .await
    .map_err(|e| Ocr2MdError::Internal(format!("Post-process task panicked: {}", e)))
}

/// Join page results into the final document.
///
/// Layout: an optional `<!-- Generated by ocr2md from NAME -->` header, then
/// per page an optional `<!-- Page N -->` marker (only for multi-page
/// output), the page text and a blank line.
pub fn assemble_document(
    pages: &[PageResult],
    source_name: &str,
    config: &ConversionConfig,
) -> String {
    let capacity = pages.iter().map(|p| p.markdown.len() + 24).sum::<usize>() + 64;
    let mut doc = String::with_capacity(capacity);

    if config.source_comment {
        doc.push_str(&format!("<!-- Generated by ocr2md from {} -->\n\n", source_name));
    }

    let markers = config.page_markers && pages.len() > 1;
    for page in pages {
        if markers {
            doc.push_str(&format!("<!-- Page {} -->\n\n", page.page_num));
        }
        doc.push_str(&page.markdown);
        doc.push_str("\n\n");
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(page_num: usize, markdown: &str) -> PageResult {
        PageResult {
            page_num,
            raw: markdown.to_string(),
            markdown: markdown.to_string(),
            duration_ms: 0,
        }
    }

    #[test]
    fn single_page_has_no_marker() {
        let doc = assemble_document(
            &[result(1, "# Hello")],
            "scan.png",
            &ConversionConfig::default(),
        );
        assert_eq!(doc, "<!-- Generated by ocr2md from scan.png -->\n\n# Hello\n\n");
    }

    #[test]
    fn multi_page_has_markers_in_order() {
        let doc = assemble_document(
            &[result(1, "one"), result(2, "two"), result(4, "four")],
            "doc.pdf",
            &ConversionConfig::default(),
        );
        assert_eq!(
            doc,
            "<!-- Generated by ocr2md from doc.pdf -->\n\n\
             <!-- Page 1 -->\n\none\n\n\
             <!-- Page 2 -->\n\ntwo\n\n\
             <!-- Page 4 -->\n\nfour\n\n"
        );
    }

    #[test]
    fn header_and_markers_can_be_disabled() {
        let config = ConversionConfig::builder()
            .source_comment(false)
            .page_markers(false)
            .build()
            .unwrap();
        let doc = assemble_document(&[result(1, "a"), result(2, "b")], "x.pdf", &config);
        assert_eq!(doc, "a\n\nb\n\n");
    }

    #[tokio::test]
    async fn write_markdown_is_atomic_and_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("nested/dir/out.md");
        write_markdown(&out, "# done\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "# done\n");
        assert!(!out.with_extension("md.tmp").exists());
    }

    struct Echo;

    #[async_trait::async_trait]
    impl OcrEngine for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn recognize(&self, page: &PageImage, _: &str) -> Result<String, Ocr2MdError> {
            Ok(format!("page {}", page.page_num))
        }
    }

    #[tokio::test]
    async fn conversions_run_on_spawned_tasks() {
        let tmp = tempfile::tempdir().unwrap();
        let png = tmp.path().join("scan.png");
        image::RgbImage::new(4, 4).save(&png).unwrap();
        let bytes = std::fs::read(&png).unwrap();
        let config = ConversionConfig::builder()
            .engine(Arc::new(Echo))
            .build()
            .unwrap();

        let from_bytes = {
            let config = config.clone();
            tokio::spawn(async move { convert_bytes("scan.png", &bytes, &config).await })
        };
        let from_path = tokio::spawn(async move {
            convert(png.to_string_lossy(), &config).await
        });

        let a = from_bytes.await.unwrap().unwrap();
        let b = from_path.await.unwrap().unwrap();
        assert_eq!(a.pages[0].markdown, "page 1");
        assert_eq!(b.pages[0].markdown, "page 1");
    }

    #[tokio::test]
    async fn convert_missing_file() {
        let err = convert("/nonexistent/input.pdf", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Ocr2MdError::FileNotFound { .. }));
        assert_eq!(err.exit_code(), 2);
    }
}
