//! End-to-end tests against a real pdfium library and a local Ollama runtime.
//!
//! They read PDFs from `./test_cases/` and run `deepseek-ocr`, so they are
//! gated behind `E2E_ENABLED`.
//!
//! Run with:
//!   ollama pull deepseek-ocr
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture

use ocr2md::{
    convert, convert_to_file, inspect, ConversionConfig, ErrorClass, Ocr2MdError, PageSelection,
};
use std::path::PathBuf;

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip unless `E2E_ENABLED` is set and the file exists.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn e2e_config() -> ConversionConfig {
    ConversionConfig::builder()
        .model_timeout_secs(600)
        .build()
        .expect("valid config")
}

fn assert_markdown_shape(md: &str, context: &str) {
    assert!(
        md.starts_with("<!-- Generated by ocr2md from "),
        "[{context}] missing header comment"
    );
    assert!(md.ends_with("\n\n"), "[{context}] pages end with a blank line");
    for marker in ["<|ref|>", "<|det|>", "<|grounding|>", "\\(", "\\["] {
        assert!(!md.contains(marker), "[{context}] leftover {marker:?}");
    }
    assert!(!md.contains("\n\n\n"), "[{context}] uncollapsed blank lines");
    println!("[{context}] {} bytes", md.len());
}

#[tokio::test]
async fn inspect_reports_page_count() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let meta = inspect(path.to_string_lossy(), &e2e_config())
        .await
        .expect("inspect() should succeed");

    assert_eq!(meta.page_count, 15);
    assert!(!meta.pdf_version.is_empty());
}

#[tokio::test]
async fn inspect_missing_file_is_input_error() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let err = inspect("/definitely/not/a/real/file.pdf", &e2e_config())
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Input);
}

#[tokio::test]
async fn converts_first_page_of_paper() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = e2e_config()
        .to_builder()
        .pages(PageSelection::Single(1))
        .build()
        .expect("valid config");
    let output = convert(path.to_string_lossy(), &config)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.stats.total_pages, 15);
    assert_eq!(output.stats.processed_pages, 1);
    assert_markdown_shape(&output.markdown, "paper p1");
    assert!(
        output.markdown.to_lowercase().contains("attention"),
        "title text should be recognised"
    );
    assert!(
        !output.markdown.contains("<!-- Page "),
        "single page output has no page markers"
    );
}

#[tokio::test]
async fn two_pages_carry_markers_and_write_to_disk() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("irs_form_1040.pdf"));
    let out = tempfile::tempdir().unwrap();
    let md_path = out.path().join("nested/irs.md");

    let stats = convert_to_file(path.to_string_lossy(), &md_path, &e2e_config())
        .await
        .expect("conversion should succeed");

    assert_eq!(stats.processed_pages, 2);
    let md = std::fs::read_to_string(&md_path).unwrap();
    assert_markdown_shape(&md, "irs");
    let first = md.find("<!-- Page 1 -->").expect("page 1 marker");
    let second = md.find("<!-- Page 2 -->").expect("page 2 marker");
    assert!(first < second);
}

#[tokio::test]
async fn raw_output_keeps_model_markup() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("attention_is_all_you_need.pdf"));

    let config = e2e_config()
        .to_builder()
        .pages(PageSelection::Single(1))
        .clean(false)
        .build()
        .expect("valid config");
    let output = convert(path.to_string_lossy(), &config).await.unwrap();

    assert_eq!(output.pages[0].raw, output.pages[0].markdown);
}

#[tokio::test]
async fn text_file_is_rejected_before_the_model_runs() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let txt = dir.path().join("notes.txt");
    std::fs::write(&txt, "hello").unwrap();

    let err = convert(txt.to_string_lossy(), &e2e_config()).await.unwrap_err();
    assert!(matches!(err, Ocr2MdError::UnsupportedFileType { .. }));
    assert_eq!(err.exit_code(), 2);
}
