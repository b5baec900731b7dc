//! Error type for the ocr2md library.
//!
//! A conversion either produces the whole document or fails: there is no
//! per-page partial result. Every failure surfaces as one [`Ocr2MdError`],
//! which front ends translate into a process exit code ([`Ocr2MdError::exit_code`])
//! or an HTTP status.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors returned by the ocr2md library.
#[derive(Debug, Error)]
pub enum Ocr2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists but holds no bytes.
    #[error("Input file is empty: '{path}'")]
    EmptyFile { path: PathBuf },

    /// Extension is neither PDF nor a supported raster format.
    #[error("Unsupported file type '{extension}' for '{path}'\nSupported: .pdf, .png, .jpg, .jpeg")]
    UnsupportedFileType { path: PathBuf, extension: String },

    /// Extension and content disagree (e.g. `scan.png` that is really HTML).
    #[error("'{path}' is not a valid {expected} file (first bytes: {magic:02x?})")]
    NotAValidFile {
        path: PathBuf,
        expected: &'static str,
        magic: Vec<u8>,
    },

    /// The input string is not a usable file path or URL.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF is encrypted; passwords are not supported.
    #[error("PDF '{path}' is encrypted and cannot be rasterised")]
    PasswordRequired { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("Page selection matches no page (document has {total} pages)")]
    PageOutOfRange { total: usize },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// A page or input image could not be decoded or re-encoded.
    #[error("Image processing failed for '{path}': {detail}")]
    ImageFailed { path: PathBuf, detail: String },

    // ── External dependencies ─────────────────────────────────────────────
    /// A required external program or library is not installed.
    #[error("Missing dependency '{name}': {hint}")]
    MissingDependency { name: String, hint: String },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The model runtime ran but reported failure.
    #[error("{engine} failed{}: {detail}", .exit_code.map(|c| format!(" (exit {c})")).unwrap_or_default())]
    EngineFailed {
        engine: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// The model answered with nothing but whitespace.
    #[error("Model returned empty output for page {page}")]
    EmptyModelOutput { page: usize },

    /// The model did not answer within the configured limit.
    #[error("Model call timed out after {}s on page {page}", .elapsed.as_secs())]
    ModelTimeout { page: usize, elapsed: Duration },

    /// Wrapper recording which page a model failure belongs to.
    #[error("Page {page}: {source}")]
    PageFailed {
        page: usize,
        #[source]
        source: Box<Ocr2MdError>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad classification used by the front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller supplied something unusable.
    Input,
    /// The external model (or its runtime) failed.
    Model,
    /// Rasterisation, dependency, I/O or internal failure.
    Other,
}

impl Ocr2MdError {
    /// Innermost error, looking through [`Ocr2MdError::PageFailed`].
    pub fn root(&self) -> &Ocr2MdError {
        match self {
            Ocr2MdError::PageFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn class(&self) -> ErrorClass {
        use Ocr2MdError::*;
        match self.root() {
            FileNotFound { .. }
            | PermissionDenied { .. }
            | EmptyFile { .. }
            | UnsupportedFileType { .. }
            | NotAValidFile { .. }
            | InvalidInput { .. }
            | DownloadFailed { .. }
            | DownloadTimeout { .. }
            | PageOutOfRange { .. } => ErrorClass::Input,
            EngineFailed { .. } | EmptyModelOutput { .. } | ModelTimeout { .. } => {
                ErrorClass::Model
            }
            MissingDependency { name, .. } if name != crate::pipeline::render::PDFIUM => {
                ErrorClass::Model
            }
            _ => ErrorClass::Other,
        }
    }

    /// Process exit code for the CLI: 2 input, 3 model, 1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Input => 2,
            ErrorClass::Model => 3,
            ErrorClass::Other => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_failed_display_with_exit_code() {
        let e = Ocr2MdError::EngineFailed {
            engine: "ollama".into(),
            exit_code: Some(1),
            detail: "model not found".into(),
        };
        assert_eq!(e.to_string(), "ollama failed (exit 1): model not found");
    }

    #[test]
    fn engine_failed_display_without_exit_code() {
        let e = Ocr2MdError::EngineFailed {
            engine: "ollama-http".into(),
            exit_code: None,
            detail: "connection refused".into(),
        };
        assert_eq!(e.to_string(), "ollama-http failed: connection refused");
    }

    #[test]
    fn page_failed_wraps_source() {
        let e = Ocr2MdError::PageFailed {
            page: 4,
            source: Box::new(Ocr2MdError::EmptyModelOutput { page: 4 }),
        };
        assert!(e.to_string().starts_with("Page 4:"), "got: {e}");
        assert!(matches!(e.root(), Ocr2MdError::EmptyModelOutput { page: 4 }));
        assert_eq!(e.exit_code(), 3);
    }

    #[test]
    fn exit_codes_by_class() {
        let missing = Ocr2MdError::FileNotFound {
            path: "nope.pdf".into(),
        };
        assert_eq!(missing.exit_code(), 2);

        let unsupported = Ocr2MdError::UnsupportedFileType {
            path: "notes.docx".into(),
            extension: "docx".into(),
        };
        assert_eq!(unsupported.exit_code(), 2);

        let no_ollama = Ocr2MdError::MissingDependency {
            name: "ollama".into(),
            hint: "install it".into(),
        };
        assert_eq!(no_ollama.exit_code(), 3);

        let no_pdfium = Ocr2MdError::MissingDependency {
            name: "pdfium".into(),
            hint: "set PDFIUM_LIB_PATH".into(),
        };
        assert_eq!(no_pdfium.exit_code(), 1);

        let timeout = Ocr2MdError::ModelTimeout {
            page: 2,
            elapsed: Duration::from_secs(30),
        };
        assert!(timeout.to_string().contains("30s"));
        assert_eq!(timeout.exit_code(), 3);
    }
}
