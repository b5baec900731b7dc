//! Input resolution: normalise a path or URL to a local file and decide
//! whether it is a PDF or a raster image.
//!
//! URL inputs are downloaded into a `TempDir` that lives as long as the
//! returned [`ResolvedInput`]. The file type is taken from the extension and
//! then confirmed against the magic bytes, so a renamed HTML error page fails
//! here with a readable message instead of deep inside pdfium or the model.

use crate::error::Ocr2MdError;
use image::ImageFormat;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8] = b"%PDF";
const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];

/// What kind of document a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image(ImageFormat),
}

impl InputKind {
    /// Classify by extension alone (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(InputKind::Pdf),
            "png" => Some(InputKind::Image(ImageFormat::Png)),
            "jpg" | "jpeg" => Some(InputKind::Image(ImageFormat::Jpeg)),
            _ => None,
        }
    }

    fn magic(self) -> &'static [u8] {
        match self {
            InputKind::Pdf => PDF_MAGIC,
            InputKind::Image(ImageFormat::Png) => PNG_MAGIC,
            InputKind::Image(_) => JPEG_MAGIC,
        }
    }

    fn label(self) -> &'static str {
        match self {
            InputKind::Pdf => "PDF",
            InputKind::Image(ImageFormat::Png) => "PNG",
            InputKind::Image(_) => "JPEG",
        }
    }
}

/// Guess the extension of a buffer from its leading bytes.
pub fn sniff_extension(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PDF_MAGIC) {
        Some("pdf")
    } else if bytes.starts_with(PNG_MAGIC) {
        Some("png")
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some("jpg")
    } else {
        None
    }
}

/// The resolved input: either a local path or a downloaded temp file.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; the body was saved in a temp directory that is
    /// removed when this value is dropped.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a user-supplied path or URL to a local file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, Ocr2MdError> {
    if input.trim().is_empty() {
        return Err(Ocr2MdError::InvalidInput {
            input: input.to_string(),
            reason: "empty path".into(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        Ok(ResolvedInput::Local(PathBuf::from(input)))
    }
}

/// Decide whether `path` is a PDF or a supported image, checking that it is
/// readable, non-empty, and that its content matches its extension.
pub fn detect_kind(path: &Path) -> Result<InputKind, Ocr2MdError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Ocr2MdError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(_) => {
            return Err(Ocr2MdError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    };
    if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
        return Err(Ocr2MdError::InvalidInput {
            input: path.display().to_string(),
            reason: "is a directory".into(),
        });
    }

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_default();
    let kind = InputKind::from_extension(&extension).ok_or_else(|| {
        Ocr2MdError::UnsupportedFileType {
            path: path.to_path_buf(),
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension.clone()
            },
        }
    })?;

    let mut head = Vec::with_capacity(8);
    file.by_ref()
        .take(8)
        .read_to_end(&mut head)
        .map_err(|_| Ocr2MdError::PermissionDenied {
            path: path.to_path_buf(),
        })?;
    if head.is_empty() {
        return Err(Ocr2MdError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    if !head.starts_with(kind.magic()) {
        return Err(Ocr2MdError::NotAValidFile {
            path: path.to_path_buf(),
            expected: kind.label(),
            magic: head,
        });
    }

    debug!("{} detected as {:?}", path.display(), kind);
    Ok(kind)
}

/// File name to report for an input (last URL segment or path file name).
pub fn source_name(input: &str) -> String {
    let candidate = if is_url(input) {
        reqwest::Url::parse(input)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut s| s.next_back().map(str::to_string))
            })
            .unwrap_or_default()
    } else {
        Path::new(input)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    if candidate.is_empty() {
        "document".to_string()
    } else {
        candidate
    }
}

/// Reduce an untrusted (uploaded or downloaded) file name to a bare, safe
/// base name. Directory components and leading dots are dropped.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .trim_start_matches('.')
        .to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// Download a URL into a temporary directory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Ocr2MdError> {
    info!("Downloading {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_send_err = |e: reqwest::Error| {
        if e.is_timeout() {
            Ocr2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Ocr2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_send_err)?;
    if !response.status().is_success() {
        return Err(Ocr2MdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }
    let bytes = response.bytes().await.map_err(map_send_err)?;

    // Keep the URL's name when it carries a known extension; otherwise name
    // the file after its content so detection still works.
    let mut filename = sanitize_file_name(&source_name(url));
    let has_known_ext = Path::new(&filename)
        .extension()
        .and_then(|e| InputKind::from_extension(&e.to_string_lossy()))
        .is_some();
    if !has_known_ext {
        if let Some(ext) = sniff_extension(&bytes) {
            filename = format!("{filename}.{ext}");
        }
    }

    let temp_dir = TempDir::new().map_err(|e| Ocr2MdError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(&filename);
    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| Ocr2MdError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to {}", bytes.len(), file_path.display());
    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, bytes).unwrap();
        p
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
    }

    #[test]
    fn detects_pdf_and_images() {
        let tmp = tempfile::tempdir().unwrap();
        let pdf = write(tmp.path(), "a.PDF", b"%PDF-1.7\n");
        let png = write(tmp.path(), "b.png", PNG_MAGIC);
        let jpg = write(tmp.path(), "c.jpeg", &[0xff, 0xd8, 0xff, 0xe0]);
        assert_eq!(detect_kind(&pdf).unwrap(), InputKind::Pdf);
        assert_eq!(
            detect_kind(&png).unwrap(),
            InputKind::Image(ImageFormat::Png)
        );
        assert_eq!(
            detect_kind(&jpg).unwrap(),
            InputKind::Image(ImageFormat::Jpeg)
        );
    }

    #[test]
    fn rejects_unsupported_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let docx = write(tmp.path(), "notes.docx", b"PK\x03\x04");
        let err = detect_kind(&docx).unwrap_err();
        assert!(
            matches!(err, Ocr2MdError::UnsupportedFileType { ref extension, .. } if extension == "docx"),
            "got: {err}"
        );
    }

    #[test]
    fn rejects_content_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let fake = write(tmp.path(), "scan.png", b"<html>nope</html>");
        let err = detect_kind(&fake).unwrap_err();
        assert!(matches!(err, Ocr2MdError::NotAValidFile { expected: "PNG", .. }));
        assert!(err.to_string().contains("not a valid PNG"));
    }

    #[test]
    fn rejects_missing_and_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("ghost.pdf");
        assert!(matches!(
            detect_kind(&missing),
            Err(Ocr2MdError::FileNotFound { .. })
        ));
        let empty = write(tmp.path(), "empty.pdf", b"");
        assert!(matches!(
            detect_kind(&empty),
            Err(Ocr2MdError::EmptyFile { .. })
        ));
    }

    #[test]
    fn sniffs_extensions() {
        assert_eq!(sniff_extension(b"%PDF-1.4"), Some("pdf"));
        assert_eq!(sniff_extension(PNG_MAGIC), Some("png"));
        assert_eq!(sniff_extension(&[0xff, 0xd8, 0xff, 0xdb]), Some("jpg"));
        assert_eq!(sniff_extension(b"GIF89a"), None);
    }

    #[test]
    fn source_names() {
        assert_eq!(source_name("/data/in/report.pdf"), "report.pdf");
        assert_eq!(source_name("https://host/papers/x.pdf?dl=1"), "x.pdf");
        assert_eq!(source_name("https://host/"), "document");
    }

    #[test]
    fn sanitizes_upload_names() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\scan.png"), "scan.png");
        assert_eq!(sanitize_file_name(".hidden.pdf"), "hidden.pdf");
        assert_eq!(sanitize_file_name(""), "upload");
        assert_eq!(sanitize_file_name("/"), "upload");
    }
}
