//! # pdfium-loader
//!
//! Find a usable PDFium shared library for `pdfium-render`, fetching it once
//! into a per-user cache when nothing is installed.
//!
//! Resolution order used by [`ensure_library`]:
//!
//! 1. `PDFIUM_LIB_PATH`: explicit path to `libpdfium.{so,dylib}` / `pdfium.dll`.
//! 2. The cache directory, `{cache}/ocr2md/pdfium-{VERSION}/`
//!    (override the base with `OCR2MD_PDFIUM_CACHE_DIR`).
//! 3. A download of the matching archive from
//!    [bblanchon/pdfium-binaries](https://github.com/bblanchon/pdfium-binaries),
//!    unless [`FetchPolicy::Never`] is requested.
//!
//! [`bind`] additionally falls back to the system library search path when the
//! policy forbids downloading and nothing was found in steps 1–2.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use pdfium_render::prelude::Pdfium;
use thiserror::Error;
use tracing::{debug, info, warn};

/// pdfium-binaries release tag (`chromium/{PDFIUM_VERSION}`).
pub const PDFIUM_VERSION: &str = "7690";

/// Environment variable naming an existing PDFium library.
pub const LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Environment variable overriding the cache base directory.
pub const CACHE_DIR_ENV: &str = "OCR2MD_PDFIUM_CACHE_DIR";

const RELEASE_URL: &str = "https://github.com/bblanchon/pdfium-binaries/releases/download";

/// Errors raised while locating, fetching or binding PDFium.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("no prebuilt PDFium for {os}/{arch}; set {LIB_PATH_ENV} to a local build")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("PDFium library not found (set {LIB_PATH_ENV} or allow the one-time download)")]
    NotFound,

    #[error("cannot prepare cache directory '{path}': {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDFium download failed: {0}")]
    Download(String),

    #[error("PDFium archive is unusable: {0}")]
    Extract(String),

    #[error("cannot load PDFium from '{path}': {reason}")]
    Bind { path: PathBuf, reason: String },
}

/// Whether [`ensure_library`] may reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Download into the cache when the library is missing (default).
    #[default]
    IfMissing,
    /// Only use what is already on disk.
    Never,
}

/// One row of the prebuilt-archive table.
#[derive(Debug, Clone, Copy)]
struct Prebuilt {
    os: &'static str,
    arch: &'static str,
    archive: &'static str,
    member: &'static str,
    file_name: &'static str,
}

const PREBUILT: &[Prebuilt] = &[
    Prebuilt { os: "linux", arch: "x86_64", archive: "pdfium-linux-x64.tgz", member: "lib/libpdfium.so", file_name: "libpdfium.so" },
    Prebuilt { os: "linux", arch: "aarch64", archive: "pdfium-linux-arm64.tgz", member: "lib/libpdfium.so", file_name: "libpdfium.so" },
    Prebuilt { os: "macos", arch: "aarch64", archive: "pdfium-mac-arm64.tgz", member: "lib/libpdfium.dylib", file_name: "libpdfium.dylib" },
    Prebuilt { os: "macos", arch: "x86_64", archive: "pdfium-mac-x64.tgz", member: "lib/libpdfium.dylib", file_name: "libpdfium.dylib" },
    Prebuilt { os: "windows", arch: "x86_64", archive: "pdfium-win-x64.tgz", member: "bin/pdfium.dll", file_name: "pdfium.dll" },
    Prebuilt { os: "windows", arch: "aarch64", archive: "pdfium-win-arm64.tgz", member: "bin/pdfium.dll", file_name: "pdfium.dll" },
];

fn prebuilt_for(os: &str, arch: &str) -> Result<Prebuilt, LoaderError> {
    PREBUILT
        .iter()
        .find(|p| p.os == os && p.arch == arch)
        .copied()
        .ok_or_else(|| LoaderError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}

fn current_prebuilt() -> Result<Prebuilt, LoaderError> {
    prebuilt_for(std::env::consts::OS, std::env::consts::ARCH)
}

/// Directory holding the cached library for [`PDFIUM_VERSION`].
pub fn cache_dir() -> PathBuf {
    let base = match std::env::var_os(CACHE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
            .unwrap_or_else(std::env::temp_dir)
            .join("ocr2md"),
    };
    base.join(format!("pdfium-{PDFIUM_VERSION}"))
}

/// Path of an already-available library, without touching the network.
pub fn locate() -> Option<PathBuf> {
    if let Some(p) = std::env::var_os(LIB_PATH_ENV).map(PathBuf::from) {
        if p.is_file() {
            return Some(p);
        }
        warn!("{} points to '{}', which does not exist", LIB_PATH_ENV, p.display());
    }
    let prebuilt = current_prebuilt().ok()?;
    let cached = cache_dir().join(prebuilt.file_name);
    cached.is_file().then_some(cached)
}

static RESOLVED: OnceLock<PathBuf> = OnceLock::new();

/// Make sure a PDFium library exists on disk and return its path.
///
/// The first successful resolution is memoised for the process lifetime.
pub fn ensure_library(policy: FetchPolicy) -> Result<PathBuf, LoaderError> {
    if let Some(p) = RESOLVED.get() {
        return Ok(p.clone());
    }
    let path = match locate() {
        Some(p) => p,
        None if policy == FetchPolicy::Never => return Err(LoaderError::NotFound),
        None => fetch_into_cache(&current_prebuilt()?)?,
    };
    debug!("using PDFium at {}", path.display());
    Ok(RESOLVED.get_or_init(|| path).clone())
}

/// Bind `pdfium-render` to a library resolved according to `policy`.
pub fn bind(policy: FetchPolicy) -> Result<Pdfium, LoaderError> {
    match ensure_library(policy) {
        Ok(path) => bind_path(&path),
        Err(LoaderError::NotFound) => Pdfium::bind_to_system_library()
            .map(Pdfium::new)
            .map_err(|_| LoaderError::NotFound),
        Err(e) => Err(e),
    }
}

/// Bind to the library at `path`.
pub fn bind_path(path: &Path) -> Result<Pdfium, LoaderError> {
    Pdfium::bind_to_library(path)
        .map(Pdfium::new)
        .map_err(|e| LoaderError::Bind {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn fetch_into_cache(prebuilt: &Prebuilt) -> Result<PathBuf, LoaderError> {
    let dir = cache_dir();
    std::fs::create_dir_all(&dir).map_err(|source| LoaderError::CacheDir {
        path: dir.clone(),
        source,
    })?;

    let url = format!(
        "{RELEASE_URL}/chromium%2F{PDFIUM_VERSION}/{}",
        prebuilt.archive
    );
    info!("fetching PDFium {} from {}", PDFIUM_VERSION, url);
    let archive = download(&url)?;

    // Unpack next to the final name so a half-written file never looks cached.
    let dest = dir.join(prebuilt.file_name);
    let partial = dir.join(format!("{}.partial", prebuilt.file_name));
    unpack_member(&archive, prebuilt.member, &partial)?;
    std::fs::rename(&partial, &dest).map_err(|source| LoaderError::CacheDir {
        path: dest.clone(),
        source,
    })?;
    info!("PDFium cached at {}", dest.display());
    Ok(dest)
}

fn download(url: &str) -> Result<Vec<u8>, LoaderError> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("pdfium-loader/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .map_err(|e| LoaderError::Download(e.to_string()))?;

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| LoaderError::Download(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(LoaderError::Download(format!(
            "HTTP {} for {url}",
            response.status()
        )));
    }

    let mut buf = Vec::with_capacity(response.content_length().unwrap_or(0) as usize);
    response
        .read_to_end(&mut buf)
        .map_err(|e| LoaderError::Download(format!("read error: {e}")))?;
    debug!("downloaded {} bytes", buf.len());
    Ok(buf)
}

/// Copy `member` out of a `.tgz` archive into `dest`.
fn unpack_member(archive: &[u8], member: &str, dest: &Path) -> Result<(), LoaderError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut tarball = Archive::new(GzDecoder::new(archive));
    let entries = tarball
        .entries()
        .map_err(|e| LoaderError::Extract(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| LoaderError::Extract(e.to_string()))?;
        let is_member = entry
            .path()
            .map(|p| p.to_string_lossy().trim_start_matches("./") == member)
            .map_err(|e| LoaderError::Extract(e.to_string()))?;
        if is_member {
            entry
                .unpack(dest)
                .map_err(|e| LoaderError::Extract(format!("unpack {member}: {e}")))?;
            return Ok(());
        }
    }
    Err(LoaderError::Extract(format!("'{member}' missing from archive")))
}
