//! HTTP front ends: a plain-text conversion API and a small upload UI.
//!
//! Both accept the same multipart form (`file`, `dpi`, `prompt`, `clean`)
//! and run the same library conversion; they differ only in how the result
//! and errors are rendered.
//!
//! | Route             | Response                                  |
//! |-------------------|-------------------------------------------|
//! | `POST /convert`   | `text/plain` Markdown, JSON `{"detail"}` on error |
//! | `GET /`           | HTML upload form                          |
//! | `POST /ui/convert`| HTML result page (source, preview, download) |
//! | `GET /healthz`    | JSON engine status                        |

mod ui;

use crate::config::{ConversionConfig, MAX_DPI, MIN_DPI};
use crate::convert::convert_bytes;
use crate::error::Ocr2MdError;
use crate::pipeline::engine::{resolve_engine, OcrEngine};
use crate::prompts;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const HEALTHZ_PATH: &str = "/healthz";

/// Default upload limit in megabytes.
pub const DEFAULT_MAX_UPLOAD_MB: usize = 64;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("listen address must not be empty")]
    EmptyListenAddr,
    #[error("invalid listen address {address}: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("engine setup failed: {0}")]
    Engine(#[from] Ocr2MdError),
    #[error("axum server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

/// Shared per-process state: the base config and the engine built from it.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ConversionConfig>,
    engine: Arc<dyn OcrEngine>,
}

impl AppState {
    /// Resolve the engine once so every request reuses it.
    pub fn new(config: ConversionConfig) -> Result<Self, Ocr2MdError> {
        let engine = resolve_engine(&config)?;
        let config = config.to_builder().engine(Arc::clone(&engine)).build()?;
        Ok(Self {
            config: Arc::new(config),
            engine,
        })
    }
}

/// Build the application router.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/convert", post(api_convert))
        .route("/ui/convert", post(ui_convert))
        .route(HEALTHZ_PATH, get(healthz))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Listen on `listen_addr` until Ctrl-C or SIGTERM.
pub async fn serve(
    config: ConversionConfig,
    listen_addr: &str,
    max_upload_bytes: usize,
) -> Result<(), ServerError> {
    let addr = parse_listen_addr(listen_addr)?;
    let state = AppState::new(config)?;
    if let Err(e) = state.engine.check().await {
        warn!("{} engine not ready: {}", state.engine.name(), e);
    }
    let app = build_router(state, max_upload_bytes);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            address: addr.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr().unwrap_or(addr);
    info!(%local_addr, "ocr2md server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })?;

    info!("server shutdown complete");
    Ok(())
}

fn parse_listen_addr(addr: &str) -> Result<SocketAddr, ServerError> {
    let trimmed = addr.trim();
    if trimmed.is_empty() {
        return Err(ServerError::EmptyListenAddr);
    }
    trimmed
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: trimmed.to_string(),
            source,
        })
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to capture SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = sigterm => info!("received SIGTERM, shutting down"),
    }
}

// ── Form handling ────────────────────────────────────────────────────────────

/// A failed request: status plus a human-readable reason.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: &self.detail })).into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self {
            status: e.status(),
            detail: format!("Invalid multipart body: {}", e.body_text()),
        }
    }
}

impl From<Ocr2MdError> for ApiError {
    fn from(e: Ocr2MdError) -> Self {
        Self {
            status: status_for(&e),
            detail: e.to_string(),
        }
    }
}

/// HTTP status for a conversion failure.
pub fn status_for(err: &Ocr2MdError) -> StatusCode {
    use Ocr2MdError::*;
    match err.root() {
        UnsupportedFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        FileNotFound { .. }
        | EmptyFile { .. }
        | NotAValidFile { .. }
        | InvalidInput { .. }
        | CorruptPdf { .. }
        | PasswordRequired { .. }
        | PageOutOfRange { .. }
        | ImageFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        InvalidConfig(_) => StatusCode::BAD_REQUEST,
        EngineFailed { .. } | EmptyModelOutput { .. } => StatusCode::BAD_GATEWAY,
        MissingDependency { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ModelTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Parsed multipart form.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    dpi: Option<u32>,
    prompt: Option<String>,
    clean: Option<bool>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let file_name = field.file_name().unwrap_or_default().trim().to_string();
                    let bytes = field.bytes().await?;
                    form.file = Some((file_name, bytes.to_vec()));
                }
                "dpi" => {
                    let raw = field.text().await?;
                    form.dpi = Some(parse_dpi(&raw)?);
                }
                "prompt" => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        form.prompt = Some(raw);
                    }
                }
                "clean" => {
                    let raw = field.text().await?;
                    form.clean = Some(parse_bool(&raw).ok_or_else(|| {
                        ApiError::bad_request(format!("clean must be a boolean, got '{raw}'"))
                    })?);
                }
                other => {
                    tracing::debug!("ignoring form field '{other}'");
                }
            }
        }
        Ok(form)
    }

    /// The uploaded file, or the 400 the API answers without one.
    fn take_file(&mut self) -> Result<(String, Vec<u8>), ApiError> {
        match self.file.take() {
            None => Err(ApiError::bad_request("No file provided")),
            Some((name, _)) if name.is_empty() => Err(ApiError::bad_request("No filename provided")),
            Some(file) => Ok(file),
        }
    }

    fn config(&self, base: &ConversionConfig) -> Result<ConversionConfig, ApiError> {
        let mut builder = base.to_builder();
        if let Some(dpi) = self.dpi {
            builder = builder.dpi(dpi);
        }
        if let Some(ref prompt) = self.prompt {
            builder = builder.prompt(prompts::resolve(prompt));
        }
        if let Some(clean) = self.clean {
            builder = builder.clean(clean);
        }
        Ok(builder.build()?)
    }
}

fn parse_dpi(raw: &str) -> Result<u32, ApiError> {
    let dpi: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("dpi must be an integer, got '{}'", raw.trim())))?;
    if !(MIN_DPI..=MAX_DPI).contains(&dpi) {
        return Err(ApiError::bad_request(format!(
            "dpi must be between {MIN_DPI} and {MAX_DPI}, got {dpi}"
        )));
    }
    Ok(dpi)
}

/// Accepts the spellings HTML forms and API clients send.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Some(true),
        "false" | "0" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Shared conversion path of both front ends.
async fn run_upload(state: &AppState, multipart: Multipart) -> Result<(String, String), ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let (file_name, bytes) = form.take_file()?;
    let config = form.config(&state.config)?;
    info!(
        file = %file_name,
        bytes = bytes.len(),
        dpi = config.dpi,
        clean = config.clean,
        "conversion request"
    );
    let output = convert_bytes(&file_name, &bytes, &config).await.map_err(|e| {
        warn!(file = %file_name, "conversion failed: {e}");
        ApiError::from(e)
    })?;
    Ok((output.source_name, output.markdown))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn api_convert(State(state): State<AppState>, multipart: Multipart) -> Result<String, ApiError> {
    let (_, markdown) = run_upload(&state, multipart).await?;
    Ok(markdown)
}

async fn ui_convert(State(state): State<AppState>, multipart: Multipart) -> Response {
    match run_upload(&state, multipart).await {
        Ok((name, markdown)) => Html(ui::result_page(&name, &markdown)).into_response(),
        Err(e) => (e.status, Html(ui::error_page(e.status, &e.detail))).into_response(),
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(ui::index_page(&state.config))
}

#[derive(Serialize)]
struct HealthzResponse<'a> {
    status: &'static str,
    engine: &'a str,
    engine_ready: bool,
}

async fn healthz(State(state): State<AppState>) -> Response {
    let ready = state.engine.check().await.is_ok();
    Json(HealthzResponse {
        status: "ok",
        engine: state.engine.name(),
        engine_ready: ready,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bools() {
        for t in ["true", "1", "on", "Yes", " TRUE "] {
            assert_eq!(parse_bool(t), Some(true), "{t}");
        }
        for f in ["false", "0", "off", "no"] {
            assert_eq!(parse_bool(f), Some(false), "{f}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn dpi_bounds() {
        assert_eq!(parse_dpi(" 300 ").unwrap(), 300);
        assert!(parse_dpi("71").is_err());
        assert!(parse_dpi("601").is_err());
        assert!(parse_dpi("high").is_err());
    }

    #[test]
    fn statuses() {
        let unsupported = Ocr2MdError::UnsupportedFileType {
            path: "a.docx".into(),
            extension: "docx".into(),
        };
        assert_eq!(status_for(&unsupported), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let empty = Ocr2MdError::PageFailed {
            page: 2,
            source: Box::new(Ocr2MdError::EmptyModelOutput { page: 2 }),
        };
        assert_eq!(status_for(&empty), StatusCode::BAD_GATEWAY);

        let no_runtime = Ocr2MdError::MissingDependency {
            name: "ollama".into(),
            hint: String::new(),
        };
        assert_eq!(status_for(&no_runtime), StatusCode::SERVICE_UNAVAILABLE);

        let internal = Ocr2MdError::Internal("boom".into());
        assert_eq!(status_for(&internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn listen_addr() {
        assert!(parse_listen_addr("127.0.0.1:8000").is_ok());
        assert!(matches!(parse_listen_addr("  "), Err(ServerError::EmptyListenAddr)));
        assert!(parse_listen_addr("localhost").is_err());
    }
}
