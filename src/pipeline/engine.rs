//! OCR engines: the seam between the pipeline and the model runtime.
//!
//! Two implementations ship with the crate:
//!
//! - [`OllamaCli`] spawns `ollama run MODEL "IMAGE\nPROMPT"` once per page.
//!   This is the reference way of driving DeepSeek-OCR locally and needs
//!   nothing but the `ollama` binary on `PATH`.
//! - [`VisionProvider`] sends the page as a base64 image through an
//!   `edgequake_llm` provider, typically the local Ollama HTTP API.
//!
//! Anything else (a remote service, a test double) can implement
//! [`OcrEngine`] and be injected with
//! [`ConversionConfigBuilder::engine`](crate::ConversionConfigBuilder::engine).

use crate::config::{Backend, ConversionConfig};
use crate::error::Ocr2MdError;
use crate::pipeline::encode;
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Name reported for the `ollama` executable in errors.
pub const OLLAMA: &str = "ollama";

/// A model that turns one page image into text.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short identifier used in logs, errors and `/healthz`.
    fn name(&self) -> &str;

    /// Verify the runtime is installed or reachable.
    async fn check(&self) -> Result<(), Ocr2MdError> {
        Ok(())
    }

    /// Raw model output for `page`.
    async fn recognize(&self, page: &PageImage, prompt: &str) -> Result<String, Ocr2MdError>;
}

// ── ollama CLI ───────────────────────────────────────────────────────────────

/// Runs the `ollama` command-line client as a subprocess.
#[derive(Debug, Clone)]
pub struct OllamaCli {
    bin: PathBuf,
    model: String,
}

impl OllamaCli {
    pub fn new(bin: impl Into<PathBuf>, model: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            model: model.into(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> Ocr2MdError {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ocr2MdError::MissingDependency {
                name: OLLAMA.to_string(),
                hint: format!(
                    "`{}` not found. Install ollama and ensure it is on PATH",
                    self.bin.display()
                ),
            }
        } else {
            Ocr2MdError::EngineFailed {
                engine: OLLAMA.to_string(),
                exit_code: None,
                detail: format!("could not start `{}`: {e}", self.bin.display()),
            }
        }
    }
}

#[async_trait]
impl OcrEngine for OllamaCli {
    fn name(&self) -> &str {
        OLLAMA
    }

    async fn check(&self) -> Result<(), Ocr2MdError> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if !output.status.success() {
            return Err(Ocr2MdError::EngineFailed {
                engine: OLLAMA.to_string(),
                exit_code: output.status.code(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn recognize(&self, page: &PageImage, prompt: &str) -> Result<String, Ocr2MdError> {
        let input = format!("{}\n{}", page.path.display(), prompt);
        debug!(
            "Page {}: {} run {} <{}>",
            page.page_num,
            self.bin.display(),
            self.model,
            page.path.display()
        );

        let output = self
            .command()
            .arg("run")
            .arg(&self.model)
            .arg(&input)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(Ocr2MdError::EngineFailed {
                engine: OLLAMA.to_string(),
                exit_code: output.status.code(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

// ── edgequake-llm provider ───────────────────────────────────────────────────

/// Sends pages to a multimodal chat provider.
pub struct VisionProvider {
    provider: Arc<dyn LLMProvider>,
    label: String,
    options: CompletionOptions,
}

impl VisionProvider {
    /// Wrap an existing provider. `label` names it in logs and errors.
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
            options: CompletionOptions::default(),
        }
    }

    /// Instantiate a named provider (`ollama`, `openai`, …) for `model`.
    pub fn from_config(config: &ConversionConfig) -> Result<Self, Ocr2MdError> {
        let provider = ProviderFactory::create_llm_provider(&config.provider_name, &config.model)
            .map_err(|e| Ocr2MdError::MissingDependency {
                name: config.provider_name.clone(),
                hint: format!("provider could not be created: {e}"),
            })?;
        Ok(Self::new(provider, config.provider_name.clone()).with_options(build_options(config)))
    }

    pub fn with_options(mut self, options: CompletionOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl OcrEngine for VisionProvider {
    fn name(&self) -> &str {
        &self.label
    }

    async fn recognize(&self, page: &PageImage, prompt: &str) -> Result<String, Ocr2MdError> {
        let bytes = tokio::fs::read(&page.path)
            .await
            .map_err(|e| Ocr2MdError::ImageFailed {
                path: page.path.clone(),
                detail: e.to_string(),
            })?;
        let image = encode::page_image_data(&page.path, &bytes);
        let messages = vec![ChatMessage::user_with_images(prompt, vec![image])];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| Ocr2MdError::EngineFailed {
                engine: self.label.clone(),
                exit_code: None,
                detail: e.to_string(),
            })?;
        debug!(
            "Page {}: {} input tokens, {} output tokens",
            page.page_num, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content.trim().to_string())
    }
}

/// Build `CompletionOptions` from the conversion config.
fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

// ── Selection and invocation ─────────────────────────────────────────────────

/// Pick the engine for a conversion: an injected one first, otherwise the
/// configured backend.
pub fn resolve_engine(config: &ConversionConfig) -> Result<Arc<dyn OcrEngine>, Ocr2MdError> {
    if let Some(ref engine) = config.engine {
        return Ok(Arc::clone(engine));
    }
    let engine: Arc<dyn OcrEngine> = match config.backend {
        Backend::OllamaCli => Arc::new(OllamaCli::new(&config.ollama_bin, &config.model)),
        Backend::Provider => Arc::new(VisionProvider::from_config(config)?),
    };
    info!("Using {} engine with model {}", engine.name(), config.model);
    Ok(engine)
}

/// Run one page through `engine` under `timeout`.
///
/// Whitespace-only output is an error: an empty page in the document would
/// hide a model failure.
pub async fn recognize_page(
    engine: &dyn OcrEngine,
    page: &PageImage,
    prompt: &str,
    timeout: Duration,
) -> Result<String, Ocr2MdError> {
    let start = Instant::now();
    let text = tokio::time::timeout(timeout, engine.recognize(page, prompt))
        .await
        .map_err(|_| Ocr2MdError::ModelTimeout {
            page: page.page_num,
            elapsed: start.elapsed(),
        })??;

    if text.trim().is_empty() {
        return Err(Ocr2MdError::EmptyModelOutput {
            page: page.page_num,
        });
    }
    debug!(
        "Page {}: {} chars from {} in {:?}",
        page.page_num,
        text.len(),
        engine.name(),
        start.elapsed()
    );
    Ok(text)
}
