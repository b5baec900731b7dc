//! CLI binary for ocr2md.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig`, prints results and turns failures into exit codes.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use ocr2md::pipeline::input;
use ocr2md::{
    convert, inspect, prompts, write_markdown, Backend, ConversionConfig,
    ConversionProgressCallback, Ocr2MdError, PageSelection, ProgressCallback,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page_num: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page_num))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Recognising {total_pages} page(s)…"))
        ));
    }

    fn on_page_start(&self, page_num: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_num, Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, markdown_len: usize) {
        let secs = self.elapsed_secs(page_num);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_num,
            total,
            dim(&format!("{markdown_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page_num);
        // Keep the log line to one row; the full error is printed on exit.
        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.abandon();
    }

    fn on_conversion_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} page(s) converted",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # PDF to scan.md next to the input
  ocr2md convert scan.pdf

  # Explicit output, higher DPI, keep raw model output
  ocr2md convert scan.pdf -o out/scan.md --dpi 300 --no-clean

  # Single image to stdout
  ocr2md convert receipt.jpg --stdout

  # Plain transcription without layout markup
  ocr2md convert letter.png --prompt free

  # Use the Ollama HTTP API instead of the CLI
  ocr2md convert scan.pdf --backend provider

  # HTTP API and web UI on port 8000
  ocr2md serve --listen 0.0.0.0:8000

EXIT CODES:
  0  success
  1  rendering, PDFium or I/O failure
  2  input missing, unreadable or unsupported
  3  model failure (ollama missing, model error, empty output, timeout)

SETUP:
  1. Install ollama:        https://ollama.com
  2. Pull the model:        ollama pull deepseek-ocr
  3. Convert:               ocr2md convert document.pdf

  PDFium is downloaded automatically on first PDF conversion and cached in
  ~/.cache/ocr2md/pdfium-7690/. To use an existing copy:
  PDFIUM_LIB_PATH=/path/to/libpdfium ocr2md convert ...
"#;

/// Convert PDFs and images to Markdown with DeepSeek-OCR.
#[derive(Parser, Debug)]
#[command(
    name = "ocr2md",
    version,
    about = "Convert PDFs and images to Markdown with a local DeepSeek-OCR model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OCR2MD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OCR2MD_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a PDF or image to Markdown.
    Convert(ConvertArgs),
    /// Print PDF metadata without running the model.
    Inspect {
        /// Local PDF path or HTTP/HTTPS URL.
        input: String,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API and web UI.
    #[cfg(feature = "server")]
    Serve(ServeArgs),
}

/// Settings shared by `convert` and `serve`.
#[derive(Args, Debug)]
struct EngineArgs {
    /// Rendering DPI for PDF pages (72–600).
    #[arg(long, env = "OCR2MD_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Prompt sent with each page, or a preset: markdown, free, figure.
    #[arg(long, env = "OCR2MD_PROMPT", default_value = prompts::DEFAULT_PROMPT)]
    prompt: String,

    /// Keep the raw model output (markers, coordinates, \( \) delimiters).
    #[arg(long, env = "OCR2MD_NO_CLEAN")]
    no_clean: bool,

    /// Leave figure regions as markers instead of inlining cropped images.
    #[arg(long, env = "OCR2MD_NO_EMBED_IMAGES")]
    no_embed_images: bool,

    /// How to reach the model runtime.
    #[arg(long, env = "OCR2MD_BACKEND", value_enum, default_value = "cli")]
    backend: BackendArg,

    /// Model tag.
    #[arg(long, env = "OCR2MD_MODEL", default_value = ocr2md::config::DEFAULT_MODEL)]
    model: String,

    /// ollama executable (cli backend).
    #[arg(long, env = "OCR2MD_OLLAMA_BIN", default_value = "ollama")]
    ollama_bin: PathBuf,

    /// edgequake-llm provider name (provider backend).
    #[arg(long, env = "OCR2MD_PROVIDER", default_value = "ollama")]
    provider: String,

    /// Model calls in flight at once.
    #[arg(short, long, env = "OCR2MD_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Per-page model timeout in seconds.
    #[arg(long, env = "OCR2MD_MODEL_TIMEOUT", default_value_t = 600)]
    model_timeout: u64,

    /// Never download PDFium; use an installed copy only.
    #[arg(long, env = "OCR2MD_OFFLINE")]
    offline: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    /// `ollama run` subprocess per page.
    Cli,
    /// Local HTTP API through edgequake-llm.
    Provider,
}

impl From<BackendArg> for Backend {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Cli => Backend::OllamaCli,
            BackendArg::Provider => Backend::Provider,
        }
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local PDF/PNG/JPEG path or HTTP/HTTPS URL.
    input: String,

    /// Output Markdown file (default: input name with .md).
    #[arg(short, long, env = "OCR2MD_OUTPUT")]
    output: Option<PathBuf>,

    /// Write Markdown to stdout instead of a file.
    #[arg(long, conflicts_with = "output")]
    stdout: bool,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "OCR2MD_PAGES", default_value = "all")]
    pages: PageSelection,

    /// Omit `<!-- Page N -->` markers.
    #[arg(long)]
    no_page_markers: bool,

    /// Print structured JSON (ConversionOutput) to stdout.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "OCR2MD_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    engine: EngineArgs,
}

#[cfg(feature = "server")]
#[derive(Args, Debug)]
struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, env = "OCR2MD_LISTEN", default_value = "127.0.0.1:8000")]
    listen: String,

    /// Maximum upload size in megabytes.
    #[arg(long, env = "OCR2MD_MAX_UPLOAD_MB", default_value_t = ocr2md::server::DEFAULT_MAX_UPLOAD_MB)]
    max_upload_mb: usize,

    #[command(flatten)]
    engine: EngineArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {:#}", red("error:"), err);
            let code = err
                .chain()
                .find_map(|e| e.downcast_ref::<Ocr2MdError>())
                .map(Ocr2MdError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn init_tracing(cli: &Cli) {
    // The progress bar gives all the feedback that matters during `convert`;
    // library INFO logs would interleave with it.
    let quiet_by_default = matches!(
        &cli.command,
        Command::Convert(args) if !args.no_progress && !args.json
    );
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || quiet_by_default {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Convert(args) => run_convert(args, cli.quiet).await,
        Command::Inspect { input, json } => run_inspect(&input, json).await,
        #[cfg(feature = "server")]
        Command::Serve(args) => {
            let config = build_config(&args.engine, None)?;
            ocr2md::server::serve(config, &args.listen, args.max_upload_mb * 1024 * 1024)
                .await
                .context("Server failed")
        }
    }
}

async fn run_convert(args: ConvertArgs, quiet: bool) -> Result<()> {
    let show_progress = !quiet && !args.no_progress && !args.json;

    if !args.engine.offline && looks_like_pdf(&args.input) {
        ensure_pdfium(quiet);
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let mut config = build_config(&args.engine, progress_cb)?;
    config.pages = args.pages.clone();
    config.page_markers = !args.no_page_markers;

    let output = convert(&args.input, &config)
        .await
        .context("Conversion failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    if args.stdout {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.markdown.as_bytes())
            .context("Failed to write to stdout")?;
        return Ok(());
    }

    let out_path = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    write_markdown(&out_path, &output.markdown)
        .await
        .context("Failed to write output")?;

    if !quiet {
        eprintln!(
            "{}  {} page(s)  {}ms  →  {}",
            green("✔"),
            output.stats.processed_pages,
            output.stats.total_duration_ms,
            bold(&out_path.display().to_string()),
        );
    }
    Ok(())
}

async fn run_inspect(input: &str, json: bool) -> Result<()> {
    let meta = inspect(input, &ConversionConfig::default())
        .await
        .context("Failed to inspect PDF")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&meta).context("Failed to serialize metadata")?
        );
        return Ok(());
    }

    println!("File:         {}", input);
    if let Some(ref t) = meta.title {
        println!("Title:        {}", t);
    }
    if let Some(ref a) = meta.author {
        println!("Author:       {}", a);
    }
    if let Some(ref s) = meta.subject {
        println!("Subject:      {}", s);
    }
    println!("Pages:        {}", meta.page_count);
    println!("PDF Version:  {}", meta.pdf_version);
    if let Some(ref p) = meta.producer {
        println!("Producer:     {}", p);
    }
    if let Some(ref c) = meta.creator {
        println!("Creator:      {}", c);
    }
    Ok(())
}

/// Map shared CLI args to `ConversionConfig`.
fn build_config(args: &EngineArgs, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .dpi(args.dpi)
        .prompt(prompts::resolve(&args.prompt))
        .clean(!args.no_clean)
        .embed_images(!args.no_embed_images)
        .backend(args.backend.into())
        .model(args.model.clone())
        .ollama_bin(args.ollama_bin.clone())
        .provider_name(args.provider.clone())
        .concurrency(args.concurrency)
        .model_timeout_secs(args.model_timeout)
        .fetch_pdfium(!args.offline);

    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// `scan.pdf` → `scan.md` next to the input; URLs land in the working directory.
fn default_output_path(input_str: &str) -> PathBuf {
    if input::is_url(input_str) {
        PathBuf::from(input::sanitize_file_name(&input::source_name(input_str))).with_extension("md")
    } else {
        Path::new(input_str).with_extension("md")
    }
}

fn looks_like_pdf(input_str: &str) -> bool {
    input::is_url(input_str)
        || Path::new(input_str)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Fetch PDFium up front so the first-run download gets its own spinner
/// instead of stalling the page bar. Failures are left to the conversion,
/// which reports them with the right exit code.
fn ensure_pdfium(quiet: bool) {
    if pdfium_loader::locate().is_some() {
        return;
    }
    let spinner = (!quiet).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("PDF engine");
        bar.set_message(format!("Downloading PDFium {}…", pdfium_loader::PDFIUM_VERSION));
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let result = tokio::task::block_in_place(|| {
        pdfium_loader::ensure_library(pdfium_loader::FetchPolicy::IfMissing)
    });

    if let Some(bar) = spinner {
        match result {
            Ok(_) => bar.finish_with_message("ready ✓"),
            Err(e) => bar.abandon_with_message(format!("unavailable: {e}")),
        }
    }
}
