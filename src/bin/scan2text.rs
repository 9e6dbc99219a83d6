//! CLI binary for scan2text.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractionConfig` / `StructuringConfig`, drives the pipeline and prints
//! results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use scan2text::extract::write_atomic;
use scan2text::store::DEFAULT_STORE_PATH;
use scan2text::{
    DocumentRecord, ExtractError, ExtractionConfig, ExtractionOutput, ExtractionProgressCallback,
    OcrPipeline, ProgressCallback, RecordStore, StructuredText, Structurer, StructuringConfig,
    TesseractEngine,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

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

fn spinner(prefix: &'static str, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix(prefix);
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner while the PDF opens, then a page bar with
/// one log line per finished page. Pages finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: spinner("Extracting", "Opening PDF…"),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_message("");
        self.bar.reset_eta();
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Running OCR on {total_pages} pages…"))
        ));
    }

    fn on_page_complete(&self, page_num: usize, total: usize, text_len: usize) {
        let note = if text_len == 0 {
            dim("blank")
        } else {
            dim(&format!("{text_len:>5} chars"))
        };
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total,
            note
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, total: usize, error: &str) {
        let first_line = error.lines().next().unwrap_or_default();
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(['…']).collect()
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            red("✗"),
            page_num,
            total,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_extraction_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} pages extracted",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} left empty after errors)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Raw OCR text to stdout
  scan2text scan.pdf

  # Raw OCR text to a file
  scan2text scan.pdf -o scan.txt

  # Restructure with an LLM and save the record (DOC_0001, DOC_0002, …)
  scan2text --save scan.pdf

  # German scan, 4 workers, give up on a page after 2 minutes
  scan2text --lang deu --concurrency 4 --page-timeout 120 scan.pdf

  # Document facts only (no OCR)
  scan2text --inspect-only scan.pdf

  # Stored records
  scan2text --list

ENVIRONMENT VARIABLES:
  SCAN2TEXT_TESSERACT     Path to the tesseract binary
  SCAN2TEXT_LLM_PROVIDER  LLM provider for --structure (openai, anthropic, gemini, ollama)
  SCAN2TEXT_MODEL         LLM model ID
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Overrides the stderr log filter

  A .env file in the working directory is loaded before flags are parsed.

SETUP:
  1. Install tesseract:   apt install tesseract-ocr   (or brew install tesseract)
  2. Get libpdfium from https://github.com/bblanchon/pdfium-binaries and put it
     next to where you run scan2text, or set PDFIUM_LIB_PATH.
  3. For --structure / --save: export OPENAI_API_KEY=sk-...
"#;

/// Extract text from scanned PDFs with Tesseract OCR.
#[derive(Parser, Debug)]
#[command(
    name = "scan2text",
    version,
    about = "Extract text from scanned PDFs with Tesseract OCR",
    long_about = "Extract text from scanned PDF documents. Every page is rendered at 300 DPI, \
binarised and passed through Tesseract in parallel; page texts are joined in page order. \
Optionally restructure the text with an LLM and keep a numbered record of each document.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Scanned PDF file.
    #[arg(required_unless_present = "list")]
    input: Option<PathBuf>,

    /// Write text to this file instead of stdout.
    #[arg(short, long, env = "SCAN2TEXT_OUTPUT")]
    output: Option<PathBuf>,

    /// Restructure the OCR text with an LLM.
    #[arg(long, env = "SCAN2TEXT_STRUCTURE")]
    structure: bool,

    /// Save raw and structured text to the record store (implies --structure).
    #[arg(long, env = "SCAN2TEXT_SAVE")]
    save: bool,

    /// Record store file.
    #[arg(long, env = "SCAN2TEXT_STORE", default_value = DEFAULT_STORE_PATH)]
    store: PathBuf,

    /// Print the stored records and exit.
    #[arg(long)]
    list: bool,

    /// Print PDF metadata only, no OCR.
    #[arg(long)]
    inspect_only: bool,

    /// Output JSON (extraction details, structured text, saved record).
    #[arg(long, env = "SCAN2TEXT_JSON")]
    json: bool,

    /// Rendering DPI (72–600).
    #[arg(long, env = "SCAN2TEXT_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Binarisation cutoff: luminance below it becomes black.
    #[arg(long, env = "SCAN2TEXT_THRESHOLD", default_value_t = 200)]
    threshold: u8,

    /// Pages processed in parallel. Default: available CPU cores.
    #[arg(short, long, env = "SCAN2TEXT_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Tesseract binary.
    #[arg(long, env = "SCAN2TEXT_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Tesseract language(s), e.g. eng or eng+deu.
    #[arg(long, env = "SCAN2TEXT_LANG")]
    lang: Option<String>,

    /// Tesseract page segmentation mode (0–13).
    #[arg(long, env = "SCAN2TEXT_PSM", default_value_t = 6)]
    psm: u8,

    /// Give up on a page after this many seconds; the page is left empty.
    #[arg(long, env = "SCAN2TEXT_PAGE_TIMEOUT")]
    page_timeout: Option<u64>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "SCAN2TEXT_PASSWORD")]
    password: Option<String>,

    /// Path to libpdfium (file or containing directory).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// LLM model ID for --structure.
    #[arg(long, env = "SCAN2TEXT_MODEL")]
    model: Option<String>,

    /// LLM provider for --structure: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "SCAN2TEXT_LLM_PROVIDER")]
    provider: Option<String>,

    /// Approximate token budget per LLM chunk.
    #[arg(long, env = "SCAN2TEXT_MAX_CHUNK_TOKENS", default_value_t = 6000)]
    max_chunk_tokens: usize,

    /// Disable progress bar.
    #[arg(long, env = "SCAN2TEXT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SCAN2TEXT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SCAN2TEXT_QUIET")]
    quiet: bool,

    /// Directory for run log files.
    #[arg(long, env = "SCAN2TEXT_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Do not write a run log file.
    #[arg(long, env = "SCAN2TEXT_NO_LOG_FILE")]
    no_log_file: bool,
}

/// Everything `--json` prints.
#[derive(Serialize)]
struct JsonReport<'a> {
    extraction: &'a ExtractionOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured: Option<&'a StructuredText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a DocumentRecord>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list;
    let log_file = init_logging(&cli, show_progress)?;
    if let Some(ref path) = log_file {
        info!("Logging to {}", path.display());
    }

    // ── Record listing ───────────────────────────────────────────────────
    if cli.list {
        let store = RecordStore::open(&cli.store).context("Failed to open record store")?;
        print_records(&store, cli.json)?;
        return Ok(());
    }

    let Some(input) = cli.input.clone() else {
        bail!("No input PDF given");
    };

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = scan2text::inspect(&input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", input.display());
            println!("Pages:        {}", info.page_count);
            let fields = [
                ("Title", &info.title),
                ("Author", &info.author),
                ("Subject", &info.subject),
                ("Creator", &info.creator),
                ("Producer", &info.producer),
                ("PDF Version", &info.pdf_version),
            ];
            for (label, value) in fields {
                if let Some(v) = value {
                    println!("{:<13} {}", format!("{label}:"), v);
                }
            }
        }
        return Ok(());
    }

    // ── Startup validation ───────────────────────────────────────────────
    let engine = TesseractEngine::from_config(&config);
    let version = engine
        .version()
        .await
        .map_err(|e| ExtractError::OcrEngineUnavailable {
            path: engine.binary().to_path_buf(),
            detail: e.to_string(),
        })
        .context("Startup check failed")?;
    info!("Using {}", version);

    // ── Extraction ───────────────────────────────────────────────────────
    let pipeline = OcrPipeline::new(config);
    let output = pipeline
        .try_extract(&input)
        .await
        .with_context(|| format!("Failed to extract text from {}", input.display()))?;

    if !cli.quiet && !show_progress && !cli.json {
        eprintln!(
            "Extracted {} pages in {}ms ({} blank, {} failed)",
            output.stats.total_pages,
            output.stats.total_duration_ms,
            output.stats.blank_pages,
            output.stats.failed_pages
        );
    }

    // ── Structuring / saving ─────────────────────────────────────────────
    let structured = if cli.structure || cli.save {
        Some(structure_text(&cli, &output.text, show_progress).await?)
    } else {
        None
    };

    let record = match structured {
        Some(ref s) if cli.save && s.has_output() => {
            let mut store = RecordStore::open(&cli.store).context("Failed to open record store")?;
            let record = store
                .append(output.text.clone(), s.text.clone())
                .context("Failed to save record")?;
            if !cli.quiet && !cli.json {
                eprintln!(
                    "{} Saved as {} in {}",
                    green("✔"),
                    bold(&record.id),
                    store.path().display()
                );
            }
            Some(record)
        }
        Some(_) if cli.save => {
            warn!("Nothing was structured; no record saved");
            None
        }
        _ => None,
    };

    // ── Output ───────────────────────────────────────────────────────────
    if cli.json {
        let report = JsonReport {
            extraction: &output,
            structured: structured.as_ref(),
            record: record.as_ref(),
        };
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise output")?;
        emit(cli.output.as_deref(), &json)?;
    } else {
        let text = match structured {
            Some(ref s) if s.has_output() => s.text.as_str(),
            _ => output.text.as_str(),
        };
        emit(cli.output.as_deref(), text)?;
    }

    if let Some(ref path) = cli.output {
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    Ok(())
}

/// Run the structuring step, with a spinner when progress is shown.
async fn structure_text(cli: &Cli, text: &str, show_progress: bool) -> Result<StructuredText> {
    let mut builder = StructuringConfig::builder().max_tokens_per_chunk(cli.max_chunk_tokens);
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    let config = builder.build().context("Invalid structuring configuration")?;
    let structurer = Structurer::from_config(&config).context("LLM provider unavailable")?;

    let bar = show_progress.then(|| spinner("Structuring", "Sending text to the LLM…"));
    let structured = structurer.structure(text).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if let Some(ref e) = structured.error {
        if !cli.quiet && !cli.json {
            eprintln!(
                "{} Structuring stopped after {}/{} chunks: {}",
                red("✘"),
                structured.chunks_completed,
                structured.chunks_total,
                e
            );
        }
    } else if !cli.quiet && !cli.json {
        eprintln!(
            "{} Structured {} chunk(s) in {}ms",
            green("✔"),
            structured.chunks_completed,
            structured.duration_ms
        );
    }
    Ok(structured)
}

/// Write `text` to `path`, or to stdout with a trailing newline.
fn emit(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => write_atomic(path, text.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

fn print_records(store: &RecordStore, json: bool) -> Result<()> {
    if json {
        let out =
            serde_json::to_string_pretty(store.records()).context("Failed to serialise records")?;
        println!("{out}");
        return Ok(());
    }

    if store.records().is_empty() {
        eprintln!("No records in {}", store.path().display());
        return Ok(());
    }
    for r in store.records() {
        let preview: String = r
            .formatted_text
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(60)
            .collect();
        println!(
            "{}  {}  {:>7} chars  {}",
            bold(&r.id),
            dim(&r.created_at.format("%Y-%m-%d %H:%M").to_string()),
            r.extracted_text.chars().count(),
            preview
        );
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .threshold(cli.threshold)
        .tesseract_path(&cli.tesseract)
        .page_segmentation_mode(cli.psm);

    if let Some(n) = cli.concurrency {
        builder = builder.concurrency(n);
    }
    if let Some(ref lang) = cli.lang {
        builder = builder.language(lang);
    }
    if let Some(secs) = cli.page_timeout {
        builder = builder.page_timeout_secs(secs);
    }
    if let Some(ref pwd) = cli.password {
        builder = builder.password(pwd);
    }
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Install the stderr layer and, unless disabled, a per-run log file.
///
/// Stderr is quiet (errors only) while the progress bar is on screen. The
/// log file always records INFO and above. Returns the log file path.
fn init_logging(cli: &Cli, show_progress: bool) -> Result<Option<PathBuf>> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    let (file_layer, path) = if cli.no_log_file {
        (None, None)
    } else {
        let (file, path) = open_log_file(&cli.log_dir)?;
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(LevelFilter::INFO);
        (Some(layer), Some(path))
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(path)
}

/// Create `<dir>/<%m_%d_%Y_%H_%M_%S>.log`.
fn open_log_file(dir: &Path) -> Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let name = format!("{}.log", chrono::Local::now().format("%m_%d_%Y_%H_%M_%S"));
    let path = dir.join(name);
    let file = File::create(&path)
        .with_context(|| format!("Failed to create log file {}", path.display()))?;
    Ok((file, path))
}
