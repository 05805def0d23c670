//! CLI binary for edgequake-nutrition.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig`, runs one document and prints the JSON response.
//!
//! Exit codes: `0` success, `2` the input was rejected, `1` anything else.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_nutrition::{
    resolve_input, AnalysisConfig, AnalysisProgressCallback, AnalysisResponse, ErrorCategory,
    ErrorResponse, EscalationReason, ExtractionAttempt, NutritionError, NutritionPipeline,
    PipelineState, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner showing the current pipeline state,
/// with one log line per extraction stage and one for an escalation.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Analysing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

fn state_message(state: &PipelineState) -> &'static str {
    match state {
        PipelineState::Received => "Opening PDF…",
        PipelineState::Extracted => "Text extracted",
        PipelineState::Cleaned => "Text cleaned",
        PipelineState::LanguageDetected => "Asking the model…",
        PipelineState::AiAnalyzed => "Checking the answer…",
        PipelineState::QualityChecked => "Answer checked",
        PipelineState::VisuallyReanalyzed => "Page images analysed",
        PipelineState::Validated => "Result validated",
        PipelineState::Done => "Done",
        PipelineState::Failed(_) => "Failed",
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_state_change(&self, state: &PipelineState) {
        match state {
            PipelineState::Done => {
                self.bar.finish_and_clear();
                eprintln!("{} {}", green("✔"), bold("Analysis complete"));
            }
            PipelineState::Failed(kind) => {
                self.bar.finish_and_clear();
                eprintln!("{} {}", red("✘"), bold(&format!("Analysis failed ({kind:?})")));
            }
            _ => {
                self.bar.set_message(state_message(state));
            }
        }
    }

    fn on_stage_attempt(&self, attempt: &ExtractionAttempt) {
        let (mark, detail) = match (&attempt.error, attempt.succeeded) {
            (Some(err), _) => {
                let msg = if err.len() > 80 {
                    format!("{}\u{2026}", err.chars().take(79).collect::<String>())
                } else {
                    err.clone()
                };
                (red("✗"), red(&msg))
            }
            (None, true) => (green("✓"), dim(&format!("{:>6} chars", attempt.char_count))),
            (None, false) => (cyan("·"), dim(&format!("{:>6} chars (too short)", attempt.char_count))),
        };
        self.bar
            .println(format!("  {mark} {:<18}  {detail}", attempt.stage.name()));
    }

    fn on_escalation(&self, reason: &EscalationReason) {
        self.bar.println(format!(
            "  {} {}  {}",
            cyan("⚠"),
            bold("Visual re-analysis"),
            dim(&reason.to_string())
        ));
        self.bar.set_message("Sending page images…");
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Analyse a spec sheet (JSON on stdout)
  pdf2nutrition spec-sheet.pdf

  # Write the result to a file
  pdf2nutrition spec-sheet.pdf -o result.json

  # Use a specific model
  pdf2nutrition --provider gemini --model gemini-2.0-flash label.pdf

  # Analyse a PDF from a URL and show what the pipeline did
  pdf2nutrition --diagnostics https://example.com/product.pdf

  # Scanned labels in Hungarian and German only
  pdf2nutrition --ocr-languages hun+deu --tessdata-dir /usr/share/tessdata scan.pdf

OUTPUT:
  Success:  {"data": {"nutrition": {...}, "allergens": {...}},
             "metadata": {"language": "hu", "ocr_used": false, "char_count": 1834}}
  Failure:  {"status": "client_error" | "server_error", "detail": "..."}

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider when set)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  TESSDATA_PREFIX         Tesseract language data directory
"#;

/// Extract nutrition facts and allergens from food-product PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2nutrition",
    version,
    about = "Extract nutrition facts and allergens from food-product PDFs",
    long_about = "Extract a nutrition table and allergen flags from a food-product PDF \
(local file or URL). Text is read from the PDF's text layer when possible and by OCR \
otherwise; an LLM turns it into structured JSON, and page images are sent to a vision \
model only when the text-based answer looks incomplete.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the JSON response to this file instead of stdout.
    #[arg(short, long, env = "PDF2NUTRITION_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gemini-2.0-flash, gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(
        long,
        env = "EDGEQUAKE_PROVIDER",
        long_help = "LLM provider. Auto-detected from API key env vars if not set.\n\
          Supported: openai, anthropic, gemini, azure, ollama, or any OpenAI-compatible URL."
    )]
    provider: Option<String>,

    /// Rendering DPI for OCR and vision (72–600).
    #[arg(long, env = "PDF2NUTRITION_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Characters a stage must produce before the cascade stops.
    #[arg(long, env = "PDF2NUTRITION_MIN_CHARS", default_value_t = 100)]
    min_chars: usize,

    /// Tesseract language list, `+`-separated.
    #[arg(long, env = "PDF2NUTRITION_OCR_LANGUAGES", default_value = "hun+eng+deu+fra")]
    ocr_languages: String,

    /// Tesseract language data directory.
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata_dir: Option<PathBuf>,

    /// Pages sent to the vision model on escalation (1–3).
    #[arg(long, env = "PDF2NUTRITION_VISION_PAGES", default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(1..=3))]
    vision_pages: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2NUTRITION_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2NUTRITION_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per call.
    #[arg(long, env = "PDF2NUTRITION_MAX_TOKENS", default_value_t = 2048)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2NUTRITION_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per LLM call on failure.
    #[arg(long, env = "PDF2NUTRITION_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Whole-request timeout in seconds.
    #[arg(long, env = "PDF2NUTRITION_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "PDF2NUTRITION_API_TIMEOUT", default_value_t = 45)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2NUTRITION_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Maximum accepted file size in MiB.
    #[arg(long, env = "PDF2NUTRITION_MAX_UPLOAD_MB", default_value_t = 10)]
    max_upload_mb: usize,

    /// Print cascade attempts, escalation and state trace as JSON on stderr.
    #[arg(long, env = "PDF2NUTRITION_DIAGNOSTICS")]
    diagnostics: bool,

    /// Single-line JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable progress spinner.
    #[arg(long, env = "PDF2NUTRITION_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2NUTRITION_VERBOSE")]
    verbose: bool,

    /// Suppress all output except the result and errors.
    #[arg(short, long, env = "PDF2NUTRITION_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers progress; library INFO logs would tear it.
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(&cli, &err),
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };

    let config = build_config(cli, progress_cb).await?;

    let submission = resolve_input(&cli.input, config.download_timeout_secs, config.max_upload_bytes)
        .await
        .with_context(|| format!("Failed to read {}", cli.input))?;

    let pipeline = NutritionPipeline::builder(config)
        .build()
        .context("Failed to initialise pipeline")?;

    let report = pipeline
        .analyze_submission_with_report(submission)
        .await
        .context("Analysis failed")?;

    if cli.diagnostics {
        let diag =
            serde_json::to_string_pretty(&report.diagnostics).context("Failed to serialise diagnostics")?;
        eprintln!("{diag}");
    }

    let response = AnalysisResponse::from(report.result);
    write_json(cli, &response)?;

    if !cli.quiet {
        let present = response.data.allergens.present();
        eprintln!(
            "   {}  /  {}  /  {}ms",
            dim(&format!("language {}", response.metadata.language)),
            dim(&format!(
                "{} allergen{}",
                present.len(),
                if present.len() == 1 { "" } else { "s" }
            )),
            report.diagnostics.duration_ms,
        );
        if let Some(ref path) = cli.output {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    Ok(())
}

/// Print the boundary error payload and pick the exit code.
fn report_failure(cli: &Cli, err: &anyhow::Error) -> ExitCode {
    let (payload, code): (ErrorResponse, u8) = match err.downcast_ref::<NutritionError>() {
        Some(e) => {
            let code = match e.category() {
                ErrorCategory::Input => 2,
                ErrorCategory::Processing => 1,
            };
            (e.to_response(), code)
        }
        None => (ErrorResponse::server_error("Processing failed"), 1),
    };

    eprintln!("{} {:#}", red("error:"), err);
    if let Err(write_err) = write_json(cli, &payload) {
        eprintln!("{} {:#}", red("error:"), write_err);
    }
    ExitCode::from(code)
}

fn write_json<T: serde::Serialize>(cli: &Cli, value: &T) -> Result<()> {
    let mut json = if cli.compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("Failed to serialise output")?;
    json.push('\n');

    match cli.output {
        Some(ref path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(json.as_bytes())
                .context("Failed to write to stdout")
        }
    }
}

/// Map CLI args to `AnalysisConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let system_prompt = if let Some(ref path) = cli.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = AnalysisConfig::builder()
        .dpi(cli.dpi)
        .min_viable_chars(cli.min_chars)
        .ocr_languages(cli.ocr_languages.clone())
        .max_vision_pages(cli.vision_pages as usize)
        .request_timeout_secs(cli.timeout)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries);

    if let Some(ref dir) = cli.tessdata_dir {
        builder = builder.tessdata_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    let mut config = builder.build().context("Invalid configuration")?;

    // Fields that pass straight through without clamping
    config.model = cli.model.clone();
    config.provider_name = cli.provider.clone();
    config.password = cli.password.clone();
    config.system_prompt = system_prompt;

    Ok(config)
}
