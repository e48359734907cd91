//! CLI binary for lecture2anki.
//!
//! Runs the HTTP service, or any single stage of it against local files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use lecture2anki::server::{serve, AppState};
use lecture2anki::{
    build_package, extract_slides, generate_cards, Collaborators, DriveCredentials,
    GenerationProgressCallback, ProgressCallback, ServiceConfig,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar plus one log line per slide. Slides may finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} slides  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        bar.set_prefix("Generating");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, slide_number: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .ok()
            .and_then(|mut t| t.remove(&slide_number))
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }
}

impl GenerationProgressCallback for CliProgressCallback {
    fn on_generation_start(&self, total_slides: usize) {
        self.bar.set_length(total_slides as u64);
        self.bar.reset_eta();
    }

    fn on_slide_start(&self, slide_number: usize, _total: usize) {
        if let Ok(mut t) = self.start_times.lock() {
            t.insert(slide_number, Instant::now());
        }
        self.bar.set_message(format!("slide {slide_number}"));
    }

    fn on_slide_complete(&self, slide_number: usize, _total: usize) {
        self.bar.println(format!(
            "  {} Slide {:>3}  {}",
            green("✓"),
            slide_number,
            self.elapsed(slide_number)
        ));
        self.bar.inc(1);
    }

    fn on_slide_error(&self, slide_number: usize, _total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Slide {:>3}  {}  {}",
            red("✗"),
            slide_number,
            red(&msg),
            self.elapsed(slide_number)
        ));
        self.bar.inc(1);
    }

    fn on_generation_complete(&self, total_slides: usize, success_count: usize) {
        self.bar.finish_and_clear();
        if self.errors.load(Ordering::SeqCst) == 0 && success_count == total_slides {
            eprintln!("{} {} cards generated", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} stopped after {}/{} slides",
                red("✘"),
                bold(&success_count.to_string()),
                total_slides
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on 0.0.0.0:10000
  lecture2anki serve

  # Slide text of a lecture as JSON
  lecture2anki extract lecture.pdf > slides.json

  # One LLM-written card per slide
  lecture2anki cards lecture.pdf -o cards.json

  # Package cards (plus ./media images) into an Anki deck
  lecture2anki build cards.json -o decks/

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  GOOGLE_DRIVE_TOKEN      OAuth access token for Drive folders
  GOOGLE_DRIVE_API_KEY    API key for public Drive folders
  PDFIUM_LIB_PATH         Path to an existing libpdfium, skips auto-download

  Variables may also be placed in a .env file in the working directory.
"#;

/// Turn lecture slides into Anki flashcard packages.
#[derive(Parser, Debug)]
#[command(
    name = "lecture2anki",
    version,
    about = "Turn lecture slides into Anki flashcard packages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Folder of slide images named `<stem>-<NNNNN>.jpg`.
    #[arg(long, global = true, env = "L2A_MEDIA_DIR", default_value = "media")]
    media_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-haiku-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Number of concurrent LLM calls.
    #[arg(short, long, global = true, env = "L2A_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, global = true, env = "L2A_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Per-slide LLM call timeout in seconds.
    #[arg(long, global = true, env = "L2A_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Longest edge of downloaded slide images, in pixels.
    #[arg(long, global = true, env = "L2A_MAX_IMAGE_DIMENSION", default_value_t = 1280)]
    max_image_dimension: u32,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "L2A_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "L2A_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        #[arg(long, env = "L2A_HOST", default_value = "0.0.0.0")]
        host: String,
        #[arg(long, env = "PORT", default_value_t = 10000)]
        port: u16,
    },
    /// Package a cards JSON file into an .apkg.
    Build {
        /// Card payload: a list of cards or `{"cards": [...], "deck_name": ...}`.
        cards: PathBuf,
        /// Output directory.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
    /// Print the non-empty slides of a PDF as JSON.
    Extract {
        pdf: PathBuf,
    },
    /// Generate one card per slide of a PDF.
    Cards {
        pdf: PathBuf,
        /// Write the cards JSON here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    let config = build_config(&cli)?;

    match &cli.command {
        Command::Serve { host, port } => {
            ensure_pdfium(cli.quiet)?;
            let collaborators = Collaborators::from_config(&config);
            let listener = TcpListener::bind((host.as_str(), *port))
                .await
                .with_context(|| format!("Failed to bind {host}:{port}"))?;
            serve(listener, AppState::new(config, collaborators))
                .await
                .context("Server error")?;
        }
        Command::Build { cards, output } => {
            let body = std::fs::read(cards)
                .with_context(|| format!("Failed to read {}", cards.display()))?;
            let collaborators = Collaborators::from_config(&config);
            let package = build_package(&body, &collaborators, &config)
                .await
                .context("Failed to build package")?;
            std::fs::create_dir_all(output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            let path = output.join(&package.file_name);
            std::fs::write(&path, &package.bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !cli.quiet {
                eprintln!(
                    "{} {}  {} notes, {} media",
                    green("✔"),
                    bold(&path.display().to_string()),
                    package.note_count,
                    package.media_count
                );
            }
        }
        Command::Extract { pdf } => {
            ensure_pdfium(cli.quiet)?;
            let collaborators = Collaborators::from_config(&config);
            let slides = extract_slides(read_pdf(pdf)?, collaborators.extractor.as_ref())
                .await
                .context("Failed to extract slides")?;
            let json = serde_json::json!({ "slides": slides });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Command::Cards { pdf, output } => {
            ensure_pdfium(cli.quiet)?;
            let collaborators = Collaborators::from_config(&config);
            let summarizer = collaborators.require_summarizer()?;
            let slides = extract_slides(read_pdf(pdf)?, collaborators.extractor.as_ref())
                .await
                .context("Failed to extract slides")?;
            let progress: Option<ProgressCallback> = if cli.quiet {
                None
            } else {
                Some(CliProgressCallback::new() as Arc<dyn GenerationProgressCallback>)
            };
            let cards = generate_cards(&slides, summarizer, &config, progress)
                .await
                .context("Flashcard generation failed")?;
            let json = serde_json::to_string_pretty(&serde_json::json!({ "cards": cards }))?;
            match output {
                Some(path) => std::fs::write(path, json)
                    .with_context(|| format!("Failed to write {}", path.display()))?,
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .local_media_dir(cli.media_dir.clone())
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .max_image_dimension(cli.max_image_dimension);
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system prompt {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(creds) = drive_credentials() {
        builder = builder.drive_credentials(creds);
    }
    builder.build().context("Invalid configuration")
}

/// A bearer token wins over an API key.
fn drive_credentials() -> Option<DriveCredentials> {
    let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    non_empty("GOOGLE_DRIVE_TOKEN")
        .map(DriveCredentials::BearerToken)
        .or_else(|| non_empty("GOOGLE_DRIVE_API_KEY").map(DriveCredentials::ApiKey))
}

fn read_pdf(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Download PDFium on first use (~30 MB, cached afterwards).
fn ensure_pdfium(quiet: bool) -> Result<()> {
    if pdfium_auto::is_pdfium_cached() {
        return Ok(());
    }
    if quiet {
        tokio::task::block_in_place(|| pdfium_auto::ensure_pdfium_library(None))
            .context("Failed to download PDFium engine")?;
        return Ok(());
    }

    let dl_bar = ProgressBar::new(0);
    dl_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {bytes}/{total_bytes}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS),
    );
    dl_bar.set_prefix("PDF engine");
    dl_bar.enable_steady_tick(Duration::from_millis(80));

    let bar = dl_bar.clone();
    tokio::task::block_in_place(|| {
        pdfium_auto::ensure_pdfium_library(Some(&|downloaded, total| {
            if let Some(t) = total {
                if bar.length().unwrap_or(0) != t {
                    bar.set_length(t);
                }
            }
            bar.set_position(downloaded);
        }))
    })
    .context("Failed to download PDFium engine")?;
    dl_bar.finish_with_message("ready ✓");
    Ok(())
}
