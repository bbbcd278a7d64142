//! CLI binary for exam-harvest.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use exam_harvest::{
    harvest, harvest_to_file, inspect, CancelFlag, ExtractionConfig, ExtractionConfigBuilder,
    ExtractionOutput, HarvestProgressCallback, IdentityStrategy, MemorySink, MergePolicy,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Live progress bar plus one log line per window.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-window wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
    /// True once the sweep started; sweep windows don't advance the bar.
    sweeping: Mutex<bool>,
}

impl CliProgressCallback {
    /// Spinner until `on_run_start` tells us the window count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading document…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
            sweeping: Mutex::new(false),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} windows  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0) as f64
            / 1000.0
    }

    fn advance(&self) {
        if !*self.sweeping.lock().unwrap() {
            self.bar.inc(1);
        }
    }
}

impl HarvestProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_windows: usize) {
        self.activate_bar(total_windows);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting questions from {total_windows} windows…"))
        ));
    }

    fn on_window_start(&self, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(format!("window {}", index + 1));
    }

    fn on_window_complete(&self, index: usize, total: usize, candidates: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} Window {:>3}/{:<3}  {:<14}  {}",
            green("✓"),
            index + 1,
            total,
            dim(&format!("{candidates:>3} candidates")),
            dim(&format!("{secs:.1}s")),
        ));
        self.advance();
    }

    fn on_window_error(&self, index: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(index);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Window {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.advance();
    }

    fn on_sweep_start(&self, windows: usize) {
        *self.sweeping.lock().unwrap() = true;
        self.bar.set_prefix("Retrying");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Retrying {windows} failed or empty windows…"))
        ));
    }

    fn on_run_complete(&self, total_windows: usize, questions: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {} questions from {} windows{}",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&questions.to_string()),
            total_windows,
            if failed == 0 {
                String::new()
            } else {
                format!("  ({} window errors)", red(&failed.to_string()))
            },
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract questions, print one JSON record per line on stdout
  exam-harvest paper.pdf --exam-id env-2022

  # Write records to a JSONL file
  exam-harvest paper.pdf --exam-id env-2022 -o questions.jsonl

  # Pre-extracted text instead of a PDF
  exam-harvest paper.txt --exam-id env-2022 -o questions.jsonl

  # Smaller windows, more overlap, fill fields from duplicates
  exam-harvest paper.pdf --exam-id env-2022 --window-size 2000 --overlap 600 \
      --merge-policy fill-missing

  # Load tunables from a TOML file (flags still win)
  exam-harvest paper.pdf --exam-id env-2022 --config harvest.toml

  # Full structured output (questions, per-window results, stats)
  exam-harvest --json paper.pdf --exam-id env-2022 > output.json

  # Document facts only (no endpoint needed)
  exam-harvest --inspect-only paper.pdf

ENVIRONMENT VARIABLES:
  EXAM_HARVEST_API_URL    Chat-completion endpoint URL
  EXAM_HARVEST_API_KEY    Bearer credential for the endpoint
  EXAM_HARVEST_MODEL      Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Override log filter

  Without an endpoint every window yields the example question, so the
  pipeline can be tried end to end offline.

  Ctrl-C stops before the next window; nothing is saved.
"#;

/// Extract structured exam questions from PDF papers with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "exam-harvest",
    version,
    about = "Extract structured exam questions from PDF papers with an LLM",
    long_about = "Split an exam paper's text into overlapping windows, extract questions from \
each window with a chat-completion endpoint (with retries and JSON recovery), deduplicate \
them across windows by their numbering, and write one record per question.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF / text file path or HTTP/HTTPS URL.
    input: String,

    /// Exam every question belongs to.
    #[arg(long, env = "EXAM_HARVEST_EXAM_ID", required_unless_present = "inspect_only")]
    exam_id: Option<String>,

    /// Write JSONL records to this file instead of stdout.
    #[arg(short, long, env = "EXAM_HARVEST_OUTPUT")]
    output: Option<PathBuf>,

    /// TOML file with configuration; flags override its values.
    #[arg(long, env = "EXAM_HARVEST_CONFIG")]
    config: Option<PathBuf>,

    /// Chat-completion endpoint URL.
    #[arg(long, env = "EXAM_HARVEST_API_URL")]
    api_url: Option<String>,

    /// Bearer credential for the endpoint.
    #[arg(long, env = "EXAM_HARVEST_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model ID sent in each request [default: gemini-2.0-flash-exp].
    #[arg(long, env = "EXAM_HARVEST_MODEL")]
    model: Option<String>,

    /// Window length in characters [default: 3000].
    #[arg(long, env = "EXAM_HARVEST_WINDOW_SIZE")]
    window_size: Option<usize>,

    /// Characters shared by consecutive windows [default: 500].
    #[arg(long, env = "EXAM_HARVEST_OVERLAP")]
    overlap: Option<usize>,

    /// First-attempt temperature, 0.0–2.0 [default: 0.3].
    #[arg(long, env = "EXAM_HARVEST_TEMPERATURE")]
    temperature: Option<f32>,

    /// Ceiling temperature for retries and the sweep [default: 0.2].
    #[arg(long, env = "EXAM_HARVEST_RETRY_TEMPERATURE")]
    retry_temperature: Option<f32>,

    /// Max output tokens per request [default: 4000].
    #[arg(long, env = "EXAM_HARVEST_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Retries per window after the first attempt [default: 3].
    #[arg(long, env = "EXAM_HARVEST_MAX_RETRIES")]
    max_retries: Option<u32>,

    /// Initial retry backoff in milliseconds, doubled per retry [default: 1000].
    #[arg(long, env = "EXAM_HARVEST_RETRY_BACKOFF_MS")]
    retry_backoff_ms: Option<u64>,

    /// Per-request timeout in seconds [default: 100].
    #[arg(long, env = "EXAM_HARVEST_API_TIMEOUT")]
    api_timeout: Option<u64>,

    /// HTTP download timeout in seconds [default: 120].
    #[arg(long, env = "EXAM_HARVEST_DOWNLOAD_TIMEOUT")]
    download_timeout: Option<u64>,

    /// How duplicate questions are recognised.
    #[arg(long, env = "EXAM_HARVEST_IDENTITY", value_enum)]
    identity: Option<IdentityArg>,

    /// What happens to fields of later duplicates.
    #[arg(long, env = "EXAM_HARVEST_MERGE_POLICY", value_enum)]
    merge_policy: Option<MergeArg>,

    /// Keep answer-only records (no content, but an answer and an id).
    #[arg(long, env = "EXAM_HARVEST_KEEP_ANSWER_ONLY")]
    keep_answer_only: bool,

    /// Skip page-counter and whitespace cleanup of the document text.
    #[arg(long, env = "EXAM_HARVEST_NO_NORMALIZE")]
    no_normalize: bool,

    /// Skip the second pass over failed or empty windows.
    #[arg(long, env = "EXAM_HARVEST_NO_SWEEP")]
    no_sweep: bool,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "EXAM_HARVEST_PROMPT")]
    prompt: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "EXAM_HARVEST_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Output structured JSON (ExtractionOutput) instead of records.
    #[arg(long, env = "EXAM_HARVEST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "EXAM_HARVEST_NO_PROGRESS")]
    no_progress: bool,

    /// Print document facts only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "EXAM_HARVEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "EXAM_HARVEST_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum IdentityArg {
    Numbering,
    ContentType,
    ContentTypeOption,
}

impl From<IdentityArg> for IdentityStrategy {
    fn from(v: IdentityArg) -> Self {
        match v {
            IdentityArg::Numbering => IdentityStrategy::Numbering,
            IdentityArg::ContentType => IdentityStrategy::ContentType,
            IdentityArg::ContentTypeOption => IdentityStrategy::ContentTypeOption,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum MergeArg {
    FirstWins,
    FillMissing,
}

impl From<MergeArg> for MergePolicy {
    fn from(v: MergeArg) -> Self {
        match v {
            MergeArg::FirstWins => MergePolicy::FirstWins,
            MergeArg::FillMissing => MergePolicy::FillMissing,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // INFO-level library logs would tear the progress bar.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input)
            .await
            .context("Failed to inspect document")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialize document info")?
            );
        } else {
            println!("File:         {}", cli.input);
            if let Some(ref t) = info.title {
                println!("Title:        {}", t);
            }
            if let Some(ref a) = info.author {
                println!("Author:       {}", a);
            }
            match info.page_count {
                Some(n) => println!("Pages:        {}", n),
                None => println!("Characters:   {}", info.char_count),
            }
        }
        return Ok(());
    }

    let exam_id = cli.exam_id.clone().unwrap_or_default();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn HarvestProgressCallback>)
    } else {
        None
    };

    let cancel = CancelFlag::new();
    let config = build_config(&cli, progress_cb, cancel.clone()).await?;

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", cyan("Interrupted; stopping before the next window…"));
                cancel.cancel();
            }
        });
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let output = if let Some(ref output_path) = cli.output {
        let output = harvest_to_file(&cli.input, &exam_id, output_path, &config)
            .await
            .context("Extraction failed")?;
        if !cli.quiet {
            eprintln!(
                "   {} records  →  {}",
                output.persistence.saved(),
                bold(&output_path.display().to_string())
            );
        }
        output
    } else {
        let sink = MemorySink::new();
        let output = harvest(&cli.input, &exam_id, &config, &sink)
            .await
            .context("Extraction failed")?;
        if !cli.json {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            for (_, record) in sink.records() {
                let line = serde_json::to_string(&record).context("Failed to serialise record")?;
                writeln!(handle, "{line}").context("Failed to write to stdout")?;
            }
        }
        output
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet {
        print_summary(&output, show_progress);
    }

    Ok(())
}

/// Question count, per-category counts, failed windows and failed saves.
fn print_summary(output: &ExtractionOutput, progress_shown: bool) {
    let stats = &output.stats;
    if !progress_shown {
        eprintln!(
            "Extracted {} questions from {} windows in {}ms",
            stats.question_count, stats.total_windows, stats.total_duration_ms
        );
    }
    for c in &output.categories {
        eprintln!("   {:<20} {}", c.category, dim(&c.count.to_string()));
    }
    eprintln!(
        "   {}",
        dim(&format!(
            "{} candidates  /  {} filtered  /  {} duplicates  /  {}ms total",
            stats.total_candidates, stats.filtered, stats.duplicates, stats.total_duration_ms
        ))
    );
    if stats.failed_windows > 0 {
        eprintln!(
            "   {} windows failed after retries",
            red(&stats.failed_windows.to_string())
        );
    }
    if !output.numbering.missing.is_empty() {
        eprintln!(
            "   {} numbering gaps up to {}: {:?}",
            cyan("⚠"),
            output.numbering.max_number,
            output.numbering.missing
        );
    }
    if stats.failed_saves > 0 {
        eprintln!("   {} records failed to save:", red(&stats.failed_saves.to_string()));
        for f in &output.persistence.failures {
            eprintln!("     {}  {}", f.signature, dim(&f.error));
        }
    }
}

/// Map CLI args (over an optional TOML file) to `ExtractionConfig`.
async fn build_config(
    cli: &Cli,
    progress: Option<ProgressCallback>,
    cancel: CancelFlag,
) -> Result<ExtractionConfig> {
    let base = if let Some(ref path) = cli.config {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        ExtractionConfig::from_toml(&text)
            .with_context(|| format!("Invalid config file {:?}", path))?
    } else {
        ExtractionConfig::default()
    };

    let prompt = if let Some(ref path) = cli.prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let mut builder = ExtractionConfigBuilder::from_config(base).cancel_flag(cancel);

    if let Some(v) = cli.window_size {
        builder = builder.window_size(v);
    }
    if let Some(v) = cli.overlap {
        builder = builder.overlap(v);
    }
    if let Some(ref v) = cli.model {
        builder = builder.model(v.clone());
    }
    if let Some(v) = cli.temperature {
        builder = builder.temperature(v);
    }
    if let Some(v) = cli.retry_temperature {
        builder = builder.retry_temperature(v);
    }
    if let Some(v) = cli.max_tokens {
        builder = builder.max_tokens(v);
    }
    if let Some(v) = cli.max_retries {
        builder = builder.max_retries(v);
    }
    if let Some(v) = cli.retry_backoff_ms {
        builder = builder.retry_backoff_ms(v);
    }
    if let Some(v) = cli.api_timeout {
        builder = builder.api_timeout_secs(v);
    }
    if let Some(v) = cli.download_timeout {
        builder = builder.download_timeout_secs(v);
    }
    if let Some(ref v) = cli.api_url {
        builder = builder.api_url(v.clone());
    }
    if let Some(ref v) = cli.api_key {
        builder = builder.api_key(v.clone());
    }
    if let Some(ref v) = cli.identity {
        builder = builder.identity_strategy(v.clone().into());
    }
    if let Some(ref v) = cli.merge_policy {
        builder = builder.merge_policy(v.clone().into());
    }
    if cli.keep_answer_only {
        builder = builder.keep_answer_only(true);
    }
    if cli.no_normalize {
        builder = builder.normalize_text(false);
    }
    if cli.no_sweep {
        builder = builder.retry_sweep(false);
    }
    if let Some(p) = prompt {
        builder = builder.prompt(p);
    }
    if let Some(ref p) = cli.password {
        builder = builder.password(p.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
