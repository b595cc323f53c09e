//! CLI binary for visai-client.
//!
//! A thin shim over the library crate that maps CLI flags to `ClientConfig`,
//! runs one document through the workflow and prints results.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use visai_client::{
    ClientConfig, ExtractionJob, ExtractionResult, ExtractionStatus, Fields, PollFailurePolicy,
    PollState, SubmissionOutcome, TransportError, VerificationOutcome, Workflow,
    WorkflowObserver, WorkflowSnapshot, KNOWN_FIELDS,
};

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

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner while the document uploads and OCR runs,
/// with one log line per notable event printed above it.
struct CliObserver {
    bar: ProgressBar,
    polls: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            polls: AtomicUsize::new(0),
        })
    }
}

impl WorkflowObserver for CliObserver {
    fn on_upload_start(&self, file_name: &str) {
        self.bar.set_prefix("Uploading");
        self.bar.set_message(file_name.to_string());
    }

    fn on_job_created(&self, job: &ExtractionJob) {
        self.bar.println(format!("{} {}", cyan("◆"), bold(&format!("Job {}", job.id))));
        self.bar.set_prefix("Extracting");
        self.bar.set_message("waiting for OCR…");
    }

    fn on_poll_result(&self, _job_id: &str, result: &ExtractionResult) {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        self.bar.set_message(format!("poll #{n}: {}", result.status));
    }

    fn on_poll_error(&self, _job_id: &str, error: &TransportError, consecutive: u32) {
        let msg = error.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar.println(format!(
            "  {} poll failed ({consecutive} in a row)  {}",
            red("✗"),
            dim(&msg)
        ));
    }

    fn on_draft_initialized(&self, _job_id: &str, draft: &Fields) {
        self.bar.println(format!(
            "  {} {} fields extracted",
            green("✓"),
            draft.len()
        ));
    }

    fn on_poll_stopped(&self, _job_id: &str, _state: PollState) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract fields from a passport scan and print them
  visai passport.jpg

  # Correct a field, verify and submit
  visai passport.jpg --set name="Anna Smith" --submit

  # Talk to a remote service, give up after 5 failed polls
  visai --api-base https://extract.example.com --max-poll-failures 5 scan.pdf

  # JSON snapshot of the whole workflow
  visai --json --submit scan.png > result.json

ACCEPTED FILES:
  .jpg, .jpeg, .png, .pdf   (other files are sent with a warning unless
                            --strict-types is given)

ENVIRONMENT VARIABLES:
  API_BASE                  Base URL of the extraction service
                            (default http://localhost:8000)
  VISAI_POLL_INTERVAL_MS    Delay between status polls (default 1500)
  VISAI_MAX_POLL_FAILURES   Stop after this many failed polls in a row
  RUST_LOG                  Override log filter (e.g. visai_client=debug)
"#;

/// Extract structured fields from identity documents via an OCR service.
#[derive(Parser, Debug)]
#[command(
    name = "visai",
    version,
    about = "Upload a document for OCR extraction, review the fields, verify and submit",
    long_about = "Upload a passport or ID scan to a visai extraction service, wait for OCR to \
finish, optionally correct extracted fields, validate them and submit the result.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document to upload (.jpg, .jpeg, .png or .pdf).
    file: PathBuf,

    /// Base URL of the extraction service.
    #[arg(long, env = "API_BASE", default_value = visai_client::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Delay between status polls, in milliseconds.
    #[arg(long, env = "VISAI_POLL_INTERVAL_MS", default_value_t = 1500,
          value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_ms: u64,

    /// Stop polling after this many consecutive failures (default: keep polling).
    #[arg(long, env = "VISAI_MAX_POLL_FAILURES",
          value_parser = clap::value_parser!(u32).range(1..))]
    max_poll_failures: Option<u32>,

    /// Override a draft field before verifying: KEY=VALUE. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_set)]
    set: Vec<(String, String)>,

    /// Do not call the verify endpoint.
    #[arg(long)]
    skip_verify: bool,

    /// Submit the draft after verification.
    #[arg(long)]
    submit: bool,

    /// Refuse files that are not images or PDFs.
    #[arg(long)]
    strict_types: bool,

    /// Output the final workflow snapshot as JSON.
    #[arg(long)]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "VISAI_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// Disable the spinner.
    #[arg(long)]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers INFO-level progress, so only errors are logged
    // while it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Build config ─────────────────────────────────────────────────────
    let mut builder = ClientConfig::builder()
        .api_base(cli.api_base.clone())
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .strict_file_types(cli.strict_types);
    if let Some(n) = cli.max_poll_failures {
        builder = builder.poll_failure_policy(PollFailurePolicy::GiveUpAfter(n));
    }
    if show_progress {
        builder = builder.observer(CliObserver::new());
    }
    let config = builder.build().context("Invalid configuration")?;

    let workflow = Workflow::from_config(config).context("Failed to create HTTP client")?;

    // ── Upload + poll ────────────────────────────────────────────────────
    let job = workflow
        .upload_path(&cli.file)
        .await
        .with_context(|| format!("Upload of {} failed", cli.file.display()))?;

    let settled = workflow.wait_until_settled().await;
    if settled.poll_state == PollState::Failed {
        if cli.json {
            print_json(&settled)?;
        }
        bail!("Extraction for {} failed: {}", job.id, failure_reason(&settled));
    }

    // ── Draft edits ──────────────────────────────────────────────────────
    if settled.draft.is_none() {
        if cli.json {
            print_json(&settled)?;
        }
        bail!("Extraction for {} finished without any fields", job.id);
    }
    for (key, value) in &cli.set {
        workflow
            .set_field(key.clone(), value.clone())
            .with_context(|| format!("Failed to set field '{key}'"))?;
    }

    if !cli.quiet && !cli.json {
        if cli.verbose {
            if let Some(text) = settled.latest.as_ref().and_then(|r| r.raw_text.as_deref()) {
                eprintln!("{}", dim("── raw text ──"));
                eprintln!("{}", dim(text.trim()));
            }
        }
        if let Some(draft) = workflow.draft() {
            print_fields(&draft);
        }
    }

    // ── Verify ───────────────────────────────────────────────────────────
    if !cli.skip_verify {
        let outcome = workflow.verify().await.context("Verification failed")?;
        if !cli.quiet && !cli.json {
            print_verification(&outcome);
        }
    }

    // ── Submit ───────────────────────────────────────────────────────────
    let mut rejected = false;
    if cli.submit {
        let outcome = workflow.submit().await.context("Submission failed")?;
        rejected = !outcome.is_submitted();
        if !cli.quiet && !cli.json {
            print_submission(&outcome);
        }
    }

    if cli.json {
        print_json(&workflow.snapshot())?;
    }

    if rejected {
        bail!("Submission for {} was not accepted", job.id);
    }
    Ok(())
}

fn print_json(snapshot: &WorkflowSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialise snapshot")?;
    println!("{json}");
    Ok(())
}

fn failure_reason(snapshot: &WorkflowSnapshot) -> String {
    if let Some(ExtractionStatus::Failed(Some(detail))) =
        snapshot.latest.as_ref().map(|r| &r.status)
    {
        return detail.clone();
    }
    match &snapshot.last_poll_error {
        Some(err) => format!(
            "gave up after {} failed polls ({err})",
            snapshot.consecutive_poll_failures
        ),
        None => "service reported failure".to_string(),
    }
}

/// Known fields first in their conventional order, then anything else.
fn print_fields(draft: &Fields) {
    let width = draft.keys().map(|k| k.len()).max().unwrap_or(0);
    let known = KNOWN_FIELDS.iter().filter_map(|k| draft.get_key_value(*k));
    let extra = draft
        .iter()
        .filter(|(k, _)| !KNOWN_FIELDS.contains(&k.as_str()));
    for (key, value) in known.chain(extra) {
        let shown = if value.is_empty() {
            dim("(empty)")
        } else {
            value.clone()
        };
        println!("{:<width$}  {}", bold(key), shown, width = width + 8);
    }
}

fn print_verification(outcome: &VerificationOutcome) {
    if outcome.valid {
        eprintln!("{} fields verified", green("✔"));
        return;
    }
    eprintln!(
        "{} {} validation error(s)",
        cyan("⚠"),
        bold(&outcome.errors.len().to_string())
    );
    for (field, message) in &outcome.errors {
        eprintln!("  {} {field}: {}", red("✗"), message);
    }
}

fn print_submission(outcome: &SubmissionOutcome) {
    if outcome.is_submitted() {
        eprintln!("{} submitted {}", green("✔"), bold(&outcome.extraction_id));
    } else {
        eprintln!("{} submission for {} rejected", red("✘"), outcome.extraction_id);
    }
}

/// Parse one `--set KEY=VALUE` argument. The value may contain `=`.
fn parse_set(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
