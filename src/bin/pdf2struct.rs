//! CLI binary for pdf2struct.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! runs the pipeline, and writes the three artifacts into `--output_dir`.
//!
//! Exit codes: 0 full success, 2 partial success (some pages failed),
//! 1 unrecoverable (invalid config, unreadable input).

use anyhow::{Context, Result};
use clap::Parser;
use pdf2struct::{
    chunk_results, executive_summary, DocumentOutput, ModelRegistry, Pipeline, PipelineConfig,
};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic extraction
  pdf2struct report.pdf --output_dir out/

  # Heavier parallelism under a tighter call budget
  pdf2struct report.pdf --output_dir out/ --concurrency 10 --rate-limit 30

  # Enable the self-correcting refinement loop
  pdf2struct report.pdf --output_dir out/ --refine

  # Custom model registry
  pdf2struct report.pdf --output_dir out/ --models models.yaml

ARTIFACTS (written into --output_dir):
  extraction_results.json   per-page structured records + errors + stats
  executive_summary.json    document-level summary
  chunks.json               chunked text corpus for indexing

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY        OpenAI API key
  ANTHROPIC_API_KEY     Anthropic API key
  GEMINI_API_KEY        Google Gemini API key

Only the providers named in the model registry need credentials; a missing
key surfaces as an auth failure on first use and the fallback chain moves
on to the next model.
"#;

/// Convert PDF documents into structured records using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2struct",
    version,
    about = "Extract structured records from PDFs using Vision LLMs",
    arg_required_else_help = true,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path.
    pdf_path: PathBuf,

    /// Directory for the JSON artifacts (created if missing).
    #[arg(long = "output_dir", env = "PDF2STRUCT_OUTPUT_DIR")]
    output_dir: PathBuf,

    /// Model registry YAML; omit to use the built-in registry.
    #[arg(long, env = "PDF2STRUCT_MODELS")]
    models: Option<PathBuf>,

    /// Max pages processed concurrently.
    #[arg(long, env = "PDF2STRUCT_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Global LLM-call budget per minute.
    #[arg(long = "rate-limit", env = "PDF2STRUCT_RATE_LIMIT", default_value_t = 60)]
    rate_limit: u32,

    /// Attempts per LLM call, inclusive of the first try.
    #[arg(long, env = "PDF2STRUCT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Enable the iterative refinement loop.
    #[arg(long, env = "PDF2STRUCT_REFINE")]
    refine: bool,

    /// Max refinement cycles per page.
    #[arg(long, env = "PDF2STRUCT_REFINE_CYCLES", default_value_t = 2)]
    refine_cycles: u32,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDF2STRUCT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Per-LLM-call timeout in seconds.
    #[arg(long, env = "PDF2STRUCT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2STRUCT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2STRUCT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    // main() proper returns the exit code; anyhow errors map to 1.
    std::process::exit(match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    });
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    // ── Config + registry (exit 1 on any validation failure) ─────────────
    let config = PipelineConfig::builder()
        .dpi(cli.dpi)
        .concurrency_limit(cli.concurrency)
        .rate_limit_per_minute(cli.rate_limit)
        .retry_max_attempts(cli.max_retries)
        .iterative_refinement(cli.refine)
        .max_refinement_cycles(cli.refine_cycles)
        .api_timeout_secs(cli.api_timeout)
        .build()
        .context("Invalid configuration")?;

    let registry = match &cli.models {
        Some(path) => ModelRegistry::load(path).context("Invalid model registry")?,
        None => ModelRegistry::builtin(),
    };

    // ── Run the pipeline ─────────────────────────────────────────────────
    let timeout = Duration::from_secs(config.api_timeout_secs);
    let temperature = config.temperature;
    let pipeline = Pipeline::with_http_client(config, registry);

    let output = pipeline
        .process_document(&cli.pdf_path)
        .await
        .context("Extraction failed")?;

    // ── Downstream artifacts ─────────────────────────────────────────────
    let summary = executive_summary(pipeline.caller(), temperature, timeout, &output.pages).await;
    let chunks = chunk_results(&output.pages, pipeline.config());

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("Cannot create output dir {}", cli.output_dir.display()))?;
    write_json(&cli.output_dir.join("extraction_results.json"), &output).await?;
    write_json(&cli.output_dir.join("executive_summary.json"), &summary).await?;
    write_json(&cli.output_dir.join("chunks.json"), &chunks).await?;

    if !cli.quiet {
        report(&output, chunks.len());
    }

    Ok(if output.errors.is_empty() { 0 } else { 2 })
}

/// Atomic JSON write: temp file + rename, so a crash never leaves a
/// half-written artifact.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise artifact")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move artifact into place at {}", path.display()))?;
    Ok(())
}

fn report(output: &DocumentOutput, chunk_count: usize) {
    eprintln!(
        "{}/{} pages extracted ({} steps, {}ms total), {} chunks",
        output.stats.processed_pages,
        output.stats.total_pages,
        output.stats.total_steps,
        output.stats.total_duration_ms,
        chunk_count,
    );
    for failure in &output.errors {
        eprintln!(
            "  page {} failed ({}): {}",
            failure.page_index + 1,
            failure.kind,
            failure.detail
        );
    }
}
