//! # pdf2struct
//!
//! Convert PDF documents into structured records using Vision Language
//! Models under a routing/refinement control loop.
//!
//! ## Why this crate?
//!
//! One fixed prompt per page wastes money on simple pages and loses data on
//! complex ones. This crate instead *routes*: a cheap vision pass plans
//! which extraction strategies each page deserves, a bounded refinement
//! loop re-extracts when the merged result has concrete gaps, and the whole
//! thing runs behind rate limiting, retry, and a cross-provider fallback
//! chain so a single flaky endpoint never sinks a document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Render   rasterise pages + text layer via pdfium (spawn_blocking)
//!  ├─ 2. Route    vision analysis → per-page extraction plan
//!  ├─ 3. Extract  strategy passes (minimal / basic / comprehensive / …)
//!  ├─ 4. Merge    consolidate + de-duplicate into one record per page
//!  ├─ 5. Refine   bounded self-correction loop (optional)
//!  └─ 6. Output   page records + executive summary + chunked corpus
//! ```
//!
//! Every LLM call flows through the same composed stack:
//! `FallbackChain(Retry(RateLimited(RawCall)))`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2struct::{ModelRegistry, Pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials come from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let pipeline = Pipeline::with_http_client(config, ModelRegistry::builtin());
//!     let output = pipeline.process_document("document.pdf".as_ref()).await?;
//!     for page in &output.pages {
//!         println!(
//!             "page {}: {} ({}/{} steps ok)",
//!             page.page_index,
//!             page.main_title.as_deref().unwrap_or("(untitled)"),
//!             page.successful_steps,
//!             page.total_steps,
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2struct` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pdf2struct = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::ExtractError;
pub use llm::{HttpLlmClient, LlmCaller, LlmError, LlmErrorKind, LlmTransport};
pub use models::{ModelRegistry, ModelSpec, Provider};
pub use output::{DocumentOutput, ExtractionResult, PageFailure, PageResult, PipelineStats};
pub use pipeline::chunker::{chunk_results, Chunk};
pub use pipeline::plan::{ExtractionPlan, ExtractionStep, PageComplexity, RouterAnalysis, StrategyKind};
pub use pipeline::render::PageInput;
pub use pipeline::summarize::{executive_summary, ExecutiveSummary};
pub use process::Pipeline;
