//! The orchestrator: drive every page through route → extract → merge →
//! refine, concurrently, under the shared call budget.
//!
//! Two independent bounds apply and compose:
//!
//! * **Pages in flight** — `buffer_unordered(concurrency_limit)` caps how
//!   many page tasks run at once. `1` serialises pages entirely.
//! * **Calls per minute** — the token bucket gates every LLM call across
//!   all pages, regardless of how many tasks are in flight.
//!
//! A page is a self-contained task: its failures are captured in its own
//! record and never cancel sibling pages. Within a page, extraction steps
//! and refinement cycles are strictly sequential — a page never has two
//! extractions in flight. Outer cancellation propagates at the next await
//! point of every in-flight task (futures drop), and the rate limiter does
//! not refund tokens for aborted calls.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::ExtractError;
use crate::llm::{CallBudget, HttpLlmClient, LlmCaller, LlmTransport, RetryPolicy};
use crate::models::ModelRegistry;
use crate::output::{DocumentOutput, PageFailure, PageResult, PipelineStats};
use crate::pipeline::extract::Extractor;
use crate::pipeline::merge::Merger;
use crate::pipeline::plan::StrategyKind;
use crate::pipeline::refine::{RefinementAnalyzer, RefinementOutcome};
use crate::pipeline::render::{self, PageInput};
use crate::pipeline::router::Router;
use crate::pipeline::strategy::StrategySet;

/// The assembled pipeline. Construction wires every stage to the same
/// transport, registry, call budget, and retry policy; nothing is global.
pub struct Pipeline {
    config: PipelineConfig,
    caller: LlmCaller,
    router: Router,
    extractor: Extractor,
    refiner: RefinementAnalyzer,
}

impl Pipeline {
    /// Wire a pipeline over an explicit transport (tests pass a mock here).
    pub fn new(
        config: PipelineConfig,
        registry: ModelRegistry,
        transport: Arc<dyn LlmTransport>,
    ) -> Self {
        let timeout = Duration::from_secs(config.api_timeout_secs);
        let caller = LlmCaller::new(
            transport,
            Arc::new(registry),
            Arc::new(CallBudget::new(config.rate_limit_per_minute)),
            RetryPolicy {
                max_attempts: config.retry_max_attempts,
                initial_delay: Duration::from_secs_f64(config.retry_initial_delay_secs),
            },
        );
        let strategies = Arc::new(StrategySet::defaults());

        let router = Router::new(caller.clone(), config.temperature, timeout);
        let extractor = Extractor::new(
            caller.clone(),
            strategies,
            config.temperature,
            config.max_tokens,
            timeout,
        );
        let refiner = RefinementAnalyzer::new(
            caller.clone(),
            config.iterative_refinement_enabled,
            config.max_refinement_cycles,
            config.temperature,
            timeout,
        );

        Self {
            config,
            caller,
            router,
            extractor,
            refiner,
        }
    }

    /// Wire a pipeline over the real HTTP client.
    pub fn with_http_client(config: PipelineConfig, registry: ModelRegistry) -> Self {
        Self::new(config, registry, Arc::new(HttpLlmClient::new()))
    }

    /// The composed LLM caller, for downstream stages (summariser).
    pub fn caller(&self) -> &LlmCaller {
        &self.caller
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a PDF end to end: render, then extract every page.
    pub async fn process_document(&self, pdf_path: &Path) -> Result<DocumentOutput, ExtractError> {
        let total_start = Instant::now();
        info!("processing {}", pdf_path.display());

        let render_start = Instant::now();
        let (pages, render_failures) = render::render_pages(pdf_path, &self.config).await?;
        let render_duration_ms = render_start.elapsed().as_millis() as u64;
        info!("rendered {} pages in {render_duration_ms}ms", pages.len());

        let mut output = self.process_pages(pages).await;
        for (page_index, detail) in render_failures {
            output.errors.push(PageFailure {
                page_index,
                kind: "terminal_other".to_string(),
                detail: format!("rasterisation failed: {detail}"),
            });
        }
        output.stats.failed_pages = output.errors.len();
        output.stats.total_pages = output.pages.len() + output.errors.len();
        output.stats.render_duration_ms = render_duration_ms;
        output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        info!(
            "document complete: {}/{} pages in {}ms",
            output.stats.processed_pages, output.stats.total_pages, output.stats.total_duration_ms
        );
        Ok(output)
    }

    /// Process already-rendered pages. Public so callers with their own
    /// renderer (and tests) can drive the core directly.
    pub async fn process_pages(&self, pages: Vec<PageInput>) -> DocumentOutput {
        let start = Instant::now();
        let total = pages.len();

        let mut results: Vec<PageResult> = stream::iter(
            pages
                .into_iter()
                .map(|page| async move { self.process_page(page).await }),
        )
        .buffer_unordered(self.config.concurrency_limit)
        .collect()
        .await;

        // Completion order is arbitrary; consumers get index order.
        results.sort_by_key(|p| p.page_index);

        let total_steps = results.iter().map(|p| p.total_steps).sum();
        let extraction_duration_ms = start.elapsed().as_millis() as u64;
        DocumentOutput {
            stats: PipelineStats {
                total_pages: total,
                processed_pages: results.len(),
                failed_pages: 0,
                total_steps,
                total_duration_ms: extraction_duration_ms,
                render_duration_ms: 0,
                extraction_duration_ms,
            },
            pages: results,
            errors: Vec::new(),
        }
    }

    /// One page, start to finish: route, then the extract → merge → refine
    /// loop until the analyzer emits or the cycle ceiling is reached.
    async fn process_page(&self, page: PageInput) -> PageResult {
        let routed = self.router.plan_page(&page).await;
        let mut plan = routed.plan;
        let analysis = routed.analysis;

        // Seed the focus book-keeping with the initial steps (empty focus).
        let mut tried: HashSet<(StrategyKind, String)> = plan
            .steps
            .iter()
            .map(|s| (s.strategy, String::new()))
            .collect();

        let mut results = Vec::with_capacity(plan.steps.len());
        let mut cursor = 0;
        let mut cycles = 0u32;

        loop {
            // Execute any steps not yet run, strictly in order.
            for step in plan.steps[cursor..].to_vec() {
                let result = self.extractor.execute_step(&step, &page).await;
                results.push(result);
            }
            cursor = plan.steps.len();

            let merged = Merger::merge(&page.text, &plan, &analysis, &results);

            match self.refiner.assess(&merged, &plan, cycles, &mut tried).await {
                RefinementOutcome::Emit => {
                    debug!(
                        "page {}: emitted after {} step(s), {} cycle(s)",
                        page.page_index,
                        merged.total_steps,
                        cycles
                    );
                    return merged;
                }
                RefinementOutcome::Extend(steps) => {
                    debug!(
                        "page {}: refinement cycle {} adds {} step(s)",
                        page.page_index,
                        cycles + 1,
                        steps.len()
                    );
                    plan.steps.extend(steps);
                    cycles += 1;
                }
            }
        }
    }
}
