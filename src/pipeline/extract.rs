//! Plan execution: run each step's strategy against the page.
//!
//! Steps run strictly sequentially, never concurrently — later steps may
//! benefit from provider-side caching of the same page, and sequential
//! execution keeps per-page token cost linear. Cross-page parallelism is
//! the orchestrator's job; cross-call throttling is the rate limiter's.
//!
//! A failed step never aborts the plan: whatever went wrong (chain
//! exhaustion, unparseable response, unknown strategy id) is recorded in an
//! [`ExtractionResult`] with `success = false` and the next step proceeds.
//!
//! One special case: when a provider refuses a step on content-policy
//! grounds (recitation blocks on quoted material are the usual culprit),
//! the step is re-sent once with the strategy's paraphrase prompt, which
//! asks for synthesis instead of transcription.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::llm::{CompletionRequest, LlmCaller, ResponseFormat};
use crate::output::ExtractionResult;
use crate::pipeline::plan::ExtractionStep;
use crate::pipeline::render::PageInput;
use crate::pipeline::strategy::{PromptMode, StrategySet};

/// Executes extraction steps for one page at a time.
pub struct Extractor {
    caller: LlmCaller,
    strategies: Arc<StrategySet>,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl Extractor {
    pub fn new(
        caller: LlmCaller,
        strategies: Arc<StrategySet>,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            caller,
            strategies,
            temperature,
            max_tokens,
            timeout,
        }
    }

    /// Run one step of a plan. Always returns a result, never an error.
    pub async fn execute_step(&self, step: &ExtractionStep, page: &PageInput) -> ExtractionResult {
        let start = Instant::now();

        let Some(strategy) = self.strategies.get(step.strategy) else {
            // Registry and enum are expected to stay in sync; if they drift,
            // record the failure and keep the plan going.
            warn!("no strategy registered for '{}'", step.strategy);
            return self.failed(step, "strategy not registered", String::new(), start);
        };

        let model = self.caller.registry().default_models.extraction.clone();
        let mut mode = PromptMode::Verbatim;

        loop {
            let request = CompletionRequest {
                messages: strategy.prompt_for(page, mode),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                response_format: ResponseFormat::JsonObject,
                timeout: self.timeout,
            };

            match self.caller.complete(&model, &request).await {
                Ok(outcome) => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    return match strategy.parse(&outcome.completion.content) {
                        Ok(content) => {
                            debug!(
                                "page {} step {} ({}) ok in {elapsed_ms}ms via {}",
                                page.page_index, step.step_number, step.strategy, outcome.model_used
                            );
                            ExtractionResult {
                                step_number: step.step_number,
                                strategy: step.strategy,
                                success: true,
                                content,
                                error: None,
                                model_used: outcome.model_used,
                                elapsed_ms,
                            }
                        }
                        Err(parse_err) => {
                            warn!(
                                "page {} step {} ({}): {parse_err}",
                                page.page_index, step.step_number, step.strategy
                            );
                            self.failed(step, &parse_err.to_string(), outcome.model_used, start)
                        }
                    };
                }
                Err(e) if e.involves_content_policy() && mode == PromptMode::Verbatim => {
                    warn!(
                        "page {} step {} refused verbatim extraction, retrying with paraphrase prompt",
                        page.page_index, step.step_number
                    );
                    mode = PromptMode::Paraphrase;
                }
                Err(e) => {
                    warn!(
                        "page {} step {} ({}) failed: {e}",
                        page.page_index, step.step_number, step.strategy
                    );
                    return self.failed(step, &e.to_string(), String::new(), start);
                }
            }
        }
    }

    fn failed(
        &self,
        step: &ExtractionStep,
        error: &str,
        model_used: String,
        start: Instant,
    ) -> ExtractionResult {
        ExtractionResult {
            step_number: step.step_number,
            strategy: step.strategy,
            success: false,
            content: Default::default(),
            error: Some(error.to_string()),
            model_used,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockReply, MockTransport};
    use crate::llm::{CallBudget, LlmErrorKind, RetryPolicy};
    use crate::models::ModelRegistry;
    use crate::pipeline::plan::{ExtractionPlan, PlanOrigin, StrategyKind};
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    fn page() -> PageInput {
        PageInput {
            page_index: 0,
            page_width: 10,
            page_height: 10,
            image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                10,
                10,
                Rgba([255, 255, 255, 255]),
            )),
            text: "text".to_string(),
        }
    }

    fn extractor(transport: Arc<MockTransport>) -> Extractor {
        let caller = LlmCaller::new(
            transport,
            Arc::new(ModelRegistry::builtin()),
            Arc::new(CallBudget::new(600)),
            RetryPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
            },
        );
        Extractor::new(
            caller,
            Arc::new(StrategySet::defaults()),
            0.1,
            1024,
            Duration::from_secs(5),
        )
    }

    fn step(strategy: StrategyKind) -> ExtractionStep {
        let mut plan = ExtractionPlan::new(0, PlanOrigin::SmartRouting);
        plan.push(strategy, "test", false);
        plan.steps.remove(0)
    }

    #[tokio::test]
    async fn successful_step_records_model_and_content() {
        let transport = Arc::new(MockTransport::always(MockReply::json(json!({
            "main_title": "T",
            "page_summary": "S"
        }))));
        let result = extractor(transport)
            .execute_step(&step(StrategyKind::Basic), &page())
            .await;
        assert!(result.success);
        assert_eq!(result.content.main_title.as_deref(), Some("T"));
        assert_eq!(result.model_used, "gpt-4.1-mini");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn unparseable_response_is_recorded_not_raised() {
        let transport = Arc::new(MockTransport::always(MockReply::text("no json here")));
        let result = extractor(transport)
            .execute_step(&step(StrategyKind::Comprehensive), &page())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("unparseable"));
        assert!(result.content.is_empty());
    }

    #[tokio::test]
    async fn content_policy_refusal_switches_to_paraphrase() {
        // Every model in the chain refuses the first pass; the paraphrase
        // retry then succeeds on the primary.
        let transport = Arc::new(MockTransport::with_sequence(vec![
            MockReply::error(LlmErrorKind::ContentPolicy, "recitation"),
            MockReply::error(LlmErrorKind::ContentPolicy, "recitation"),
            MockReply::error(LlmErrorKind::ContentPolicy, "recitation"),
            MockReply::json(json!({"main_title": "Paraphrased"})),
        ]));
        let result = extractor(Arc::clone(&transport))
            .execute_step(&step(StrategyKind::Basic), &page())
            .await;
        assert!(result.success);
        assert_eq!(result.content.main_title.as_deref(), Some("Paraphrased"));
        // 3 refused chain links + 1 paraphrase success.
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test]
    async fn terminal_failure_yields_failed_result() {
        let transport = Arc::new(MockTransport::always(MockReply::error(
            LlmErrorKind::InvalidRequest,
            "image too large",
        )));
        let result = extractor(transport)
            .execute_step(&step(StrategyKind::Visual), &page())
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("exhausted"));
    }
}
