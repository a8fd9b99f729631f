//! Self-correction: decide whether a merged page warrants another pass.
//!
//! Refinement is the most expensive thing the pipeline can choose to do —
//! every cycle is more LLM calls — so it is bounded on three axes:
//!
//! 1. The feature gate (`iterative_refinement_enabled`) and the cycle
//!    ceiling (`max_refinement_cycles`) are checked *before* the analysis
//!    call; a ceiling of zero means the verdict model is never even asked.
//! 2. A `(strategy, missing_aspects)` focus never repeats. A strategy may
//!    run again, but only for a different stated gap.
//! 3. New steps per cycle are capped at `max(1, 4 − steps_so_far)`.
//!
//! Plans are extended, never rewritten: new steps take numbers strictly
//! above every existing one, and prior results are retained. Any analyzer
//! failure — call error, unparseable verdict — short-circuits to emit.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmCaller, ResponseFormat};
use crate::output::PageResult;
use crate::pipeline::plan::{ExtractionPlan, ExtractionStep, StrategyKind};
use crate::pipeline::strategy::repair_json;
use crate::prompts;

/// Ceiling on total plan length that refinement may push towards.
const TARGET_PLAN_STEPS: usize = 4;
const REFINE_MAX_TOKENS: u32 = 1000;

/// One strategy-with-focus that has already been tried for a page.
pub type TriedFocus = (StrategyKind, String);

/// What the analyzer decided.
#[derive(Debug)]
pub enum RefinementOutcome {
    /// The page is done; emit the merged record.
    Emit,
    /// Re-extract with these appended steps, then merge and ask again.
    Extend(Vec<ExtractionStep>),
}

/// The verdict shape requested from the model.
#[derive(Debug, Default, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    needs_refinement: bool,
    #[serde(default)]
    missing_aspects: Vec<String>,
    #[serde(default)]
    recommended_strategies: Vec<String>,
}

/// Decides emit-or-extend for merged page results.
pub struct RefinementAnalyzer {
    caller: LlmCaller,
    enabled: bool,
    max_cycles: u32,
    temperature: f32,
    timeout: Duration,
}

impl RefinementAnalyzer {
    pub fn new(
        caller: LlmCaller,
        enabled: bool,
        max_cycles: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Self {
        Self {
            caller,
            enabled,
            max_cycles,
            temperature,
            timeout,
        }
    }

    /// Assess a merged result after `cycle` completed refinement cycles.
    ///
    /// `tried` records every `(strategy, focus)` pair already executed for
    /// this page; it is updated with whatever this call schedules.
    pub async fn assess(
        &self,
        merged: &PageResult,
        plan: &ExtractionPlan,
        cycle: u32,
        tried: &mut HashSet<TriedFocus>,
    ) -> RefinementOutcome {
        // Gates first: a disabled loop or an exhausted budget never calls
        // the model at all.
        if !self.enabled || cycle >= self.max_cycles {
            return RefinementOutcome::Emit;
        }

        let verdict = match self.fetch_verdict(merged).await {
            Some(verdict) => verdict,
            None => return RefinementOutcome::Emit,
        };

        if !verdict.needs_refinement {
            debug!("page {}: refinement not needed", merged.page_index);
            return RefinementOutcome::Emit;
        }

        let focus = focus_key(&verdict.missing_aspects);
        let rationale = if verdict.missing_aspects.is_empty() {
            "refinement pass".to_string()
        } else {
            format!("refinement: missing {}", verdict.missing_aspects.join(", "))
        };

        let mut scheduled = Vec::new();
        for name in &verdict.recommended_strategies {
            let Some(kind) = StrategyKind::parse(name) else {
                warn!("refinement recommended unknown strategy '{name}', dropping");
                continue;
            };
            // A strategy may repeat only with a different stated focus.
            if tried.insert((kind, focus.clone())) {
                scheduled.push(kind);
            }
        }

        if scheduled.is_empty() {
            debug!(
                "page {}: every recommended strategy already tried with this focus",
                merged.page_index
            );
            return RefinementOutcome::Emit;
        }

        let budget = TARGET_PLAN_STEPS.saturating_sub(plan.steps.len()).max(1);
        scheduled.truncate(budget);

        let mut next_number = plan.next_step_number();
        let steps = scheduled
            .into_iter()
            .map(|strategy| {
                let step = ExtractionStep {
                    step_number: next_number,
                    strategy,
                    rationale: rationale.clone(),
                    is_fallback: false,
                };
                next_number += 1;
                step
            })
            .collect();
        RefinementOutcome::Extend(steps)
    }

    async fn fetch_verdict(&self, merged: &PageResult) -> Option<RawVerdict> {
        let record = serde_json::to_string(merged).ok()?;
        let request = CompletionRequest {
            messages: vec![
                ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
                ChatMessage::user(format!("{}{record}", prompts::REFINEMENT_PROMPT)),
            ],
            temperature: self.temperature,
            max_tokens: REFINE_MAX_TOKENS,
            response_format: ResponseFormat::JsonObject,
            timeout: self.timeout,
        };
        let model = self.caller.registry().default_models.extraction.clone();

        match self.caller.complete(&model, &request).await {
            Ok(outcome) => match repair_json(&outcome.completion.content) {
                Ok(value) => serde_json::from_value(value).ok(),
                Err(e) => {
                    warn!(
                        "page {}: refinement verdict unparseable ({e}), emitting",
                        merged.page_index
                    );
                    None
                }
            },
            Err(e) => {
                warn!(
                    "page {}: refinement call failed ({e}), emitting",
                    merged.page_index
                );
                None
            }
        }
    }
}

/// Canonical key for a set of missing aspects: case-folded, sorted, joined.
fn focus_key(aspects: &[String]) -> String {
    let mut parts: Vec<String> = aspects
        .iter()
        .map(|a| a.trim().to_ascii_lowercase())
        .filter(|a| !a.is_empty())
        .collect();
    parts.sort();
    parts.dedup();
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockReply, MockTransport};
    use crate::llm::{CallBudget, RetryPolicy};
    use crate::models::ModelRegistry;
    use crate::pipeline::plan::{PageComplexity, PlanOrigin};
    use serde_json::json;
    use std::sync::Arc;

    fn merged() -> PageResult {
        PageResult {
            page_index: 0,
            page_complexity: PageComplexity::Moderate,
            extraction_method: "smart_routing".into(),
            total_steps: 1,
            successful_steps: 1,
            main_title: Some("T".into()),
            page_summary: Some("S".into()),
            key_sections: vec![],
            visual_elements: vec![],
        }
    }

    fn plan(steps: &[StrategyKind]) -> ExtractionPlan {
        let mut plan = ExtractionPlan::new(0, PlanOrigin::SmartRouting);
        for kind in steps {
            plan.push(*kind, "initial", false);
        }
        plan
    }

    fn analyzer(transport: Arc<MockTransport>, enabled: bool, max_cycles: u32) -> RefinementAnalyzer {
        let caller = LlmCaller::new(
            transport,
            Arc::new(ModelRegistry::builtin()),
            Arc::new(CallBudget::new(600)),
            RetryPolicy {
                max_attempts: 1,
                initial_delay: Duration::from_millis(1),
            },
        );
        RefinementAnalyzer::new(caller, enabled, max_cycles, 0.1, Duration::from_secs(5))
    }

    fn tried_for(plan: &ExtractionPlan) -> HashSet<TriedFocus> {
        plan.steps
            .iter()
            .map(|s| (s.strategy, String::new()))
            .collect()
    }

    #[tokio::test]
    async fn disabled_refinement_never_calls_the_model() {
        let transport = Arc::new(MockTransport::always(MockReply::text("should not run")));
        let plan = plan(&[StrategyKind::Basic]);
        let outcome = analyzer(Arc::clone(&transport), false, 3)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        assert!(matches!(outcome, RefinementOutcome::Emit));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn zero_cycle_ceiling_disables_even_when_enabled() {
        let transport = Arc::new(MockTransport::always(MockReply::text("should not run")));
        let plan = plan(&[StrategyKind::Basic]);
        let outcome = analyzer(Arc::clone(&transport), true, 0)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        assert!(matches!(outcome, RefinementOutcome::Emit));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn negative_verdict_emits() {
        let transport = Arc::new(MockTransport::always(MockReply::json(
            json!({"needs_refinement": false}),
        )));
        let plan = plan(&[StrategyKind::Basic]);
        let outcome = analyzer(transport, true, 3)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        assert!(matches!(outcome, RefinementOutcome::Emit));
    }

    #[tokio::test]
    async fn unparseable_verdict_emits() {
        let transport = Arc::new(MockTransport::always(MockReply::text("not json")));
        let plan = plan(&[StrategyKind::Basic]);
        let outcome = analyzer(transport, true, 3)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        assert!(matches!(outcome, RefinementOutcome::Emit));
    }

    #[tokio::test]
    async fn extension_numbers_continue_after_plan() {
        let transport = Arc::new(MockTransport::always(MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["table rows"],
            "recommended_strategies": ["table_focused"]
        }))));
        let plan = plan(&[StrategyKind::Basic, StrategyKind::Visual]);
        let outcome = analyzer(transport, true, 3)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        match outcome {
            RefinementOutcome::Extend(steps) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].step_number, 3);
                assert_eq!(steps[0].strategy, StrategyKind::TableFocused);
                assert!(steps[0].rationale.contains("table rows"));
            }
            RefinementOutcome::Emit => panic!("expected Extend"),
        }
    }

    #[tokio::test]
    async fn repeated_focus_is_filtered_out() {
        let reply = MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["chart values"],
            "recommended_strategies": ["visual"]
        }));
        let transport = Arc::new(MockTransport::always(reply));
        let plan = plan(&[StrategyKind::Basic]);
        let analyzer = analyzer(transport, true, 5);
        let mut tried = tried_for(&plan);

        let first = analyzer.assess(&merged(), &plan, 0, &mut tried).await;
        assert!(matches!(first, RefinementOutcome::Extend(_)));

        // Identical verdict again: same (strategy, focus) pair, so nothing
        // new can be scheduled and the page emits.
        let second = analyzer.assess(&merged(), &plan, 1, &mut tried).await;
        assert!(matches!(second, RefinementOutcome::Emit));
    }

    #[tokio::test]
    async fn same_strategy_different_focus_is_allowed() {
        let transport = Arc::new(MockTransport::with_sequence(vec![
            MockReply::json(json!({
                "needs_refinement": true,
                "missing_aspects": ["chart values"],
                "recommended_strategies": ["visual"]
            })),
            MockReply::json(json!({
                "needs_refinement": true,
                "missing_aspects": ["diagram labels"],
                "recommended_strategies": ["visual"]
            })),
        ]));
        let plan = plan(&[StrategyKind::Basic]);
        let analyzer = analyzer(transport, true, 5);
        let mut tried = tried_for(&plan);

        assert!(matches!(
            analyzer.assess(&merged(), &plan, 0, &mut tried).await,
            RefinementOutcome::Extend(_)
        ));
        assert!(matches!(
            analyzer.assess(&merged(), &plan, 1, &mut tried).await,
            RefinementOutcome::Extend(_)
        ));
    }

    #[tokio::test]
    async fn new_steps_respect_plan_budget() {
        let transport = Arc::new(MockTransport::always(MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["everything"],
            "recommended_strategies": ["visual", "table_focused", "comprehensive"]
        }))));
        // Plan already at the four-step target: budget clamps to one.
        let plan = plan(&[
            StrategyKind::Minimal,
            StrategyKind::Basic,
            StrategyKind::Comprehensive,
            StrategyKind::Visual,
        ]);
        let outcome = analyzer(transport, true, 5)
            .assess(&merged(), &plan, 0, &mut tried_for(&plan))
            .await;
        match outcome {
            RefinementOutcome::Extend(steps) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].step_number, 5);
            }
            RefinementOutcome::Emit => panic!("expected Extend"),
        }
    }

    #[test]
    fn focus_key_is_order_and_case_insensitive() {
        let a = focus_key(&["Table Rows".into(), "chart values".into()]);
        let b = focus_key(&["chart values".into(), "table rows".into()]);
        assert_eq!(a, b);
        assert_ne!(a, focus_key(&["footnotes".into()]));
    }
}
