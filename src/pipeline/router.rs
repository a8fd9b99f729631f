//! Per-page planner: turn a vision model's free-form page analysis into a
//! validated, bounded extraction plan.
//!
//! The router is the one place where LLM judgement decides control flow, so
//! it is also the place most hardened against LLM failure:
//!
//! * The call goes through the full fallback/retry/rate-limit stack.
//! * The response is parsed tolerantly ([`RouterAnalysis`]).
//! * Any upstream failure — chain exhaustion, unparseable JSON — yields the
//!   **default plan** (one `comprehensive` step, `is_fallback = true`)
//!   instead of an error. Routing failure is never fatal to a page.
//!
//! Tie-breaks bound cost: a `simple` page gets a single `minimal` step no
//! matter what was recommended, an empty recommendation list gets a
//! `comprehensive` step, and plans are truncated to four steps.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmCaller, ResponseFormat};
use crate::pipeline::plan::{
    validate_recommendations, ExtractionPlan, FlexCount, PageComplexity, PlanOrigin,
    RouterAnalysis, StrategyKind,
};
use crate::pipeline::render::PageInput;
use crate::pipeline::strategy::{repair_json, text_preview, vision_message};
use crate::prompts;

/// Upper bound on plan length; anything longer burns tokens for little gain.
const MAX_PLAN_STEPS: usize = 4;
/// Analysis responses are small; no reason to allow a runaway completion.
const ROUTER_MAX_TOKENS: u32 = 3000;
/// How much embedded page text is quoted alongside the image.
const ROUTER_TEXT_PREVIEW_CHARS: usize = 500;

/// A routed page: the plan to execute plus the analysis that produced it.
#[derive(Debug, Clone)]
pub struct RoutedPage {
    pub plan: ExtractionPlan,
    pub analysis: RouterAnalysis,
}

/// The per-page planner.
pub struct Router {
    caller: LlmCaller,
    temperature: f32,
    timeout: Duration,
}

impl Router {
    pub fn new(caller: LlmCaller, temperature: f32, timeout: Duration) -> Self {
        Self {
            caller,
            temperature,
            timeout,
        }
    }

    /// Analyze one page and produce its plan. Never fails.
    pub async fn plan_page(&self, page: &PageInput) -> RoutedPage {
        let request = self.build_request(page);
        let model = self.caller.registry().default_models.router.clone();

        let analysis = match self.caller.complete(&model, &request).await {
            Ok(outcome) => match parse_analysis(&outcome.completion.content) {
                Some(analysis) => analysis,
                None => {
                    warn!(
                        "page {}: router response unparseable, using fallback plan",
                        page.page_index
                    );
                    return fallback_page(page.page_index);
                }
            },
            Err(e) => {
                warn!(
                    "page {}: router call failed ({e}), using fallback plan",
                    page.page_index
                );
                return fallback_page(page.page_index);
            }
        };

        let plan = build_plan(page.page_index, &analysis);
        debug!(
            "page {}: complexity={}, {} step(s)",
            page.page_index,
            analysis.page_complexity,
            plan.steps.len()
        );
        RoutedPage { plan, analysis }
    }

    fn build_request(&self, page: &PageInput) -> CompletionRequest {
        let mut prompt = prompts::ROUTER_ANALYSIS_PROMPT.to_string();
        if !page.text.trim().is_empty() {
            prompt.push_str("\n\nText preview from page:\n");
            prompt.push_str(&text_preview(&page.text, ROUTER_TEXT_PREVIEW_CHARS));
        }
        CompletionRequest {
            messages: vec![
                ChatMessage::system(prompts::ROUTER_SYSTEM_PROMPT),
                vision_message(page, &prompt),
            ],
            temperature: self.temperature,
            max_tokens: ROUTER_MAX_TOKENS,
            response_format: ResponseFormat::JsonObject,
            timeout: self.timeout,
        }
    }
}

/// The plan used when routing fails entirely: one comprehensive pass.
fn fallback_page(page_index: usize) -> RoutedPage {
    let mut plan = ExtractionPlan::new(page_index, PlanOrigin::Fallback);
    plan.push(
        StrategyKind::Comprehensive,
        "routing failed: single comprehensive pass",
        true,
    );
    RoutedPage {
        plan,
        analysis: RouterAnalysis::unknown(),
    }
}

// ── Response parsing ─────────────────────────────────────────────────────

/// A recommended-strategy entry as the model returns it: a bare name or an
/// object with a rationale.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecommendation {
    Name(String),
    Detailed {
        strategy: String,
        #[serde(default)]
        rationale: String,
    },
    /// Anything else the model invented; dropped downstream.
    Other(serde_json::Value),
}

impl RawRecommendation {
    fn into_pair(self) -> (String, String) {
        match self {
            RawRecommendation::Name(name) => (name, String::new()),
            RawRecommendation::Detailed {
                strategy,
                rationale,
            } => (strategy, rationale),
            RawRecommendation::Other(value) => (value.to_string(), String::new()),
        }
    }
}

/// A plan entry in the older `extraction_plans` shape some models emit.
#[derive(Debug, Deserialize)]
struct RawPlanStep {
    strategy: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContentAnalysis {
    #[serde(default)]
    has_dense_table: bool,
    #[serde(default)]
    table_count: Option<FlexCount>,
    #[serde(default)]
    table_info: Option<FlexCount>,
    #[serde(default)]
    text_sections: Option<FlexCount>,
    #[serde(default)]
    visual_elements: Option<FlexCount>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    page_complexity: Option<String>,
    #[serde(default)]
    content_analysis: Option<RawContentAnalysis>,
    #[serde(default)]
    recommended_strategies: Vec<RawRecommendation>,
    #[serde(default)]
    extraction_plans: Vec<RawPlanStep>,
    #[serde(default)]
    warnings: Vec<String>,
}

/// Tolerant parse of the router's JSON. `None` means nothing usable was
/// recovered and the caller should fall back.
pub(crate) fn parse_analysis(raw: &str) -> Option<RouterAnalysis> {
    let mut value = repair_json(raw).ok()?;

    // Some models nest the payload one level down.
    if let Some(nested) = value.get("document_analysis") {
        value = nested.clone();
    }

    let parsed: RawAnalysis = serde_json::from_value(value).ok()?;

    let mut raw_recommendations: Vec<(String, String)> = parsed
        .recommended_strategies
        .into_iter()
        .map(RawRecommendation::into_pair)
        .collect();
    if raw_recommendations.is_empty() {
        raw_recommendations = parsed
            .extraction_plans
            .into_iter()
            .map(|step| (step.strategy, step.description))
            .collect();
    }

    let content = parsed.content_analysis.unwrap_or_default();
    Some(RouterAnalysis {
        page_complexity: parsed
            .page_complexity
            .as_deref()
            .map(PageComplexity::parse)
            .unwrap_or_default(),
        has_dense_table: content.has_dense_table,
        table_count: content
            .table_count
            .or(content.table_info)
            .unwrap_or_default(),
        text_sections: content.text_sections.unwrap_or_default(),
        visual_elements: content.visual_elements.unwrap_or_default(),
        recommended: validate_recommendations(raw_recommendations),
        warnings: parsed.warnings,
    })
}

/// Apply the tie-break rules and produce the final plan.
fn build_plan(page_index: usize, analysis: &RouterAnalysis) -> ExtractionPlan {
    let mut plan = ExtractionPlan::new(page_index, PlanOrigin::SmartRouting);

    // Cost guard: a simple page gets one cheap pass, whatever was asked.
    if analysis.page_complexity == PageComplexity::Simple {
        plan.push(
            StrategyKind::Minimal,
            "simple page: one minimal pass suffices",
            false,
        );
        return plan;
    }

    let mut recommended = analysis.recommended.clone();
    if recommended.len() > MAX_PLAN_STEPS {
        warn!(
            "page {page_index}: router recommended {} strategies, truncating to {MAX_PLAN_STEPS}",
            recommended.len()
        );
        recommended.truncate(MAX_PLAN_STEPS);
    }

    for (kind, rationale) in recommended {
        let rationale = if rationale.is_empty() {
            format!("router recommended {kind}")
        } else {
            rationale
        };
        plan.push(kind, rationale, false);
    }

    // A plan must always have at least one step; an empty recommendation
    // list on a non-trivial page gets the thorough default.
    if plan.steps.is_empty() {
        let rationale = if analysis.has_nontrivial_content() {
            "router described content but recommended nothing: comprehensive pass"
        } else {
            "no usable recommendation: comprehensive pass"
        };
        plan.push(StrategyKind::Comprehensive, rationale, false);
    }

    plan
}
