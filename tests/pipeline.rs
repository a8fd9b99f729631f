//! End-to-end pipeline tests over a scripted transport.
//!
//! No network, no pdfium: pages are constructed directly and the
//! [`MockTransport`] answers router, extraction, and refinement prompts by
//! matching on prompt text. These tests pin the pipeline's externally
//! observable contract: per-page records always come back, failures stay
//! contained, refinement stays bounded, and ordering is by page index.

use image::{DynamicImage, Rgba, RgbaImage};
use pdf2struct::llm::mock::{MockReply, MockTransport};
use pdf2struct::llm::{LlmErrorKind, LlmTransport};
use pdf2struct::{ModelRegistry, PageInput, Pipeline, PipelineConfig, StrategyKind};
use serde_json::json;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────

fn page(index: usize) -> PageInput {
    PageInput {
        page_index: index,
        page_width: 24,
        page_height: 24,
        image: DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            24,
            24,
            Rgba([255, 255, 255, 255]),
        )),
        text: format!("Embedded text of page {index}."),
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::builder()
        .concurrency_limit(4)
        .rate_limit_per_minute(600)
        .retry_max_attempts(1)
        .build()
        .expect("valid test config")
}

fn pipeline(config: PipelineConfig, transport: Arc<MockTransport>) -> Pipeline {
    Pipeline::new(config, ModelRegistry::builtin(), transport)
}

/// Needle matching the router prompt (and nothing else).
const ROUTER_NEEDLE: &str = "plan its extraction";
/// Needle matching the refinement prompt (and nothing else).
const REFINE_NEEDLE: &str = "another extraction pass";

fn router_reply(strategies: &[&str]) -> MockReply {
    MockReply::json(json!({
        "page_complexity": "moderate",
        "content_analysis": {"text_sections": 2, "visual_elements": 1},
        "recommended_strategies": strategies,
    }))
}

fn extraction_reply() -> MockReply {
    MockReply::json(json!({
        "main_title": "Quarterly Report",
        "page_summary": "Revenue and growth figures.",
        "key_sections": [
            {"section_title": "Overview", "content": "Revenue grew 12% to $4,500,000."}
        ]
    }))
}

// ── Scenario 1: happy path ───────────────────────────────────────────────

#[tokio::test]
async fn happy_path_three_pages() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![
            (ROUTER_NEEDLE, router_reply(&["basic"])),
            (REFINE_NEEDLE, MockReply::json(json!({"needs_refinement": false}))),
        ],
        extraction_reply(),
    ));
    let output = pipeline(config(), Arc::clone(&transport))
        .process_pages(vec![page(0), page(1), page(2)])
        .await;

    assert_eq!(output.pages.len(), 3);
    assert!(output.errors.is_empty());
    for page in &output.pages {
        assert_eq!(page.extraction_method, "smart_routing");
        assert!(page.total_steps >= 1);
        assert!(page.successful_steps <= page.total_steps);
        assert_eq!(page.main_title.as_deref(), Some("Quarterly Report"));
        assert!(!page.key_sections.is_empty());
    }
    // 1 router + 1 extraction call per page; refinement disabled by default.
    assert_eq!(transport.call_count(), 6);
}

// ── Scenario 2: router failure is never fatal ────────────────────────────

#[tokio::test]
async fn router_failure_degrades_to_fallback_plan() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![(
            ROUTER_NEEDLE,
            MockReply::error(LlmErrorKind::AuthFailure, "401 everywhere"),
        )],
        extraction_reply(),
    ));
    let output = pipeline(config(), transport)
        .process_pages(vec![page(0), page(1)])
        .await;

    assert_eq!(output.pages.len(), 2);
    assert!(output.errors.is_empty(), "routing failure is not a page error");
    for page in &output.pages {
        assert_eq!(page.extraction_method, "fallback");
        assert_eq!(page.total_steps, 1);
        assert_eq!(page.successful_steps, 1);
        assert!(page.main_title.is_some());
    }
}

// ── Scenario 3: partial step failure stays contained ─────────────────────

#[tokio::test]
async fn failed_step_on_one_page_leaves_siblings_untouched() {
    // The router recommends a table pass only for page 1 (matched via the
    // text preview quoted into the router prompt); table responses are
    // unparseable garbage, so that one step fails.
    let transport = Arc::new(MockTransport::with_rules(
        vec![
            ("Embedded text of page 1", router_reply(&["basic", "table_focused"])),
            (ROUTER_NEEDLE, router_reply(&["basic"])),
            ("tabular data", MockReply::text("-- no JSON to see here --")),
        ],
        extraction_reply(),
    ));
    let output = pipeline(config(), transport)
        .process_pages(vec![page(0), page(1), page(2)])
        .await;

    assert!(output.errors.is_empty(), "a failed step is not a page error");
    assert_eq!(output.pages.len(), 3);

    let failing = &output.pages[1];
    assert_eq!(failing.total_steps, 2);
    assert_eq!(failing.successful_steps, failing.total_steps - 1);
    // The basic step still populated the record.
    assert_eq!(failing.main_title.as_deref(), Some("Quarterly Report"));

    for ok_page in [&output.pages[0], &output.pages[2]] {
        assert_eq!(ok_page.total_steps, 1);
        assert_eq!(ok_page.successful_steps, 1);
    }
}

// ── Scenario 4: refinement is bounded by the cycle ceiling ───────────────

#[tokio::test]
async fn refinement_stops_at_max_cycles_even_when_always_requested() {
    // Single page, concurrency 1: call order is deterministic.
    // router → step1 → verdict(cycle 1) → step2 → verdict(cycle 2) → gate.
    let transport = Arc::new(MockTransport::with_sequence(vec![
        router_reply(&["basic"]),
        extraction_reply(),
        MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["chart values"],
            "recommended_strategies": ["visual"]
        })),
        extraction_reply(),
        MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["table rows"],
            "recommended_strategies": ["table_focused"]
        })),
        extraction_reply(),
    ]));
    let config = PipelineConfig::builder()
        .concurrency_limit(1)
        .rate_limit_per_minute(600)
        .retry_max_attempts(1)
        .iterative_refinement(true)
        .max_refinement_cycles(2)
        .build()
        .unwrap();

    let output = pipeline(config, Arc::clone(&transport))
        .process_pages(vec![page(0)])
        .await;

    let record = &output.pages[0];
    // 1 initial step + exactly 2 refinement rounds of 1 step each.
    assert_eq!(record.total_steps, 3);
    // router + 3 extractions + 2 verdicts; the ceiling gate stops the
    // third verdict before any call is made.
    assert_eq!(transport.call_count(), 6);
}

#[tokio::test]
async fn zero_cycle_ceiling_never_consults_the_analyzer() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![
            (ROUTER_NEEDLE, router_reply(&["basic"])),
            (REFINE_NEEDLE, MockReply::json(json!({"needs_refinement": true}))),
        ],
        extraction_reply(),
    ));
    let config = PipelineConfig::builder()
        .rate_limit_per_minute(600)
        .retry_max_attempts(1)
        .iterative_refinement(true)
        .max_refinement_cycles(0)
        .build()
        .unwrap();

    let output = pipeline(config, Arc::clone(&transport))
        .process_pages(vec![page(0)])
        .await;

    assert_eq!(output.pages[0].total_steps, 1);
    // router + one extraction; no verdict call.
    assert_eq!(transport.call_count(), 2);
}

// ── Refinement extends plans append-only ─────────────────────────────────

#[tokio::test]
async fn refinement_steps_are_numbered_after_initial_steps() {
    let transport = Arc::new(MockTransport::with_sequence(vec![
        router_reply(&["basic", "visual"]),
        extraction_reply(),
        extraction_reply(),
        MockReply::json(json!({
            "needs_refinement": true,
            "missing_aspects": ["table rows"],
            "recommended_strategies": ["table_focused"]
        })),
        // The refinement step's extraction, then the final negative verdict.
        MockReply::json(json!({
            "table_title": "Revenue",
            "headers": ["Region", "Revenue"],
            "rows": [["EMEA", "$1,200,000"]]
        })),
        MockReply::json(json!({"needs_refinement": false})),
    ]));
    let config = PipelineConfig::builder()
        .concurrency_limit(1)
        .rate_limit_per_minute(600)
        .retry_max_attempts(1)
        .iterative_refinement(true)
        .max_refinement_cycles(3)
        .build()
        .unwrap();

    let output = pipeline(config, transport)
        .process_pages(vec![page(0)])
        .await;

    let record = &output.pages[0];
    assert_eq!(record.total_steps, 3);
    assert_eq!(record.successful_steps, 3);
    // The refined table pass landed in the merged record.
    assert!(record
        .visual_elements
        .iter()
        .any(|v| v.element_type == "table" && v.title == "Revenue"));
}

// ── Boundary: serialised concurrency ─────────────────────────────────────

#[tokio::test]
async fn concurrency_of_one_serialises_and_completes() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![(ROUTER_NEEDLE, router_reply(&["minimal"]))],
        extraction_reply(),
    ));
    let config = PipelineConfig::builder()
        .concurrency_limit(1)
        .rate_limit_per_minute(600)
        .retry_max_attempts(1)
        .build()
        .unwrap();

    let output = pipeline(config, transport)
        .process_pages((0..6).map(page).collect())
        .await;

    assert_eq!(output.pages.len(), 6);
    let indices: Vec<usize> = output.pages.iter().map(|p| p.page_index).collect();
    assert_eq!(indices, (0..6).collect::<Vec<_>>());
}

// ── Cancellation: dropping the run stops new calls ───────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborting_the_run_issues_no_further_calls() {
    use std::time::Duration;

    let transport = Arc::new(
        MockTransport::with_rules(
            vec![(ROUTER_NEEDLE, router_reply(&["basic"]))],
            extraction_reply(),
        )
        .with_delay(Duration::from_millis(100)),
    );
    let pipe = Arc::new(pipeline(config(), Arc::clone(&transport)));

    let task = tokio::spawn({
        let pipe = Arc::clone(&pipe);
        async move { pipe.process_pages((0..8).map(page).collect()).await }
    });

    tokio::time::sleep(Duration::from_millis(30)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    // In-flight calls observe cancellation at their next await; nothing new
    // is issued afterwards.
    let after_abort = transport.call_count();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.call_count(), after_abort);
}

// ── JSON artifacts ───────────────────────────────────────────────────────

#[tokio::test]
async fn document_output_serialises_and_round_trips() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![(ROUTER_NEEDLE, router_reply(&["comprehensive"]))],
        extraction_reply(),
    ));
    let output = pipeline(config(), transport)
        .process_pages(vec![page(0)])
        .await;

    let json = serde_json::to_string_pretty(&output).expect("serialisable");
    let back: pdf2struct::DocumentOutput = serde_json::from_str(&json).expect("round-trips");
    assert_eq!(back.pages.len(), output.pages.len());
    assert_eq!(back.pages[0].page_index, 0);
}

// ── Custom registry end to end ───────────────────────────────────────────

#[tokio::test]
async fn yaml_registry_drives_the_fallback_chain() {
    let registry = ModelRegistry::from_yaml(concat!(
        "default_models:\n",
        "  router: flaky\n",
        "  extraction: flaky\n",
        "  summarizer: steady\n",
        "models:\n",
        "  flaky:\n",
        "    provider: openai\n",
        "    token_limit: 128000\n",
        "    is_vision_capable: true\n",
        "    fallback: steady\n",
        "  steady:\n",
        "    provider: gemini\n",
        "    token_limit: 128000\n",
        "    is_vision_capable: true\n",
    ))
    .expect("valid registry");

    // The primary model always fails terminally; every call lands on the
    // fallback. The run still completes with smart routing.
    let transport = Arc::new(MockTransport::with_sequence(vec![
        MockReply::error(LlmErrorKind::InvalidRequest, "400"),
        router_reply(&["basic"]),
        MockReply::error(LlmErrorKind::InvalidRequest, "400"),
        extraction_reply(),
    ]));
    let pipe = Pipeline::new(
        config(),
        registry,
        Arc::clone(&transport) as Arc<dyn LlmTransport>,
    );
    let output = pipe.process_pages(vec![page(0)]).await;

    assert_eq!(output.pages.len(), 1);
    assert_eq!(output.pages[0].extraction_method, "smart_routing");
    assert_eq!(output.pages[0].successful_steps, 1);
    assert_eq!(
        transport.models_called(),
        vec!["flaky", "steady", "flaky", "steady"]
    );
}

// ── Strategy surface sanity ──────────────────────────────────────────────

#[tokio::test]
async fn simple_pages_take_the_minimal_path() {
    let transport = Arc::new(MockTransport::with_rules(
        vec![(
            ROUTER_NEEDLE,
            MockReply::json(json!({
                "page_complexity": "simple",
                "recommended_strategies": ["comprehensive", "visual"]
            })),
        )],
        extraction_reply(),
    ));
    let output = pipeline(config(), transport)
        .process_pages(vec![page(0)])
        .await;

    let record = &output.pages[0];
    assert_eq!(record.total_steps, 1, "simple page collapses to one step");
    assert_eq!(
        StrategyKind::Minimal.as_str(),
        "minimal",
        "sanity: the collapsed step is the minimal strategy"
    );
}
