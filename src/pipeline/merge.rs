//! Result consolidation: many step results → one page record.
//!
//! Merge policy:
//!
//! * **Scalars** (`main_title`, `page_summary`) — first non-empty value from
//!   the highest-ranked strategy; ties broken by step order. Ranking is
//!   `comprehensive > basic > visual > table_focused > minimal`, because a
//!   comprehensive pass that saw everything beats a minimal pass that
//!   skimmed.
//! * **Sections** — concatenated in step order, de-duplicated by
//!   `section_id` (a pure content hash, so two steps that transcribed the
//!   same paragraph collapse to one entry).
//! * **Visual elements** — table fragments with the same title merge their
//!   rows first, then elements de-duplicate by `(element_type, title)`,
//!   keeping whichever duplicate carries more populated fields.
//! * **Counts** — `total_steps` and `successful_steps` are computed from
//!   the results actually present, never copied from the plan.
//!
//! When every step came back empty the merger falls back to the page's raw
//! text — the first non-empty line becomes the title, the text becomes a
//! fallback section — so downstream consumers never see a hole where a
//! page should be. Merging is idempotent: feeding a merged record back
//! through (as a singleton result) reproduces it.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::output::{ExtractionResult, PageContent, PageResult, Section, VisualElement};
use crate::pipeline::plan::{ExtractionPlan, RouterAnalysis};
use crate::pipeline::strategy::section_id;

/// Stateless merger; all inputs arrive per call.
pub struct Merger;

impl Merger {
    /// Consolidate `results` into the page's terminal record.
    pub fn merge(
        raw_text: &str,
        plan: &ExtractionPlan,
        analysis: &RouterAnalysis,
        results: &[ExtractionResult],
    ) -> PageResult {
        let successful: Vec<&ExtractionResult> = results.iter().filter(|r| r.success).collect();

        let main_title = pick_scalar(&successful, |c| c.main_title.as_deref());
        let page_summary = pick_scalar(&successful, |c| c.page_summary.as_deref());

        let mut key_sections = Vec::new();
        let mut seen_sections = HashSet::new();
        for result in &successful {
            for section in &result.content.key_sections {
                let id = if section.section_id.is_empty() {
                    section_id(&section.content)
                } else {
                    section.section_id.clone()
                };
                if seen_sections.insert(id.clone()) {
                    key_sections.push(Section {
                        section_id: id,
                        ..section.clone()
                    });
                }
            }
        }

        let all_visuals: Vec<VisualElement> = successful
            .iter()
            .flat_map(|r| r.content.visual_elements.iter().cloned())
            .collect();
        let visual_elements = dedupe_visuals(merge_table_fragments(all_visuals));

        let mut page = PageResult {
            page_index: plan.page_index,
            page_complexity: analysis.page_complexity,
            extraction_method: plan.origin.as_str().to_string(),
            total_steps: results.len(),
            successful_steps: successful.len(),
            main_title,
            page_summary,
            key_sections,
            visual_elements,
        };

        raw_text_fallback(&mut page, raw_text);
        page
    }
}

/// Highest strategy rank wins; step order breaks ties. Results arrive in
/// step order, so a stable sort by descending rank preserves it.
fn pick_scalar<'a>(
    successful: &[&'a ExtractionResult],
    get: impl Fn(&'a PageContent) -> Option<&'a str>,
) -> Option<String> {
    let mut ranked: Vec<&&ExtractionResult> = successful.iter().collect();
    ranked.sort_by_key(|r| std::cmp::Reverse(r.strategy.rank()));
    ranked
        .iter()
        .filter_map(|r| get(&r.content))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Merge `table` elements that share a title: different steps (or chunked
/// passes) each saw part of the same table, so their rows concatenate in
/// arrival order under the first fragment's headers.
fn merge_table_fragments(visuals: Vec<VisualElement>) -> Vec<VisualElement> {
    let mut merged: Vec<VisualElement> = Vec::with_capacity(visuals.len());
    for element in visuals {
        if element.element_type == "table" {
            if let Some(existing) = merged
                .iter_mut()
                .find(|m| m.element_type == "table" && m.title == element.title)
            {
                let extra_rows = element
                    .details
                    .get("rows")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if !extra_rows.is_empty() {
                    let rows = existing
                        .details
                        .entry("rows".to_string())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    if let Some(rows) = rows.as_array_mut() {
                        // Skip fragments that duplicate rows we already hold.
                        for row in extra_rows {
                            if !rows.contains(&row) {
                                rows.push(row);
                            }
                        }
                    }
                }
                continue;
            }
        }
        merged.push(element);
    }
    merged
}

/// De-duplicate by `(element_type, title)`, preferring the richer entry.
fn dedupe_visuals(visuals: Vec<VisualElement>) -> Vec<VisualElement> {
    let mut unique: Vec<VisualElement> = Vec::with_capacity(visuals.len());
    for element in visuals {
        match unique
            .iter_mut()
            .find(|u| u.element_type == element.element_type && u.title == element.title)
        {
            Some(existing) => {
                if element.populated_fields() > existing.populated_fields() {
                    *existing = element;
                }
            }
            None => unique.push(element),
        }
    }
    unique
}

/// Last resort: when no step produced anything, salvage the raw text layer.
fn raw_text_fallback(page: &mut PageResult, raw_text: &str) {
    let has_content = page.main_title.is_some()
        || page.page_summary.is_some()
        || !page.key_sections.is_empty()
        || !page.visual_elements.is_empty();
    if has_content || raw_text.trim().is_empty() {
        return;
    }

    debug!(
        "page {}: no extracted content, falling back to raw text ({} chars)",
        page.page_index,
        raw_text.len()
    );

    let title: String = raw_text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("Untitled Page")
        .chars()
        .take(200)
        .collect();
    page.main_title = Some(title);
    page.page_summary = Some(format!("Raw text extraction ({} characters)", raw_text.len()));
    let body = Value::String(raw_text.to_string());
    page.key_sections.push(Section {
        section_id: section_id(&body),
        section_title: "Raw Page Content (Fallback)".to_string(),
        content: body,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::plan::{PageComplexity, PlanOrigin, StrategyKind};
    use serde_json::json;

    fn plan() -> ExtractionPlan {
        let mut plan = ExtractionPlan::new(2, PlanOrigin::SmartRouting);
        plan.push(StrategyKind::Minimal, "test", false);
        plan.push(StrategyKind::Comprehensive, "test", false);
        plan
    }

    fn analysis() -> RouterAnalysis {
        RouterAnalysis {
            page_complexity: PageComplexity::Moderate,
            ..Default::default()
        }
    }

    fn result(step: u32, strategy: StrategyKind, success: bool, content: PageContent) -> ExtractionResult {
        ExtractionResult {
            step_number: step,
            strategy,
            success,
            content,
            error: if success { None } else { Some("boom".into()) },
            model_used: "gpt-4.1-mini".into(),
            elapsed_ms: 10,
        }
    }

    fn section(title: &str, body: &str) -> Section {
        let content = json!(body);
        Section {
            section_id: section_id(&content),
            section_title: title.to_string(),
            content,
        }
    }

    #[test]
    fn scalar_prefers_higher_ranked_strategy() {
        let minimal = PageContent {
            main_title: Some("minimal title".into()),
            ..Default::default()
        };
        let comprehensive = PageContent {
            main_title: Some("comprehensive title".into()),
            ..Default::default()
        };
        // Minimal ran first, comprehensive second; rank must beat order.
        let results = vec![
            result(1, StrategyKind::Minimal, true, minimal),
            result(2, StrategyKind::Comprehensive, true, comprehensive),
        ];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.main_title.as_deref(), Some("comprehensive title"));
    }

    #[test]
    fn counts_come_from_results_not_plan() {
        let results = vec![
            result(1, StrategyKind::Minimal, true, PageContent::default()),
            result(2, StrategyKind::Comprehensive, false, PageContent::default()),
            result(3, StrategyKind::TableFocused, false, PageContent::default()),
        ];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.total_steps, 3);
        assert_eq!(page.successful_steps, 1);
        assert!(page.successful_steps <= page.total_steps);
    }

    #[test]
    fn sections_dedupe_by_content_hash() {
        let a = PageContent {
            key_sections: vec![section("Intro", "same   text"), section("Other", "unique")],
            ..Default::default()
        };
        let b = PageContent {
            // Same body, different whitespace → same id → dropped.
            key_sections: vec![section("Intro copy", "same text")],
            ..Default::default()
        };
        let results = vec![
            result(1, StrategyKind::Basic, true, a),
            result(2, StrategyKind::Comprehensive, true, b),
        ];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.key_sections.len(), 2);
        assert_eq!(page.key_sections[0].section_title, "Intro");
    }

    #[test]
    fn visuals_prefer_richer_duplicate() {
        let sparse = VisualElement {
            element_type: "line_chart".into(),
            title: "Growth".into(),
            details: Default::default(),
        };
        let mut rich_details = serde_json::Map::new();
        rich_details.insert("key_takeaway".into(), json!("up 12%"));
        rich_details.insert("data_points".into(), json!("Q1 +3%, Q2 +9%"));
        let rich = VisualElement {
            element_type: "line_chart".into(),
            title: "Growth".into(),
            details: rich_details,
        };
        let results = vec![
            result(
                1,
                StrategyKind::Basic,
                true,
                PageContent {
                    visual_elements: vec![sparse],
                    ..Default::default()
                },
            ),
            result(
                2,
                StrategyKind::Visual,
                true,
                PageContent {
                    visual_elements: vec![rich],
                    ..Default::default()
                },
            ),
        ];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.visual_elements.len(), 1);
        assert_eq!(page.visual_elements[0].details["key_takeaway"], "up 12%");
    }

    #[test]
    fn table_fragments_merge_rows() {
        let fragment = |rows: Value| {
            let mut details = serde_json::Map::new();
            details.insert("headers".into(), json!(["Region", "Revenue"]));
            details.insert("rows".into(), rows);
            VisualElement {
                element_type: "table".into(),
                title: "Revenue".into(),
                details,
            }
        };
        let results = vec![
            result(
                1,
                StrategyKind::TableFocused,
                true,
                PageContent {
                    visual_elements: vec![fragment(json!([["EMEA", "1"]]))],
                    ..Default::default()
                },
            ),
            result(
                2,
                StrategyKind::TableFocused,
                true,
                PageContent {
                    visual_elements: vec![fragment(json!([["APAC", "2"], ["EMEA", "1"]]))],
                    ..Default::default()
                },
            ),
        ];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.visual_elements.len(), 1);
        let rows = page.visual_elements[0].details["rows"].as_array().unwrap();
        // EMEA appears once: duplicate rows from overlapping fragments drop.
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn empty_steps_fall_back_to_raw_text() {
        let results = vec![result(1, StrategyKind::Basic, false, PageContent::default())];
        let page = Merger::merge(
            "Quarterly Report 2027\nRevenue grew 12%.",
            &plan(),
            &analysis(),
            &results,
        );
        assert_eq!(page.successful_steps, 0);
        assert_eq!(page.main_title.as_deref(), Some("Quarterly Report 2027"));
        assert_eq!(page.key_sections.len(), 1);
        assert!(page.key_sections[0].section_title.contains("Fallback"));
    }

    #[test]
    fn zero_successful_steps_without_text_is_still_a_record() {
        let results = vec![result(1, StrategyKind::Basic, false, PageContent::default())];
        let page = Merger::merge("", &plan(), &analysis(), &results);
        assert_eq!(page.successful_steps, 0);
        assert!(page.main_title.is_none());
        assert!(page.key_sections.is_empty());
    }

    #[test]
    fn merging_is_idempotent_over_its_own_output() {
        let content = PageContent {
            main_title: Some("T".into()),
            page_summary: Some("S".into()),
            key_sections: vec![section("A", "body a"), section("B", "body b")],
            visual_elements: vec![VisualElement {
                element_type: "table".into(),
                title: "Tab".into(),
                details: Default::default(),
            }],
            ..Default::default()
        };
        let first = Merger::merge(
            "",
            &plan(),
            &analysis(),
            &[result(1, StrategyKind::Comprehensive, true, content)],
        );

        // Wrap the merged record back up as a singleton result.
        let rewrapped = PageContent {
            main_title: first.main_title.clone(),
            page_summary: first.page_summary.clone(),
            key_sections: first.key_sections.clone(),
            visual_elements: first.visual_elements.clone(),
            ..Default::default()
        };
        let second = Merger::merge(
            "",
            &plan(),
            &analysis(),
            &[result(1, StrategyKind::Comprehensive, true, rewrapped)],
        );

        assert_eq!(first.main_title, second.main_title);
        assert_eq!(first.page_summary, second.page_summary);
        assert_eq!(first.key_sections, second.key_sections);
        assert_eq!(first.visual_elements, second.visual_elements);
    }
}
