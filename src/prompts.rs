//! Prompt templates for every LLM task in the pipeline.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — changing extraction behaviour (a new
//!    field, a different table rule) requires editing exactly one place.
//!
//! 2. **Testability** — unit tests can inspect prompts directly without a
//!    live model, making prompt regressions easy to catch.
//!
//! Each extraction strategy has two variants: the standard prompt, and a
//! paraphrase variant used when a provider refuses the verbatim request
//! (recitation / content-policy blocks). The paraphrase variants ask for
//! synthesis instead of transcription, which providers accept.

/// System prompt for extraction and refinement calls.
pub const EXTRACTION_SYSTEM_PROMPT: &str =
    "You are a precise document analyzer. Return ONLY valid JSON.";

/// System prompt for the router's page analysis.
pub const ROUTER_SYSTEM_PROMPT: &str =
    "You are an expert document analyzer planning optimal extraction strategies. Return ONLY valid JSON.";

/// The router's page-analysis prompt.
///
/// The strategy names listed here are the only ones the plan builder
/// accepts; anything else the model invents is dropped with a warning.
pub const ROUTER_ANALYSIS_PROMPT: &str = r#"Analyze this document page and plan its extraction.

Return ONLY a JSON object with this shape:
{
  "page_complexity": "simple|moderate|complex",
  "content_analysis": {
    "has_dense_table": true,
    "table_count": 1,
    "text_sections": 2,
    "visual_elements": 1
  },
  "recommended_strategies": [
    {"strategy": "basic", "rationale": "headline and prose sections"},
    {"strategy": "table_focused", "rationale": "one dense data table"}
  ],
  "warnings": []
}

Strategy names must be drawn from: minimal, basic, comprehensive, visual, table_focused.

Guidelines:
- "simple" means a page with one plain block of prose and nothing else.
- Recommend table_focused whenever rows/columns of data are visible.
- Recommend visual when charts, diagrams, or figures carry information.
- Order strategies from most to least important; at most four.
- Counts may be approximate.
"#;

// ── Extraction strategies ────────────────────────────────────────────────

pub const MINIMAL_PROMPT: &str = r#"Extract basic info from the page text below as JSON:
{
  "main_title": "title",
  "page_summary": "one-paragraph summary",
  "content_type": "mainly text|mainly table|mixed",
  "text_content": "any notable text content"
}
Keep extracted text in its original language. Return ONLY JSON."#;

pub const MINIMAL_PARAPHRASE_PROMPT: &str = r#"Summarize the page text below in your own words as JSON:
{
  "main_title": "paraphrased title",
  "page_summary": "your own one-paragraph summary",
  "content_type": "mainly text|mainly table|mixed",
  "key_points": "main ideas in your own words"
}
Create summaries, not copies. Return ONLY JSON."#;

pub const BASIC_PROMPT: &str = r#"Extract key information from this page as JSON:
{
  "main_title": "title",
  "page_summary": "summary",
  "key_sections": [{"section_title": "title", "content": "full text"}],
  "visual_elements": [{"element_type": "type", "title": "title"}]
}
Keep extracted text in its original language. Return ONLY JSON."#;

pub const BASIC_PARAPHRASE_PROMPT: &str = r#"Analyze this page and return JSON:
{
  "main_title": "paraphrased title",
  "page_summary": "your analysis",
  "key_sections": [{"section_title": "theme", "content": "summarized finding"}]
}
Paraphrase all content. Return ONLY JSON."#;

pub const COMPREHENSIVE_PROMPT: &str = r#"Analyze this document page comprehensively and return JSON:
{
  "main_title": "main title",
  "page_summary": "detailed summary",
  "key_sections": [{"section_title": "title", "content": "full text or array"}],
  "visual_elements": [
    {
      "element_type": "line_chart|bubble_chart|bar_chart|table|image|diagram",
      "title": "title",
      "key_takeaway": "insight",
      "details": "axes, series, or rows as appropriate"
    }
  ],
  "metadata": {"source_citation": "citation", "footer_content": "footer"}
}
Report every numeric value exactly as printed, as a string — keep signs,
percent signs, and thousands separators. Keep extracted text in its original
language. Return ONLY JSON."#;

pub const COMPREHENSIVE_PARAPHRASE_PROMPT: &str = r#"Analyze and synthesize this page's content. Return JSON:
{
  "main_title": "topic in your words",
  "page_summary": "your detailed analysis",
  "key_sections": [{"section_title": "insight", "content": "synthesized information"}],
  "visual_elements": [{"element_type": "type", "title": "what it shows", "key_takeaway": "finding"}]
}
Synthesize, don't copy. Return ONLY JSON."#;

pub const VISUAL_PROMPT: &str = r#"Extract ONLY the visual elements (charts, diagrams, figures, images) from this page. Return JSON:
{
  "visual_elements": [
    {
      "element_type": "line_chart|bubble_chart|bar_chart|diagram|image",
      "title": "title or caption",
      "description": "what it shows",
      "key_takeaway": "the main insight",
      "data_points": "notable values, as strings"
    }
  ]
}
Ignore running prose. Return ONLY JSON."#;

pub const VISUAL_PARAPHRASE_PROMPT: &str = r#"Describe the visual elements on this page. Return JSON:
{
  "visual_elements": [
    {"element_type": "chart|diagram|image", "title": "what it shows", "key_takeaway": "key finding"}
  ]
}
Describe, don't copy labels. Return ONLY JSON."#;

pub const TABLE_FOCUSED_PROMPT: &str = r#"Focus ONLY on tabular data on this page. Return JSON:
{
  "table_title": "title if visible",
  "headers": ["col1", "col2"],
  "rows": [
    ["row1_col1", "row1_col2"],
    ["row2_col1", "row2_col2"]
  ],
  "table_metadata": {
    "total_rows": 2,
    "total_columns": 2,
    "has_merged_cells": false,
    "notes": "any footnotes or annotations"
  }
}
Report every cell exactly as printed, as a string — keep signs, percent
signs, and thousands separators. Return ONLY JSON."#;

pub const TABLE_FOCUSED_PARAPHRASE_PROMPT: &str = r#"Analyze the table structure and data patterns on this page. Return JSON:
{
  "table_title": "what this table shows",
  "data_patterns": "observed patterns",
  "key_values": "important data points",
  "row_count": 0,
  "column_count": 0
}
Describe patterns, not raw data. Return ONLY JSON."#;

// ── Refinement ───────────────────────────────────────────────────────────

/// Verdict prompt for the refinement analyzer. The merged page record is
/// appended after this text.
pub const REFINEMENT_PROMPT: &str = r#"Below is the consolidated extraction result for one document page.
Judge whether another extraction pass would materially improve it.

Return ONLY a JSON object:
{
  "needs_refinement": false,
  "missing_aspects": ["short names of what is missing, e.g. 'table rows', 'chart values'"],
  "recommended_strategies": ["strategy names from: minimal, basic, comprehensive, visual, table_focused"]
}

Say needs_refinement=true only for concrete gaps (an obvious table captured
as prose, charts with no values, an empty summary on a dense page). Cosmetic
issues do not warrant another pass.

Extraction result:
"#;

// ── Executive summary ────────────────────────────────────────────────────

/// Document-level summary prompt. Per-page digests are appended after it.
pub const SUMMARY_PROMPT: &str = r#"You are given per-page summaries of a document. Produce an executive summary as JSON:
{
  "title": "document title",
  "overview": "3-6 sentence overview of the whole document",
  "key_findings": ["finding 1", "finding 2"],
  "themes": ["theme 1", "theme 2"]
}
Return ONLY JSON.

Per-page summaries:
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_prompt_names_every_strategy() {
        for name in ["minimal", "basic", "comprehensive", "visual", "table_focused"] {
            assert!(
                ROUTER_ANALYSIS_PROMPT.contains(name),
                "router prompt must name '{name}'"
            );
        }
    }

    #[test]
    fn table_prompts_demand_string_values() {
        assert!(TABLE_FOCUSED_PROMPT.contains("as a string"));
        assert!(COMPREHENSIVE_PROMPT.contains("as a string"));
    }

    #[test]
    fn every_prompt_demands_json() {
        for prompt in [
            ROUTER_ANALYSIS_PROMPT,
            MINIMAL_PROMPT,
            BASIC_PROMPT,
            COMPREHENSIVE_PROMPT,
            VISUAL_PROMPT,
            TABLE_FOCUSED_PROMPT,
            REFINEMENT_PROMPT,
            SUMMARY_PROMPT,
        ] {
            assert!(prompt.contains("JSON"), "prompt must demand JSON: {prompt:.40}");
        }
    }
}
