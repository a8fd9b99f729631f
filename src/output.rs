//! Output types: per-step results, per-page records, and the document
//! aggregate.
//!
//! LLM output is open-ended by nature, so the content types here are open
//! records: a schema-known subset (`main_title`, `page_summary`,
//! `key_sections`, `visual_elements`) plus a flattened `extra` map that
//! keeps whatever else a strategy returned. Unknown fields are carried, not
//! rejected — surviving model variance is the point of this pipeline.
//!
//! Everything is `serde`-serialisable; `PageResult` is the terminal
//! artifact consumers (summariser, chunker, JSON writers) receive.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::plan::{PageComplexity, StrategyKind};

/// One titled span of page content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub section_title: String,
    /// Free-form body: string, list, or nested object, as the model gave it.
    #[serde(default)]
    pub content: Value,
    /// Stable content hash of the body; identical text yields an identical
    /// id across runs, which is what de-duplication keys on.
    #[serde(default)]
    pub section_id: String,
}

/// A chart, table, image, or other non-prose element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualElement {
    #[serde(default)]
    pub element_type: String,
    #[serde(default)]
    pub title: String,
    /// Typed details: axes, series, headers/rows for tables, takeaways.
    /// Numeric values stay strings to preserve signs and separators.
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl VisualElement {
    /// How many fields carry data; the merger prefers the richer duplicate.
    pub fn populated_fields(&self) -> usize {
        let base = usize::from(!self.element_type.is_empty()) + usize::from(!self.title.is_empty());
        base + self.details.values().filter(|v| !v.is_null()).count()
    }
}

/// The open content record a single extraction step produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visual_elements: Vec<VisualElement>,
    /// Anything else the strategy returned; logged and carried, never fatal.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PageContent {
    pub fn is_empty(&self) -> bool {
        self.main_title.as_deref().map_or(true, str::is_empty)
            && self.page_summary.as_deref().map_or(true, str::is_empty)
            && self.key_sections.is_empty()
            && self.visual_elements.is_empty()
    }
}

/// Outcome of one extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub step_number: u32,
    pub strategy: StrategyKind,
    pub success: bool,
    #[serde(default)]
    pub content: PageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub model_used: String,
    pub elapsed_ms: u64,
}

/// The consolidated record for one page — the pipeline's terminal artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_index: usize,
    pub page_complexity: PageComplexity,
    /// `"smart_routing"` when the plan came from the router's analysis,
    /// `"fallback"` when routing failed and the default plan ran.
    pub extraction_method: String,
    pub total_steps: usize,
    pub successful_steps: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_summary: Option<String>,
    #[serde(default)]
    pub key_sections: Vec<Section>,
    #[serde(default)]
    pub visual_elements: Vec<VisualElement>,
}

/// A page that could not produce a `PageResult` at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageFailure {
    pub page_index: usize,
    /// One of the wire-level failure kinds (`transient_http`,
    /// `fallback_exhausted`, `cancelled`, …).
    pub kind: String,
    pub detail: String,
}

/// Wall-clock and volume statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_pages: usize,
    pub processed_pages: usize,
    pub failed_pages: usize,
    pub total_steps: usize,
    pub total_duration_ms: u64,
    pub render_duration_ms: u64,
    pub extraction_duration_ms: u64,
}

/// Everything one pipeline run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    pub pages: Vec<PageResult>,
    pub errors: Vec<PageFailure>,
    pub stats: PipelineStats,
}
