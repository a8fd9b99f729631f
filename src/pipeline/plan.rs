//! Plan and analysis types: what the router decides and how tolerantly we
//! read what the vision model said.
//!
//! Prompts cannot fully constrain LLM output, so every field here is built
//! to absorb variance: complexities arrive as unexpected words, counts
//! arrive as strings or nested objects, strategy lists arrive as plain
//! names or objects with rationales, and the whole payload is sometimes
//! nested one level deep. Unknown JSON fields are dropped silently; unknown
//! strategy names are dropped with a warning. None of it aborts a page.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

// ── Strategies ───────────────────────────────────────────────────────────

/// The closed set of extraction strategies. Extending the pipeline means
/// adding a variant here and registering an implementation in
/// [`crate::pipeline::strategy::StrategySet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Minimal,
    Basic,
    Comprehensive,
    Visual,
    #[serde(alias = "table_focus")]
    TableFocused,
}

impl StrategyKind {
    /// Parse a strategy name the router (or an LLM) produced. Tolerant of
    /// the aliases the original prompts used; `None` for anything unknown.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "minimal" | "text_only" => Some(StrategyKind::Minimal),
            "basic" => Some(StrategyKind::Basic),
            "comprehensive" => Some(StrategyKind::Comprehensive),
            "visual" | "visual_only" => Some(StrategyKind::Visual),
            "table_focused" | "table_focus" | "table_chunk" | "table" => {
                Some(StrategyKind::TableFocused)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Minimal => "minimal",
            StrategyKind::Basic => "basic",
            StrategyKind::Comprehensive => "comprehensive",
            StrategyKind::Visual => "visual",
            StrategyKind::TableFocused => "table_focused",
        }
    }

    /// Merge ranking: when two steps disagree on a scalar, the higher rank
    /// wins (`comprehensive > basic > visual > table_focused > minimal`).
    pub fn rank(&self) -> u8 {
        match self {
            StrategyKind::Comprehensive => 5,
            StrategyKind::Basic => 4,
            StrategyKind::Visual => 3,
            StrategyKind::TableFocused => 2,
            StrategyKind::Minimal => 1,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Complexity ───────────────────────────────────────────────────────────

/// Router-assigned page complexity; governs plan size and strategy choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageComplexity {
    Simple,
    #[default]
    Moderate,
    Complex,
    /// Routing failed; nothing is known about the page.
    Unknown,
}

impl PageComplexity {
    /// Tolerant parse: "extreme" and similar escalations collapse into
    /// `Complex`; anything unrecognised becomes `Moderate`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "simple" | "low" => PageComplexity::Simple,
            "moderate" | "medium" => PageComplexity::Moderate,
            "complex" | "extreme" | "high" => PageComplexity::Complex,
            _ => PageComplexity::Moderate,
        }
    }
}

impl std::fmt::Display for PageComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PageComplexity::Simple => "simple",
            PageComplexity::Moderate => "moderate",
            PageComplexity::Complex => "complex",
            PageComplexity::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

// ── Flexible counts ──────────────────────────────────────────────────────

/// A count field as an LLM actually returns it: a number, a descriptor
/// string ("several"), or a nested object carrying a `total_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlexCount {
    Count(u64),
    Text(String),
    Detail(Map<String, Value>),
}

impl Default for FlexCount {
    fn default() -> Self {
        FlexCount::Count(0)
    }
}

impl FlexCount {
    /// Best-effort numeric reading; `None` for pure descriptors.
    pub fn approximate(&self) -> Option<u64> {
        match self {
            FlexCount::Count(n) => Some(*n),
            FlexCount::Text(s) => s.trim().parse().ok(),
            FlexCount::Detail(map) => map
                .get("total_count")
                .or_else(|| map.get("count"))
                .and_then(Value::as_u64),
        }
    }

    /// Whether this field signals the presence of any content.
    pub fn is_nonzero(&self) -> bool {
        match self.approximate() {
            Some(n) => n > 0,
            // A descriptor like "several dense tables" counts as content.
            None => !matches!(self, FlexCount::Count(0)),
        }
    }
}

// ── Router analysis ──────────────────────────────────────────────────────

/// What the vision model said about a page, after tolerant parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterAnalysis {
    #[serde(default)]
    pub page_complexity: PageComplexity,
    #[serde(default)]
    pub has_dense_table: bool,
    #[serde(default)]
    pub table_count: FlexCount,
    #[serde(default)]
    pub text_sections: FlexCount,
    #[serde(default)]
    pub visual_elements: FlexCount,
    /// Validated, ordered strategy recommendations with rationales.
    #[serde(default)]
    pub recommended: Vec<(StrategyKind, String)>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl RouterAnalysis {
    /// An analysis representing a failed routing pass.
    pub fn unknown() -> Self {
        Self {
            page_complexity: PageComplexity::Unknown,
            warnings: vec!["router failed, using fallback plan".to_string()],
            ..Default::default()
        }
    }

    /// Did the model describe anything worth extracting?
    pub fn has_nontrivial_content(&self) -> bool {
        self.has_dense_table
            || self.table_count.is_nonzero()
            || self.text_sections.is_nonzero()
            || self.visual_elements.is_nonzero()
    }
}

// ── Plans ────────────────────────────────────────────────────────────────

/// Where a plan came from; surfaces as `PageResult::extraction_method`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrigin {
    SmartRouting,
    Fallback,
}

impl PlanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanOrigin::SmartRouting => "smart_routing",
            PlanOrigin::Fallback => "fallback",
        }
    }
}

/// One strategy invocation within a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStep {
    /// 1-based, strictly increasing within a plan.
    pub step_number: u32,
    pub strategy: StrategyKind,
    pub rationale: String,
    pub is_fallback: bool,
}

/// The ordered extraction programme for one page.
///
/// Plans are append-only: refinement adds steps with numbers strictly
/// greater than any existing one; prior steps and their results are never
/// rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionPlan {
    pub page_index: usize,
    pub origin: PlanOrigin,
    pub steps: Vec<ExtractionStep>,
}

impl ExtractionPlan {
    pub fn new(page_index: usize, origin: PlanOrigin) -> Self {
        Self {
            page_index,
            origin,
            steps: Vec::new(),
        }
    }

    /// The number the next appended step must take.
    pub fn next_step_number(&self) -> u32 {
        self.steps.iter().map(|s| s.step_number).max().unwrap_or(0) + 1
    }

    /// Append a step, numbering it after every existing step.
    pub fn push(&mut self, strategy: StrategyKind, rationale: impl Into<String>, is_fallback: bool) {
        let step_number = self.next_step_number();
        self.steps.push(ExtractionStep {
            step_number,
            strategy,
            rationale: rationale.into(),
            is_fallback,
        });
    }
}

/// Convert raw recommended-strategy entries into validated pairs,
/// dropping unknown names with a warning.
pub(crate) fn validate_recommendations(raw: Vec<(String, String)>) -> Vec<(StrategyKind, String)> {
    raw.into_iter()
        .filter_map(|(name, rationale)| match StrategyKind::parse(&name) {
            Some(kind) => Some((kind, rationale)),
            None => {
                warn!("router recommended unknown strategy '{name}', dropping");
                None
            }
        })
        .collect()
}
