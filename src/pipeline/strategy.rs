//! Extraction strategies: interchangeable (prompt, parser) pairs.
//!
//! Each strategy knows how to ask a vision model for one *view* of a page
//! and how to read the answer back into a [`PageContent`] record. The
//! extractor treats them uniformly through the [`Strategy`] trait and the
//! [`StrategySet`] registry — adding a strategy is an enum variant plus a
//! registry insertion, no dynamic loading.
//!
//! Parsers degrade gracefully. A malformed response gets exactly one repair
//! pass (strip code fences, trim to the outermost braces) before the
//! strategy reports failure; the step then records `success = false` and
//! the plan moves on.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::llm::ChatMessage;
use crate::output::{PageContent, Section, VisualElement};
use crate::pipeline::encode;
use crate::pipeline::plan::StrategyKind;
use crate::pipeline::render::PageInput;
use crate::prompts;

/// How much of the page text is quoted into text-only prompts.
const TEXT_PREVIEW_CHARS: usize = 4000;

/// Whether to ask for transcription or synthesis.
///
/// `Paraphrase` exists for providers that refuse verbatim transcription of
/// some material (recitation blocks). The extractor switches a step to it
/// after a content-policy failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMode {
    #[default]
    Verbatim,
    Paraphrase,
}

/// A strategy response that could not be read, even after repair.
#[derive(Debug, Clone, Error)]
#[error("unparseable strategy response: {0}")]
pub struct ParseFailure(pub String);

/// One extraction strategy: prompt construction plus response parsing.
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Build the messages for this strategy over `page`.
    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage>;

    /// Read a raw model response into a content record.
    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure>;
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Registry of available strategies, keyed by [`StrategyKind`].
pub struct StrategySet {
    strategies: std::collections::HashMap<StrategyKind, Box<dyn Strategy>>,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl StrategySet {
    /// The built-in five strategies.
    pub fn defaults() -> Self {
        let mut set = Self {
            strategies: std::collections::HashMap::new(),
        };
        set.register(Box::new(MinimalStrategy));
        set.register(Box::new(BasicStrategy));
        set.register(Box::new(ComprehensiveStrategy));
        set.register(Box::new(VisualStrategy));
        set.register(Box::new(TableFocusedStrategy));
        set
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<&dyn Strategy> {
        self.strategies.get(&kind).map(|s| s.as_ref())
    }
}

// ── Shared parsing helpers ───────────────────────────────────────────────

/// Parse model output as JSON, with one repair attempt: strip markdown
/// fences, then trim to the outermost brace pair.
pub fn repair_json(raw: &str) -> Result<Value, ParseFailure> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    // Strip ```json … ``` fences the prompt told the model not to emit.
    let defenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    // Trim to the outermost braces: models prepend commentary despite
    // instructions, and the JSON object is usually intact inside.
    let start = defenced.find('{');
    let end = defenced.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&defenced[start..=end]) {
                debug!("repaired malformed JSON response ({} chars)", raw.len());
                return Ok(value);
            }
        }
    }

    let preview: String = raw.chars().take(120).collect();
    Err(ParseFailure(preview))
}

/// Stable id for a section body: SHA-256 of the whitespace-collapsed text,
/// truncated to 16 hex chars. Identical text always yields an identical id,
/// across steps and across runs — de-duplication and refinement targeting
/// rely on that.
pub fn section_id(content: &Value) -> String {
    let text = value_text(content);
    let normalized: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}

/// Flatten a JSON value to comparable text.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First string found under any of `keys`, searching nested objects up to
/// three levels deep. LLMs rename fields freely; looking in a few likely
/// places recovers most of that drift.
fn find_string(value: &Value, keys: &[&str]) -> Option<String> {
    find_value(value, keys, 3).and_then(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

fn find_value(value: &Value, keys: &[&str], depth: u8) -> Option<Value> {
    let obj = value.as_object()?;
    for key in keys {
        if let Some(found) = obj.get(*key) {
            if !found.is_null() {
                return Some(found.clone());
            }
        }
    }
    if depth == 0 {
        return None;
    }
    for nested in obj.values() {
        if nested.is_object() {
            if let Some(found) = find_value(nested, keys, depth - 1) {
                return Some(found);
            }
        }
    }
    None
}

const TITLE_KEYS: &[&str] = &["main_title", "title", "document_title", "page_title", "main_topic"];
const SUMMARY_KEYS: &[&str] = &["page_summary", "summary", "description", "abstract", "page_analysis"];

/// Read a `key_sections`-style array into sections, assigning content ids.
fn sections_from(value: &Value, keys: &[&str]) -> Vec<Section> {
    let Some(list) = find_value(value, keys, 2).and_then(|v| v.as_array().cloned()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| {
            let content = entry
                .get("content")
                .cloned()
                .unwrap_or_else(|| entry.clone());
            if content.is_null() {
                return None;
            }
            let section_title = entry
                .get("section_title")
                .or_else(|| entry.get("title"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Section {
                section_id: section_id(&content),
                section_title,
                content,
            })
        })
        .collect()
}

/// Read a `visual_elements`-style array into typed elements.
fn visuals_from(value: &Value, keys: &[&str]) -> Vec<VisualElement> {
    let Some(list) = find_value(value, keys, 2).and_then(|v| v.as_array().cloned()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let mut details = Map::new();
            let mut element_type = String::new();
            let mut title = String::new();
            for (key, val) in obj {
                match key.as_str() {
                    "element_type" | "type" => {
                        element_type = val.as_str().unwrap_or_default().to_string();
                    }
                    "title" | "caption" => title = val.as_str().unwrap_or_default().to_string(),
                    _ => {
                        details.insert(key.clone(), val.clone());
                    }
                }
            }
            Some(VisualElement {
                element_type,
                title,
                details,
            })
        })
        .collect()
}

/// Carry leftover top-level fields (metadata and friends) into `extra`.
fn extra_from(value: &Value, consumed: &[&str]) -> Map<String, Value> {
    value
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(key, _)| !consumed.contains(&key.as_str()))
                .map(|(key, val)| (key.clone(), val.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// A user message with the page image attached, or text-only if encoding
/// fails — a page that cannot be encoded still gets a text pass rather than
/// no pass at all.
pub(crate) fn vision_message(page: &PageInput, prompt: &str) -> ChatMessage {
    match encode::encode_page(&page.image) {
        Ok(image) => ChatMessage::user_with_images(prompt, vec![image]),
        Err(e) => {
            tracing::warn!(
                "page {}: image encoding failed ({e}), falling back to text-only prompt",
                page.page_index
            );
            let preview = text_preview(&page.text, TEXT_PREVIEW_CHARS);
            ChatMessage::user(format!("{prompt}\n\nPage text:\n{preview}"))
        }
    }
}

pub(crate) fn text_preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}…")
    }
}

// ── Minimal ──────────────────────────────────────────────────────────────

/// Cheapest pass: text only, no image tokens spent.
struct MinimalStrategy;

impl Strategy for MinimalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Minimal
    }

    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage> {
        let prompt = match mode {
            PromptMode::Verbatim => prompts::MINIMAL_PROMPT,
            PromptMode::Paraphrase => prompts::MINIMAL_PARAPHRASE_PROMPT,
        };
        let preview = text_preview(&page.text, TEXT_PREVIEW_CHARS);
        vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(format!("{prompt}\n\nPage text:\n{preview}")),
        ]
    }

    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure> {
        let value = repair_json(raw)?;
        let mut content = PageContent {
            main_title: find_string(&value, TITLE_KEYS),
            page_summary: find_string(&value, SUMMARY_KEYS),
            ..Default::default()
        };
        if let Some(text) = find_value(&value, &["text_content", "key_points", "body"], 1) {
            if !text.is_null() {
                content.key_sections.push(Section {
                    section_id: section_id(&text),
                    section_title: "Content".to_string(),
                    content: text,
                });
            }
        }
        content.extra = extra_from(
            &value,
            &["main_title", "title", "page_summary", "summary", "text_content", "key_points", "body"],
        );
        Ok(content)
    }
}

// ── Basic ────────────────────────────────────────────────────────────────

/// Vision pass for title, summary, and sections.
struct BasicStrategy;

impl Strategy for BasicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Basic
    }

    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage> {
        let prompt = match mode {
            PromptMode::Verbatim => prompts::BASIC_PROMPT,
            PromptMode::Paraphrase => prompts::BASIC_PARAPHRASE_PROMPT,
        };
        vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            vision_message(page, prompt),
        ]
    }

    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure> {
        let value = repair_json(raw)?;
        Ok(PageContent {
            main_title: find_string(&value, TITLE_KEYS),
            page_summary: find_string(&value, SUMMARY_KEYS),
            key_sections: sections_from(&value, &["key_sections", "sections", "key_themes"]),
            visual_elements: visuals_from(&value, &["visual_elements", "visuals"]),
            extra: extra_from(
                &value,
                &["main_title", "title", "page_summary", "summary", "key_sections", "sections", "key_themes", "visual_elements", "visuals"],
            ),
        })
    }
}

// ── Comprehensive ────────────────────────────────────────────────────────

/// Full vision pass: sections plus typed visual elements plus metadata.
struct ComprehensiveStrategy;

impl Strategy for ComprehensiveStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Comprehensive
    }

    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage> {
        let prompt = match mode {
            PromptMode::Verbatim => prompts::COMPREHENSIVE_PROMPT,
            PromptMode::Paraphrase => prompts::COMPREHENSIVE_PARAPHRASE_PROMPT,
        };
        vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            vision_message(page, prompt),
        ]
    }

    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure> {
        let value = repair_json(raw)?;
        Ok(PageContent {
            main_title: find_string(&value, TITLE_KEYS),
            page_summary: find_string(&value, SUMMARY_KEYS),
            key_sections: sections_from(&value, &["key_sections", "sections", "text_sections"]),
            visual_elements: visuals_from(&value, &["visual_elements", "visuals", "figures", "charts"]),
            extra: extra_from(
                &value,
                &["main_title", "title", "page_summary", "summary", "key_sections", "sections", "text_sections", "visual_elements", "visuals", "figures", "charts"],
            ),
        })
    }
}

// ── Visual ───────────────────────────────────────────────────────────────

/// Chart/graphics pass; prose is someone else's job.
struct VisualStrategy;

impl Strategy for VisualStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Visual
    }

    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage> {
        let prompt = match mode {
            PromptMode::Verbatim => prompts::VISUAL_PROMPT,
            PromptMode::Paraphrase => prompts::VISUAL_PARAPHRASE_PROMPT,
        };
        vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            vision_message(page, prompt),
        ]
    }

    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure> {
        let value = repair_json(raw)?;
        Ok(PageContent {
            visual_elements: visuals_from(&value, &["visual_elements", "visuals", "visual_summary"]),
            ..Default::default()
        })
    }
}

// ── Table-focused ────────────────────────────────────────────────────────

/// Tabular pass: headers and rows become a `table` visual element.
struct TableFocusedStrategy;

impl Strategy for TableFocusedStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TableFocused
    }

    fn prompt_for(&self, page: &PageInput, mode: PromptMode) -> Vec<ChatMessage> {
        let prompt = match mode {
            PromptMode::Verbatim => prompts::TABLE_FOCUSED_PROMPT,
            PromptMode::Paraphrase => prompts::TABLE_FOCUSED_PARAPHRASE_PROMPT,
        };
        vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            vision_message(page, prompt),
        ]
    }

    fn parse(&self, raw: &str) -> Result<PageContent, ParseFailure> {
        let value = repair_json(raw)?;
        let mut content = PageContent::default();

        let headers = value.get("headers").cloned();
        let rows = value.get("rows").cloned();
        if headers.is_some() || rows.is_some() {
            let mut details = Map::new();
            if let Some(headers) = headers {
                details.insert("headers".to_string(), headers);
            }
            if let Some(rows) = rows {
                details.insert("rows".to_string(), rows);
            }
            if let Some(meta) = value.get("table_metadata") {
                details.insert("table_metadata".to_string(), meta.clone());
            }
            content.visual_elements.push(VisualElement {
                element_type: "table".to_string(),
                title: value
                    .get("table_title")
                    .and_then(Value::as_str)
                    .unwrap_or("Untitled Table")
                    .to_string(),
                details,
            });
        } else if let Some(description) = find_string(&value, &["table_title", "data_patterns", "table_description"]) {
            // Paraphrase variant: patterns instead of cells.
            let body = Value::String(description);
            content.key_sections.push(Section {
                section_id: section_id(&body),
                section_title: "Table Analysis".to_string(),
                content: body,
            });
        }
        Ok(content)
    }
}
