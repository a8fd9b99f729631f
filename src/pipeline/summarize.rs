//! Document-level executive summary over the emitted page records.
//!
//! One LLM call against the configured summariser model, fed the per-page
//! digests. Like everything downstream of the core loop, it degrades
//! instead of failing: if the call or the parse goes wrong, a deterministic
//! local summary is assembled from the page records so the artifact always
//! exists.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LlmCaller, ResponseFormat};
use crate::output::PageResult;
use crate::pipeline::strategy::repair_json;
use crate::prompts;

const SUMMARY_MAX_TOKENS: u32 = 2000;
/// Per-page digest budget; keeps 100-page documents inside one prompt.
const DIGEST_CHARS_PER_PAGE: usize = 400;

/// The document-level summary artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub title: String,
    pub overview: String,
    #[serde(default)]
    pub key_findings: Vec<String>,
    #[serde(default)]
    pub themes: Vec<String>,
    pub page_count: usize,
    /// `"llm"` or `"local_fallback"`, so consumers know what they got.
    pub generated_by: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawSummary {
    #[serde(default)]
    title: String,
    #[serde(default)]
    overview: String,
    #[serde(default)]
    key_findings: Vec<String>,
    #[serde(default)]
    themes: Vec<String>,
}

/// Summarise a document from its page records.
pub async fn executive_summary(
    caller: &LlmCaller,
    temperature: f32,
    timeout: Duration,
    pages: &[PageResult],
) -> ExecutiveSummary {
    if pages.is_empty() {
        return local_fallback(pages);
    }

    let digest = page_digest(pages);
    let request = CompletionRequest {
        messages: vec![
            ChatMessage::system(prompts::EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(format!("{}{digest}", prompts::SUMMARY_PROMPT)),
        ],
        temperature,
        max_tokens: SUMMARY_MAX_TOKENS,
        response_format: ResponseFormat::JsonObject,
        timeout,
    };
    let model = caller.registry().default_models.summarizer.clone();

    match caller.complete(&model, &request).await {
        Ok(outcome) => match repair_json(&outcome.completion.content)
            .ok()
            .and_then(|v| serde_json::from_value::<RawSummary>(v).ok())
        {
            Some(raw) if !raw.overview.trim().is_empty() => ExecutiveSummary {
                title: if raw.title.trim().is_empty() {
                    fallback_title(pages)
                } else {
                    raw.title
                },
                overview: raw.overview,
                key_findings: raw.key_findings,
                themes: raw.themes,
                page_count: pages.len(),
                generated_by: "llm".to_string(),
            },
            _ => {
                warn!("summary response unusable, building local fallback");
                local_fallback(pages)
            }
        },
        Err(e) => {
            warn!("summary call failed ({e}), building local fallback");
            local_fallback(pages)
        }
    }
}

fn page_digest(pages: &[PageResult]) -> String {
    pages
        .iter()
        .map(|page| {
            let title = page.main_title.as_deref().unwrap_or("(untitled)");
            let summary = page.page_summary.as_deref().unwrap_or("(no summary)");
            let line = format!("Page {}: {title} — {summary}", page.page_index + 1);
            if line.len() > DIGEST_CHARS_PER_PAGE {
                let cut: String = line.chars().take(DIGEST_CHARS_PER_PAGE).collect();
                format!("{cut}…")
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn fallback_title(pages: &[PageResult]) -> String {
    pages
        .iter()
        .find_map(|p| p.main_title.clone())
        .unwrap_or_else(|| "Document".to_string())
}

fn local_fallback(pages: &[PageResult]) -> ExecutiveSummary {
    let overview = pages
        .iter()
        .filter_map(|p| p.page_summary.as_deref())
        .take(3)
        .collect::<Vec<_>>()
        .join(" ");
    ExecutiveSummary {
        title: fallback_title(pages),
        overview: if overview.is_empty() {
            "No summary could be generated.".to_string()
        } else {
            overview
        },
        key_findings: Vec::new(),
        themes: Vec::new(),
        page_count: pages.len(),
        generated_by: "local_fallback".to_string(),
    }
}
