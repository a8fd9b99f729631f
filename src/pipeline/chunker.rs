//! Corpus chunking: page records → overlapping text chunks for indexing.
//!
//! Downstream retrieval wants chunks of a bounded size with a little
//! overlap so context survives the cut points. Each page's record is
//! flattened to text (title, summary, sections, visual takeaways, table
//! rows) and split recursively on a separator ladder — paragraph breaks
//! first, then lines, then sentences — so cuts land on natural boundaries
//! whenever the text allows it.
//!
//! The chunking profile adapts to what the router learned about the page:
//! table-heavy pages get bigger chunks with fewer cut points (splitting a
//! table mid-row destroys it), simple pages get smaller ones.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::output::PageResult;
use crate::pipeline::plan::PageComplexity;

/// One indexable chunk of the document corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Content hash, stable across runs over identical text.
    pub chunk_id: String,
    pub page_index: usize,
    /// Which chunking profile produced this chunk.
    pub profile: String,
    pub text: String,
    /// Rough token count (chars / 4), good enough for budget planning.
    pub token_estimate: usize,
}

/// Separator ladder and size bounds for one page class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkProfile {
    Standard,
    ComplexTables,
    Simple,
}

impl ChunkProfile {
    fn select(page: &PageResult) -> Self {
        let table_count = page
            .visual_elements
            .iter()
            .filter(|v| v.element_type == "table")
            .count();
        if page.page_complexity == PageComplexity::Complex || table_count > 3 {
            ChunkProfile::ComplexTables
        } else if page.page_complexity == PageComplexity::Simple && table_count == 0 {
            ChunkProfile::Simple
        } else {
            ChunkProfile::Standard
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ChunkProfile::Standard => "standard",
            ChunkProfile::ComplexTables => "complex_tables",
            ChunkProfile::Simple => "simple",
        }
    }

    /// (size multiplier ×100, overlap multiplier ×100, separators)
    fn tuning(&self) -> (usize, usize, &'static [&'static str]) {
        match self {
            ChunkProfile::Standard => (100, 100, &["\n\n\n", "\n\n", "\n", ". "]),
            ChunkProfile::ComplexTables => (133, 150, &["\n\n\n", "\n\n"]),
            ChunkProfile::Simple => (66, 50, &["\n\n", "\n", ". ", " "]),
        }
    }
}

/// Chunk every page record into a corpus.
///
/// Pages with no extractable content are skipped; a chunk shorter than ten
/// characters carries no signal and is dropped.
pub fn chunk_results(pages: &[PageResult], config: &PipelineConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        let text = page_text(page);
        if text.trim().len() < 10 {
            debug!("page {}: nothing to chunk", page.page_index);
            continue;
        }

        let profile = ChunkProfile::select(page);
        let (size_pct, overlap_pct, separators) = profile.tuning();
        let size = (config.chunk_size * size_pct / 100).max(200);
        let overlap = (config.chunk_overlap * overlap_pct / 100).min(size / 2);

        let pieces = split_recursive(&text, separators, size);
        let mut previous_tail: Option<String> = None;
        for piece in pieces {
            let body = match &previous_tail {
                Some(tail) => format!("{tail}{piece}"),
                None => piece.clone(),
            };
            if body.trim().len() < 10 {
                continue;
            }
            previous_tail = Some(overlap_tail(&piece, overlap));
            chunks.push(Chunk {
                chunk_id: chunk_id(page.page_index, &body),
                page_index: page.page_index,
                profile: profile.as_str().to_string(),
                token_estimate: body.len() / 4,
                text: body,
            });
        }
    }
    chunks
}

/// Flatten a page record into corpus text.
fn page_text(page: &PageResult) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = &page.main_title {
        parts.push(title.clone());
    }
    if let Some(summary) = &page.page_summary {
        parts.push(summary.clone());
    }
    for section in &page.key_sections {
        let body = value_text(&section.content);
        if section.section_title.is_empty() {
            parts.push(body);
        } else {
            parts.push(format!("{}\n{body}", section.section_title));
        }
    }
    for visual in &page.visual_elements {
        let mut lines = vec![format!("[{}] {}", visual.element_type, visual.title)];
        for key in ["description", "key_takeaway", "data_points"] {
            if let Some(text) = visual.details.get(key).and_then(Value::as_str) {
                lines.push(text.to_string());
            }
        }
        if let Some(rows) = visual.details.get("rows").and_then(Value::as_array) {
            for row in rows {
                if let Some(cells) = row.as_array() {
                    let line: Vec<String> = cells.iter().map(value_text).collect();
                    lines.push(line.join(" | "));
                }
            }
        }
        parts.push(lines.join("\n"));
    }
    parts.join("\n\n")
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join("\n"),
        other => other.to_string(),
    }
}

/// Split on the first separator that helps; recurse on oversized pieces
/// with the remaining ladder; hard-cut as a last resort.
fn split_recursive(text: &str, separators: &[&str], size: usize) -> Vec<String> {
    if text.len() <= size {
        return vec![text.to_string()];
    }

    if let Some((sep, rest)) = separators.split_first() {
        let mut pieces = Vec::new();
        let mut current = String::new();
        for part in text.split(sep) {
            let candidate_len = current.len() + sep.len() + part.len();
            if !current.is_empty() && candidate_len > size {
                pieces.extend(split_recursive(&current, rest, size));
                current = String::new();
            }
            if !current.is_empty() {
                current.push_str(sep);
            }
            current.push_str(part);
        }
        if !current.is_empty() {
            pieces.extend(split_recursive(&current, rest, size));
        }
        return pieces;
    }

    // No separators left: cut at char boundaries.
    let mut pieces = Vec::new();
    let mut buf = String::with_capacity(size);
    for ch in text.chars() {
        buf.push(ch);
        if buf.len() >= size {
            pieces.push(std::mem::take(&mut buf));
        }
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }
    pieces
}

/// The last `overlap` characters of a piece, on a char boundary.
fn overlap_tail(piece: &str, overlap: usize) -> String {
    if overlap == 0 || piece.len() <= overlap {
        return String::new();
    }
    let chars: Vec<char> = piece.chars().collect();
    let take_from = chars.len().saturating_sub(overlap);
    chars[take_from..].iter().collect()
}

fn chunk_id(page_index: usize, text: &str) -> String {
    let digest = Sha256::digest(format!("{page_index}:{text}").as_bytes());
    let mut id = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
