//! Pipeline stages for structured PDF extraction.
//!
//! Each submodule implements exactly one transformation step. Keeping
//! stages separate makes each independently testable and lets us swap
//! implementations (e.g. a different rendering backend) without touching
//! other stages.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ router ──▶ extract ──▶ merge ──▶ refine ──┐
//! (pdfium)  (plan)    (strategies) (one record) (loop?) │
//!                ▲                                      │
//!                └────────── extended plan ◀────────────┘
//! ```
//!
//! 1. [`render`]   — rasterise pages + pull the text layer; `spawn_blocking`
//!    because pdfium is not async-safe
//! 2. [`router`]   — vision analysis → validated [`plan::ExtractionPlan`]
//! 3. [`strategy`] — the (prompt, parser) pairs the plan dispatches over
//! 4. [`extract`]  — sequential step execution with per-step failure capture
//! 5. [`merge`]    — consolidate step results into one page record
//! 6. [`refine`]   — bounded self-correction: emit, or extend the plan and
//!    loop back to extraction
//! 7. [`chunker`] / [`summarize`] — downstream artifacts over the emitted
//!    page records
//!
//! [`encode`] is shared plumbing: page images → base64 PNG attachments.

pub mod chunker;
pub mod encode;
pub mod extract;
pub mod merge;
pub mod plan;
pub mod refine;
pub mod render;
pub mod router;
pub mod strategy;
pub mod summarize;
