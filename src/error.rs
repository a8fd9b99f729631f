//! Error types for the pdf2struct library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ExtractError`] — **Fatal**: the pipeline cannot proceed at all
//!   (bad input file, invalid model configuration). Returned as
//!   `Err(ExtractError)` from the top-level entry points.
//!
//! * Per-page and per-step failures are **non-fatal** and never surface
//!   here. A failed extraction step becomes an
//!   [`crate::output::ExtractionResult`] with `success = false`; a page
//!   that fails outright becomes a [`crate::output::PageFailure`] entry in
//!   the document output. The pipeline always returns a structured result
//!   for any readable input — total failure happens only at startup, on
//!   config validation.

use std::path::PathBuf;
use thiserror::Error;

use crate::llm::LlmError;

/// All fatal errors returned by the pdf2struct library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model registry document failed validation.
    ///
    /// Raised at load time for a missing default, a dangling fallback
    /// reference, a fallback cycle, or a non-vision model assigned to a
    /// vision task.
    #[error("Invalid model configuration: {0}")]
    InvalidModelConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Map an [`LlmError`] onto the wire-level failure-kind vocabulary used in
/// [`crate::output::PageFailure::kind`] and the JSON artifacts.
pub fn failure_kind(err: &LlmError) -> &'static str {
    use crate::llm::LlmErrorKind::*;
    match err {
        LlmError::FallbackExhausted { .. } => "fallback_exhausted",
        _ => match err.kind() {
            TransientHttp => "transient_http",
            RateLimited => "rate_limited",
            AuthFailure => "auth_failure",
            InvalidRequest => "invalid_request",
            ContentPolicy => "content_policy",
            TerminalOther => "terminal_other",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_not_found_display() {
        let e = ExtractError::FileNotFound {
            path: PathBuf::from("/tmp/missing.pdf"),
        };
        assert!(e.to_string().contains("missing.pdf"));
    }

    #[test]
    fn invalid_model_config_display() {
        let e = ExtractError::InvalidModelConfig("fallback cycle at 'gpt-4.1-mini'".into());
        assert!(e.to_string().contains("fallback cycle"));
    }

    #[test]
    fn failure_kind_maps_exhaustion() {
        let e = LlmError::FallbackExhausted {
            primary: "gpt-4.1-mini".into(),
            attempts: vec![],
        };
        assert_eq!(failure_kind(&e), "fallback_exhausted");
    }
}
