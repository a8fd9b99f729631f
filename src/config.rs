//! Configuration for the extraction pipeline.
//!
//! All operational behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks, serialise them for logging, and
//! diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2struct::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .concurrency_limit(8)
///     .rate_limit_per_minute(120)
///     .iterative_refinement(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    ///
    /// 150 DPI keeps text sharp enough for a vision model while image sizes
    /// stay well below provider upload limits. Raise to 200–300 for
    /// small-font documents.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// A safety cap independent of DPI so an oversized page never produces
    /// an image the provider rejects or the process cannot hold.
    pub max_rendered_pixels: u32,

    /// Max pages processed concurrently. Default: 5.
    ///
    /// Bounds pages in flight; the per-minute call budget is enforced
    /// separately and the two compose. `1` serialises pages entirely.
    pub concurrency_limit: usize,

    /// Global LLM-call budget per minute, shared across all pages. Default: 60.
    ///
    /// One call costs one budget token regardless of prompt size. Lower this
    /// if your provider tier throttles aggressively; raising it past the
    /// provider's real limit only converts budget waits into 429 retries.
    pub rate_limit_per_minute: u32,

    /// Attempts per LLM call, inclusive of the first try. Default: 3.
    ///
    /// Only transient failures (5xx, network, 429) are retried. `1`
    /// disables retries entirely.
    pub retry_max_attempts: u32,

    /// Backoff base in seconds before the first retry; doubles per retry,
    /// ±20 % jitter. Must be > 0. Default: 1.0.
    pub retry_initial_delay_secs: f64,

    /// Enable the self-correcting refinement loop. Default: false.
    ///
    /// When on, each page's merged result is inspected and, if the model
    /// reports gaps, re-extracted with additional strategies. Costs extra
    /// LLM calls per affected page.
    pub iterative_refinement_enabled: bool,

    /// Hard ceiling on refinement cycles per page. Default: 2.
    ///
    /// `0` disables refinement even when
    /// [`iterative_refinement_enabled`](Self::iterative_refinement_enabled)
    /// is true. The ceiling is what guarantees termination when the
    /// analyzer keeps asking for more.
    pub max_refinement_cycles: u32,

    /// Sampling temperature for every LLM call. Default: 0.1.
    ///
    /// Low temperature keeps the model faithful to what is on the page,
    /// which is what extraction wants; creativity only hurts here.
    pub temperature: f32,

    /// Max tokens the model may generate per extraction step. Default: 8192.
    ///
    /// Dense tables routinely exceed 4k output tokens; truncation corrupts
    /// JSON mid-structure, so the default is generous.
    pub max_tokens: u32,

    /// Per-LLM-call timeout in seconds. Default: 60.
    ///
    /// A timeout classifies as transient and is retried.
    pub api_timeout_secs: u64,

    /// Target chunk size in characters for the downstream corpus. Default: 3000.
    pub chunk_size: usize,

    /// Overlap between adjacent chunks in characters. Default: 200.
    pub chunk_overlap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            concurrency_limit: 5,
            rate_limit_per_minute: 60,
            retry_max_attempts: 3,
            retry_initial_delay_secs: 1.0,
            iterative_refinement_enabled: false,
            max_refinement_cycles: 2,
            temperature: 0.1,
            max_tokens: 8192,
            api_timeout_secs: 60,
            chunk_size: 3000,
            chunk_overlap: 200,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.config.concurrency_limit = n.max(1);
        self
    }

    pub fn rate_limit_per_minute(mut self, n: u32) -> Self {
        self.config.rate_limit_per_minute = n.max(1);
        self
    }

    pub fn retry_max_attempts(mut self, n: u32) -> Self {
        self.config.retry_max_attempts = n.max(1);
        self
    }

    pub fn retry_initial_delay_secs(mut self, secs: f64) -> Self {
        self.config.retry_initial_delay_secs = secs;
        self
    }

    pub fn iterative_refinement(mut self, enabled: bool) -> Self {
        self.config.iterative_refinement_enabled = enabled;
        self
    }

    pub fn max_refinement_cycles(mut self, n: u32) -> Self {
        self.config.max_refinement_cycles = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ExtractError> {
        let c = &self.config;
        if c.concurrency_limit == 0 {
            return Err(ExtractError::InvalidConfig("concurrency_limit must be ≥ 1".into()));
        }
        if c.rate_limit_per_minute == 0 {
            return Err(ExtractError::InvalidConfig(
                "rate_limit_per_minute must be ≥ 1".into(),
            ));
        }
        if c.retry_max_attempts == 0 {
            return Err(ExtractError::InvalidConfig(
                "retry_max_attempts must be ≥ 1 (1 disables retries)".into(),
            ));
        }
        if !(c.retry_initial_delay_secs > 0.0) {
            return Err(ExtractError::InvalidConfig(format!(
                "retry_initial_delay_secs must be > 0, got {}",
                c.retry_initial_delay_secs
            )));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(ExtractError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::builder().build().expect("defaults build");
        assert_eq!(config.concurrency_limit, 5);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert!(!config.iterative_refinement_enabled);
    }

    #[test]
    fn setters_clamp() {
        let config = PipelineConfig::builder()
            .dpi(9999)
            .concurrency_limit(0)
            .rate_limit_per_minute(0)
            .temperature(7.0)
            .build()
            .expect("clamped values build");
        assert_eq!(config.dpi, 400);
        assert_eq!(config.concurrency_limit, 1);
        assert_eq!(config.rate_limit_per_minute, 1);
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn rejects_non_positive_delay() {
        let err = PipelineConfig::builder()
            .retry_initial_delay_secs(0.0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("retry_initial_delay_secs"));
    }

    #[test]
    fn rejects_overlap_at_least_chunk_size() {
        let err = PipelineConfig::builder()
            .chunk_size(100)
            .chunk_overlap(100)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn zero_refinement_cycles_is_allowed() {
        let config = PipelineConfig::builder()
            .iterative_refinement(true)
            .max_refinement_cycles(0)
            .build()
            .expect("0 cycles is a valid off-switch");
        assert_eq!(config.max_refinement_cycles, 0);
    }
}
