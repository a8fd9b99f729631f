//! LLM access layer: one "call one model once" primitive plus the
//! resilience wrappers composed around it.
//!
//! The layering is deliberate and strictly ordered:
//!
//! ```text
//! FallbackChain( Retry( RateLimited( RawCall ) ) )
//!      │            │        │           │
//!  fallback.rs   retry.rs  rate_limit  client.rs (or a test MockTransport)
//! ```
//!
//! * The **rate limiter** gates every attempt, including retries — a retried
//!   request is a new API call and spends a new token.
//! * The **retry** wrapper recovers locally from transient failures
//!   (5xx / network / 429) with exponential backoff and jitter.
//! * The **fallback chain** recovers from terminal per-model failures
//!   (auth, invalid request, content policy, retry exhaustion) by walking
//!   the registry's declared chain.
//!
//! [`LlmCaller`] is the composition root the rest of the pipeline talks to.
//! The raw transport is a trait so tests can script responses without any
//! network; dyn-compatibility uses manually boxed futures rather than a
//! proc-macro, matching how the rest of our async seams are written.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ModelRegistry, ModelSpec};

pub mod client;
pub mod fallback;
pub mod mock;
pub mod rate_limit;
pub mod retry;

pub use client::HttpLlmClient;
pub use rate_limit::CallBudget;
pub use retry::RetryPolicy;

// ── Message model ────────────────────────────────────────────────────────

/// Who a chat segment is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
}

/// A base64-encoded image attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    /// Base64 payload (no data-URI prefix).
    pub data: String,
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Optional provider hint (`"high"` asks GPT-4-class models for the
    /// full image-tile budget so fine print stays legible).
    pub detail: Option<String>,
}

impl ImageData {
    pub fn new(data: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            mime_type: mime_type.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One role-tagged message, optionally carrying image attachments.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub images: Vec<ImageData>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn user_with_images(text: impl Into<String>, images: Vec<ImageData>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images,
        }
    }
}

/// Requested shape of the completion.
///
/// `JsonObject` maps to provider-native JSON mode where one exists; a
/// provider without JSON mode still returns raw text and the downstream
/// parser copes (that tolerance is a design requirement, not an accident).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    FreeText,
    JsonObject,
}

/// Everything needed for one completion call, minus the model — the
/// fallback chain substitutes model ids as it walks.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: ResponseFormat,
    pub timeout: Duration,
}

/// A successful completion.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

// ── Error taxonomy ───────────────────────────────────────────────────────

/// Classification of a failed LLM call. Drives retry and fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 5xx, connection reset, or timeout. Retryable.
    TransientHttp,
    /// 429 or provider-specific throttle. Retryable.
    RateLimited,
    /// 401/403 or a missing credential. Never retried; chain falls over.
    AuthFailure,
    /// 400/422 — oversized image, token overflow, malformed body.
    InvalidRequest,
    /// Provider refused to answer (safety filter, recitation block).
    ContentPolicy,
    /// Anything else terminal.
    TerminalOther,
}

impl LlmErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmErrorKind::TransientHttp | LlmErrorKind::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmErrorKind::TransientHttp => "transient_http",
            LlmErrorKind::RateLimited => "rate_limited",
            LlmErrorKind::AuthFailure => "auth_failure",
            LlmErrorKind::InvalidRequest => "invalid_request",
            LlmErrorKind::ContentPolicy => "content_policy",
            LlmErrorKind::TerminalOther => "terminal_other",
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a fallback-exhaustion report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAttempt {
    pub model: String,
    pub error: String,
}

fn fmt_attempts(attempts: &[ModelAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({})", a.model, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// An LLM call failure, at any layer of the stack.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// A single call against one model failed.
    #[error("{provider}/{model}: {kind}: {detail}")]
    Call {
        kind: LlmErrorKind,
        provider: String,
        model: String,
        detail: String,
    },

    /// Retries on one model ran out; wraps the last attempt's error.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<LlmError>,
    },

    /// Every model in the chain failed terminally.
    #[error("fallback chain exhausted for '{primary}': {}", fmt_attempts(.attempts))]
    FallbackExhausted {
        primary: String,
        attempts: Vec<ModelAttempt>,
    },
}

impl LlmError {
    pub fn call(
        kind: LlmErrorKind,
        provider: impl Into<String>,
        model: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        LlmError::Call {
            kind,
            provider: provider.into(),
            model: model.into(),
            detail: detail.into(),
        }
    }

    /// The classification that retry/fallback policy keys on.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            LlmError::Call { kind, .. } => *kind,
            LlmError::RetriesExhausted { source, .. } => source.kind(),
            LlmError::FallbackExhausted { .. } => LlmErrorKind::TerminalOther,
        }
    }

    /// Whether a content-policy refusal contributed to this failure,
    /// including refusals buried inside an exhausted fallback chain. The
    /// extractor uses this to decide a paraphrase re-prompt is worth one
    /// more pass.
    pub fn involves_content_policy(&self) -> bool {
        match self {
            LlmError::Call { kind, .. } => *kind == LlmErrorKind::ContentPolicy,
            LlmError::RetriesExhausted { source, .. } => source.involves_content_policy(),
            LlmError::FallbackExhausted { attempts, .. } => attempts
                .iter()
                .any(|a| a.error.contains(LlmErrorKind::ContentPolicy.as_str())),
        }
    }
}

// ── Transport seam ───────────────────────────────────────────────────────

/// Boxed future returned by [`LlmTransport::complete`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<Completion, LlmError>> + Send + 'a>>;

/// "Call one model once": the innermost primitive the resilience wrappers
/// compose around. Implemented by [`HttpLlmClient`] for real providers and
/// by [`mock::MockTransport`] in tests.
pub trait LlmTransport: Send + Sync {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        spec: &'a ModelSpec,
        request: &'a CompletionRequest,
    ) -> TransportFuture<'a>;
}

// ── Composition root ─────────────────────────────────────────────────────

/// Outcome of a fully wrapped call, recording which chain link answered.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub completion: Completion,
    pub model_used: String,
}

/// The composed caller: fallback over retry over rate-limited raw calls.
///
/// Process-scoped collaborators (transport, registry, budget) are passed in
/// explicitly and shared by `Arc` — nothing lives in module-level state, so
/// tests stay hermetic.
#[derive(Clone)]
pub struct LlmCaller {
    transport: Arc<dyn LlmTransport>,
    registry: Arc<ModelRegistry>,
    budget: Arc<CallBudget>,
    retry: RetryPolicy,
}

impl LlmCaller {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        registry: Arc<ModelRegistry>,
        budget: Arc<CallBudget>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            registry,
            budget,
            retry,
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Run `request` against `model_id`, walking its fallback chain on
    /// terminal failure. Every attempt is retry-wrapped and budget-gated.
    pub async fn complete(
        &self,
        model_id: &str,
        request: &CompletionRequest,
    ) -> Result<CallOutcome, LlmError> {
        fallback::run_chain(
            self.transport.as_ref(),
            &self.registry,
            &self.budget,
            &self.retry,
            model_id,
            request,
        )
        .await
    }
}
