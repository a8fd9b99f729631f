//! Fallback-chain walker: try each model in a declared chain until one
//! answers.
//!
//! The chain for a model is the model itself followed by its transitive
//! `fallback` links from the registry, which validated the graph acyclic at
//! load time. Ordering is therefore deterministic (YAML-declared), the walk
//! is finite, and no model is ever attempted twice within one call.
//!
//! Each link runs the retry-wrapped, budget-gated raw call. Any error that
//! survives the retry layer — auth, invalid request, content-policy
//! refusal, or transient-retry exhaustion — moves the walk to the next
//! link. Content-policy refusals deliberately fall over rather than
//! re-prompting the same model.

use tracing::{debug, warn};

use super::{
    retry, CallBudget, CallOutcome, CompletionRequest, LlmError, LlmErrorKind, LlmTransport,
    ModelAttempt, RetryPolicy,
};
use crate::models::ModelRegistry;

/// Walk `primary`'s fallback chain, returning the first success.
///
/// Exhaustion yields [`LlmError::FallbackExhausted`] listing every
/// attempted model with its terminal cause.
pub(crate) async fn run_chain(
    transport: &dyn LlmTransport,
    registry: &ModelRegistry,
    budget: &CallBudget,
    policy: &RetryPolicy,
    primary: &str,
    request: &CompletionRequest,
) -> Result<CallOutcome, LlmError> {
    let chain = registry.chain(primary);
    if chain.is_empty() {
        return Err(LlmError::call(
            LlmErrorKind::InvalidRequest,
            "registry",
            primary,
            "model id is not declared in the model registry",
        ));
    }

    let mut attempts = Vec::with_capacity(chain.len());
    for model_id in &chain {
        let Some(spec) = registry.get(model_id) else {
            continue;
        };

        let result = retry::with_backoff(policy, || async {
            budget.acquire().await;
            transport.complete(model_id, spec, request).await
        })
        .await;

        match result {
            Ok(completion) => {
                if !attempts.is_empty() {
                    debug!(
                        "model '{model_id}' answered after {} failed chain link(s)",
                        attempts.len()
                    );
                }
                return Ok(CallOutcome {
                    completion,
                    model_used: model_id.clone(),
                });
            }
            Err(err) => {
                warn!("model '{model_id}' failed, trying next in chain: {err}");
                attempts.push(ModelAttempt {
                    model: model_id.clone(),
                    error: err.to_string(),
                });
            }
        }
    }

    Err(LlmError::FallbackExhausted {
        primary: primary.to_string(),
        attempts,
    })
}
