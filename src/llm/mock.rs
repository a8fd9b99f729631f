//! Scripted transport for tests: no network, deterministic answers.
//!
//! Three scripting modes cover every test shape in the crate:
//!
//! * **Fixed** — every call gets the same reply (`always`).
//! * **Sequence** — calls pop replies in order, repeating the last one
//!   (`with_sequence`), which is how retry/fallback paths are exercised.
//! * **Rules** — each call is matched against the request's concatenated
//!   message text; the first rule whose needle is contained wins
//!   (`with_rules`). Pipeline tests use this to answer router, extraction,
//!   and refinement prompts differently from one transport.
//!
//! Calls and the model ids they targeted are recorded for assertions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::{Completion, CompletionRequest, LlmError, LlmErrorKind, LlmTransport, TransportFuture};
use crate::models::ModelSpec;

/// A configurable reply for [`MockTransport`].
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this text as the completion content.
    Text(String),
    /// Serialise this value and return it as the completion content.
    Json(serde_json::Value),
    /// Fail with a call error of the given kind.
    Error(LlmErrorKind, String),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        MockReply::Text(content.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        MockReply::Json(value)
    }

    pub fn error(kind: LlmErrorKind, detail: impl Into<String>) -> Self {
        MockReply::Error(kind, detail.into())
    }

    fn produce(&self, model: &str) -> Result<Completion, LlmError> {
        match self {
            MockReply::Text(content) => Ok(Completion {
                content: content.clone(),
                prompt_tokens: 100,
                completion_tokens: 50,
            }),
            MockReply::Json(value) => Ok(Completion {
                content: value.to_string(),
                prompt_tokens: 100,
                completion_tokens: 50,
            }),
            MockReply::Error(kind, detail) => {
                Err(LlmError::call(*kind, "mock", model, detail.clone()))
            }
        }
    }
}

enum Script {
    Fixed(MockReply),
    /// Reversed so replies pop() off the back in call order.
    Sequence(Mutex<Vec<MockReply>>, MockReply),
    Rules {
        rules: Vec<(String, MockReply)>,
        fallback: MockReply,
    },
}

/// A hand-rolled [`LlmTransport`] for tests.
pub struct MockTransport {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
    models: Mutex<Vec<String>>,
}

impl MockTransport {
    /// A transport that always returns `reply`.
    pub fn always(reply: MockReply) -> Self {
        Self {
            script: Script::Fixed(reply),
            delay: None,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    /// A transport that returns `replies` in order, repeating the last.
    pub fn with_sequence(mut replies: Vec<MockReply>) -> Self {
        assert!(!replies.is_empty(), "sequence must have at least one reply");
        let last = replies.last().cloned().unwrap_or(MockReply::text(""));
        replies.reverse();
        Self {
            script: Script::Sequence(Mutex::new(replies), last),
            delay: None,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    /// A transport that matches each request's message text against rule
    /// needles; the first containing match wins, else `fallback`.
    pub fn with_rules(rules: Vec<(&str, MockReply)>, fallback: MockReply) -> Self {
        Self {
            script: Script::Rules {
                rules: rules
                    .into_iter()
                    .map(|(needle, reply)| (needle.to_string(), reply))
                    .collect(),
                fallback,
            },
            delay: None,
            calls: AtomicUsize::new(0),
            models: Mutex::new(Vec::new()),
        }
    }

    /// Simulated per-call latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Model ids in call order.
    pub fn models_called(&self) -> Vec<String> {
        self.models.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn reply_for(&self, request: &CompletionRequest) -> MockReply {
        match &self.script {
            Script::Fixed(reply) => reply.clone(),
            Script::Sequence(queue, last) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop())
                .unwrap_or_else(|| last.clone()),
            Script::Rules { rules, fallback } => {
                let haystack: String = request
                    .messages
                    .iter()
                    .map(|m| m.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                rules
                    .iter()
                    .find(|(needle, _)| haystack.contains(needle.as_str()))
                    .map(|(_, reply)| reply.clone())
                    .unwrap_or_else(|| fallback.clone())
            }
        }
    }
}

impl LlmTransport for MockTransport {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        _spec: &'a ModelSpec,
        request: &'a CompletionRequest,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut models) = self.models.lock() {
                models.push(model.to_string());
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply_for(request).produce(model)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, ResponseFormat};
    use crate::models::Provider;

    fn spec() -> ModelSpec {
        ModelSpec {
            provider: Provider::OpenAi,
            token_limit: 128_000,
            is_vision_capable: true,
            fallback: None,
        }
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest {
            messages: vec![ChatMessage::user(text)],
            temperature: 0.1,
            max_tokens: 64,
            response_format: ResponseFormat::FreeText,
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn sequence_pops_in_order_then_repeats() {
        let mock = MockTransport::with_sequence(vec![
            MockReply::text("first"),
            MockReply::text("second"),
        ]);
        let spec = spec();
        let req = request("x");
        for expected in ["first", "second", "second"] {
            let got = mock.complete("m", &spec, &req).await.unwrap();
            assert_eq!(got.content, expected);
        }
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn rules_match_on_message_text() {
        let mock = MockTransport::with_rules(
            vec![
                ("analyze this document page", MockReply::text("router")),
                ("Extract", MockReply::text("strategy")),
            ],
            MockReply::text("fallback"),
        );
        let spec = spec();
        let router = mock
            .complete("m", &spec, &request("please analyze this document page now"))
            .await
            .unwrap();
        assert_eq!(router.content, "router");
        let other = mock.complete("m", &spec, &request("hello")).await.unwrap();
        assert_eq!(other.content, "fallback");
    }
}
