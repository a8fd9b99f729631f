//! HTTP transport: one reqwest client, three provider wire formats.
//!
//! The client is intentionally thin — all prompt engineering lives in
//! [`crate::prompts`] and all resilience in the wrappers around this
//! module. Its one job is to turn a [`CompletionRequest`] into the body a
//! provider expects, run it with the per-call timeout, and classify any
//! failure into an [`LlmErrorKind`] so retry and fallback can react.
//!
//! Credentials come from the environment (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`, `GEMINI_API_KEY`); a missing variable surfaces as
//! `auth_failure` on first use rather than at startup, so a deployment that
//! only ever reaches one provider needs only that provider's key.
//!
//! JSON mode: OpenAI and Gemini have native switches; Anthropic does not,
//! so `JsonObject` requests still return raw text there and the downstream
//! repair pass deals with fences.

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::debug;

use super::{
    Completion, CompletionRequest, ImageData, LlmError, LlmErrorKind, LlmTransport,
    ResponseFormat, Role, TransportFuture,
};
use crate::models::{ModelSpec, Provider};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Multi-provider HTTP LLM client sharing one connection pool.
pub struct HttpLlmClient {
    http: reqwest::Client,
}

impl Default for HttpLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpLlmClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn credential(provider: Provider, model: &str) -> Result<String, LlmError> {
        match std::env::var(provider.credential_var()) {
            Ok(key) if !key.is_empty() => Ok(key),
            _ => Err(LlmError::call(
                LlmErrorKind::AuthFailure,
                provider.as_str(),
                model,
                format!("environment variable {} is not set", provider.credential_var()),
            )),
        }
    }

    // ── OpenAI ───────────────────────────────────────────────────────────

    async fn complete_openai(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let provider = Provider::OpenAi;
        let key = Self::credential(provider, model)?;

        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                };
                if m.images.is_empty() {
                    json!({ "role": role, "content": m.text })
                } else {
                    let mut parts = vec![json!({ "type": "text", "text": m.text })];
                    parts.extend(m.images.iter().map(openai_image_part));
                    json!({ "role": role, "content": parts })
                }
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if request.response_format == ResponseFormat::JsonObject {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .http
            .post(OPENAI_URL)
            .bearer_auth(key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        if !status.is_success() {
            return Err(error_from_status(provider, model, status, &payload));
        }

        let choice = &payload["choices"][0];
        if choice["finish_reason"].as_str() == Some("content_filter") {
            return Err(LlmError::call(
                LlmErrorKind::ContentPolicy,
                provider.as_str(),
                model,
                "completion stopped by content filter",
            ));
        }

        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        debug!("openai/{model}: {} chars", content.len());

        Ok(Completion {
            content,
            prompt_tokens: payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        })
    }

    // ── Anthropic ────────────────────────────────────────────────────────

    async fn complete_anthropic(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let provider = Provider::Anthropic;
        let key = Self::credential(provider, model)?;

        // Anthropic takes the system prompt as a top-level field.
        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| {
                let mut parts: Vec<Value> = m
                    .images
                    .iter()
                    .map(|img| {
                        json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": img.mime_type,
                                "data": img.data,
                            }
                        })
                    })
                    .collect();
                // The API requires at least one non-empty content block.
                let text = if m.text.is_empty() { " " } else { m.text.as_str() };
                parts.push(json!({ "type": "text", "text": text }));
                json!({ "role": "user", "content": parts })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(ANTHROPIC_URL)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        if !status.is_success() {
            return Err(error_from_status(provider, model, status, &payload));
        }

        if payload["stop_reason"].as_str() == Some("refusal") {
            return Err(LlmError::call(
                LlmErrorKind::ContentPolicy,
                provider.as_str(),
                model,
                "model refused the request",
            ));
        }

        let content = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        debug!("anthropic/{model}: {} chars", content.len());

        Ok(Completion {
            content,
            prompt_tokens: payload["usage"]["input_tokens"].as_u64().unwrap_or(0),
            completion_tokens: payload["usage"]["output_tokens"].as_u64().unwrap_or(0),
        })
    }

    // ── Gemini ───────────────────────────────────────────────────────────

    async fn complete_gemini(
        &self,
        model: &str,
        request: &CompletionRequest,
    ) -> Result<Completion, LlmError> {
        let provider = Provider::Gemini;
        let key = Self::credential(provider, model)?;

        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| {
                let mut parts = vec![json!({ "text": m.text })];
                parts.extend(m.images.iter().map(|img| {
                    json!({
                        "inline_data": { "mime_type": img.mime_type, "data": img.data }
                    })
                }));
                json!({ "role": "user", "parts": parts })
            })
            .collect();

        let mut generation_config = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        });
        if request.response_format == ResponseFormat::JsonObject {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }

        let url = format!("{GEMINI_BASE}/{model}:generateContent?key={key}");
        let response = self
            .http
            .post(&url)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest(provider, model, e))?;

        if !status.is_success() {
            return Err(error_from_status(provider, model, status, &payload));
        }

        if let Some(reason) = payload["promptFeedback"]["blockReason"].as_str() {
            return Err(LlmError::call(
                LlmErrorKind::ContentPolicy,
                provider.as_str(),
                model,
                format!("prompt blocked: {reason}"),
            ));
        }

        let candidate = &payload["candidates"][0];
        if matches!(
            candidate["finishReason"].as_str(),
            Some("SAFETY") | Some("RECITATION")
        ) {
            return Err(LlmError::call(
                LlmErrorKind::ContentPolicy,
                provider.as_str(),
                model,
                format!(
                    "candidate blocked: {}",
                    candidate["finishReason"].as_str().unwrap_or("unknown")
                ),
            ));
        }

        let content = candidate["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        debug!("gemini/{model}: {} chars", content.len());

        Ok(Completion {
            content,
            prompt_tokens: payload["usageMetadata"]["promptTokenCount"]
                .as_u64()
                .unwrap_or(0),
            completion_tokens: payload["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0),
        })
    }
}

impl LlmTransport for HttpLlmClient {
    fn complete<'a>(
        &'a self,
        model: &'a str,
        spec: &'a ModelSpec,
        request: &'a CompletionRequest,
    ) -> TransportFuture<'a> {
        Box::pin(async move {
            match spec.provider {
                Provider::OpenAi => self.complete_openai(model, request).await,
                Provider::Anthropic => self.complete_anthropic(model, request).await,
                Provider::Gemini => self.complete_gemini(model, request).await,
            }
        })
    }
}

fn openai_image_part(img: &ImageData) -> Value {
    let mut part = json!({
        "type": "image_url",
        "image_url": { "url": format!("data:{};base64,{}", img.mime_type, img.data) }
    });
    if let Some(detail) = &img.detail {
        part["image_url"]["detail"] = json!(detail);
    }
    part
}

/// Classify an HTTP status into the error taxonomy.
fn classify_status(status: StatusCode) -> LlmErrorKind {
    match status.as_u16() {
        429 => LlmErrorKind::RateLimited,
        401 | 403 => LlmErrorKind::AuthFailure,
        400 | 422 => LlmErrorKind::InvalidRequest,
        408 => LlmErrorKind::TransientHttp,
        s if s >= 500 => LlmErrorKind::TransientHttp,
        _ => LlmErrorKind::TerminalOther,
    }
}

fn error_from_status(
    provider: Provider,
    model: &str,
    status: StatusCode,
    payload: &Value,
) -> LlmError {
    let detail = payload["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {status}"));
    LlmError::call(classify_status(status), provider.as_str(), model, detail)
}

/// Transport-level failures: timeouts and connection errors are transient;
/// a malformed body is terminal.
fn classify_reqwest(provider: Provider, model: &str, err: reqwest::Error) -> LlmError {
    let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
        LlmErrorKind::TransientHttp
    } else {
        LlmErrorKind::TerminalOther
    };
    LlmError::call(kind, provider.as_str(), model, err.to_string())
}
