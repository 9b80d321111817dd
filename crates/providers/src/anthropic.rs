//! Anthropic native backend.
//!
//! Uses Anthropic's Messages API directly (not OpenAI-compatible proxy).
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level content blocks with `cache_control` hints
//! - Streaming via SSE with `content_block_delta` events
//!
//! The same backend serves the built-in provider (its own key) and
//! user-connected Anthropic accounts (key carried on the request).

use async_trait::async_trait;
use futures::StreamExt;
use huddle_core::error::ProviderError;
use huddle_core::message::{ChatMessage, Role};
use huddle_core::provider::*;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::sse::{SseBuffer, SseLine};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Sent as the first user turn when the assistant speaks first.
///
/// The Messages API requires the transcript to open with a user message.
pub const OPENING_CUE: &str = "(The meeting is starting. Please open it.)";

/// Anthropic Messages API backend.
pub struct AnthropicBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicBackend {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: None,
            client,
        })
    }

    /// Key used when the request carries no credential (built-in provider).
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn to_system_blocks(system: &SystemPrompt) -> Vec<ApiSystemBlock> {
        system
            .blocks()
            .into_iter()
            .filter(|b| !b.text.is_empty())
            .map(|b| ApiSystemBlock {
                kind: "text",
                text: b.text,
                cache_control: b.cache.then_some(CacheControl { kind: "ephemeral" }),
            })
            .collect()
    }

    /// Convert the transcript, making sure it opens with a user turn.
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);
        if messages.first().is_none_or(|m| m.role != Role::User) {
            result.push(ApiMessage {
                role: "user",
                content: OPENING_CUE.to_string(),
            });
        }
        result.extend(messages.iter().map(|m| ApiMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));
        result
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
            "stream": true,
        });

        let system = Self::to_system_blocks(&request.system);
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }

        body
    }
}

/// What one Anthropic SSE data payload means.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    /// `message_start`: prompt-side usage and the answering model
    Start(Usage),
    /// `message_delta`: running output token count
    OutputTokens(u32),
    Stop,
    Failed(ProviderError),
    Ignore,
}

fn token_field(usage: &serde_json::Value, key: &str) -> u32 {
    usage[key].as_u64().unwrap_or(0) as u32
}

fn parse_stream_data(data: &str) -> StreamEvent {
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
            return StreamEvent::Ignore;
        }
    };

    match event["type"].as_str().unwrap_or("") {
        "message_start" => {
            let message = &event["message"];
            let usage = &message["usage"];
            let cache_read = token_field(usage, "cache_read_input_tokens");
            let cache_write = token_field(usage, "cache_creation_input_tokens");
            // Anthropic reports uncached input separately; fold cache tokens in
            StreamEvent::Start(Usage {
                input_tokens: token_field(usage, "input_tokens") + cache_read + cache_write,
                output_tokens: token_field(usage, "output_tokens"),
                cache_read_tokens: cache_read,
                cache_write_tokens: cache_write,
                model: message["model"].as_str().unwrap_or_default().to_string(),
            })
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            match (delta["type"].as_str(), delta["text"].as_str()) {
                (Some("text_delta"), Some(text)) if !text.is_empty() => {
                    StreamEvent::Text(text.to_string())
                }
                _ => StreamEvent::Ignore,
            }
        }
        "message_delta" => match event["usage"]["output_tokens"].as_u64() {
            Some(out) => StreamEvent::OutputTokens(out as u32),
            None => StreamEvent::Ignore,
        },
        "message_stop" => StreamEvent::Stop,
        "error" => {
            let error = &event["error"];
            let message = error["message"].as_str().unwrap_or("stream error").to_string();
            match error["type"].as_str() {
                Some("overloaded_error") => StreamEvent::Failed(ProviderError::Overloaded {
                    status_code: 529,
                }),
                Some("rate_limit_error") => StreamEvent::Failed(ProviderError::RateLimited {
                    retry_after_secs: 5,
                }),
                _ => StreamEvent::Failed(ProviderError::StreamInterrupted(message)),
            }
        }
        _ => StreamEvent::Ignore,
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ReplyStream, ProviderError> {
        let Some(api_key) = request
            .credential
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.api_key.clone())
        else {
            return Err(ProviderError::NotConfigured(
                "no Anthropic API key available".into(),
            ));
        };

        let base_url = request
            .base_url
            .as_deref()
            .unwrap_or(&self.base_url)
            .trim_end_matches('/');
        let url = format!("{base_url}/v1/messages");
        let body = Self::build_body(&request);

        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(e.to_string())
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic streaming error");
            return Err(ProviderError::from_status(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let requested_model = request.model.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseBuffer::new();
            let mut usage = Usage {
                model: requested_model,
                ..Usage::default()
            };

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    // Anthropic repeats the event type inside each data payload
                    let SseLine::Data(data) = line else { continue };
                    match parse_stream_data(&data) {
                        StreamEvent::Text(text) => {
                            if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                                return;
                            }
                        }
                        StreamEvent::Start(start) => {
                            let model = if start.model.is_empty() {
                                std::mem::take(&mut usage.model)
                            } else {
                                start.model.clone()
                            };
                            usage = Usage { model, ..start };
                        }
                        StreamEvent::OutputTokens(out) => usage.output_tokens = out,
                        StreamEvent::Stop => {
                            let _ = tx.send(Ok(StreamChunk::finished(Some(usage)))).await;
                            return;
                        }
                        StreamEvent::Failed(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                        StreamEvent::Ignore => {}
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx.send(Ok(StreamChunk::finished(Some(usage)))).await;
        });

        Ok(rx)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiSystemBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}
