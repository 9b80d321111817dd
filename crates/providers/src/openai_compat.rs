//! OpenAI-compatible backend.
//!
//! Works with: OpenAI, Groq, DeepSeek, xAI, Mistral, Together AI, Fireworks,
//! OpenRouter, Perplexity, Kimi, Gemini's OpenAI endpoint, Ollama, LM Studio,
//! and any other `/chat/completions` host.
//!
//! The layered system prompt is flattened into one leading `system` message.
//! Replies stream over SSE; usage arrives in the final chunk when the host
//! honors `stream_options.include_usage`.

use async_trait::async_trait;
use futures::StreamExt;
use huddle_core::error::ProviderError;
use huddle_core::message::ChatMessage;
use huddle_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::sse::{SseBuffer, SseLine};

/// An OpenAI-compatible streaming backend.
///
/// One instance serves every compatible provider; the base URL and key come
/// with each request.
pub struct OpenAiCompatBackend {
    name: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "openai_compat".into(),
            client,
        })
    }

    /// System prompt first, then the transcript.
    fn to_api_messages(system: &SystemPrompt, messages: &[ChatMessage]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        let flat = system.flat();
        if !flat.is_empty() {
            out.push(ApiMessage {
                role: "system".into(),
                content: flat,
            });
        }
        out.extend(messages.iter().map(|m| ApiMessage {
            role: m.role.as_str().into(),
            content: m.content.clone(),
        }));
        out
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system, &request.messages),
            "temperature": request.temperature,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }
}

/// What one SSE data payload means.
#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    Usage(Usage),
    Done,
    Ignore,
}

fn parse_stream_data(data: &str, model: &str) -> StreamEvent {
    if data == "[DONE]" {
        return StreamEvent::Done;
    }

    let resp: StreamResponse = match serde_json::from_str(data) {
        Ok(r) => r,
        Err(e) => {
            trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
            return StreamEvent::Ignore;
        }
    };

    if let Some(text) = resp
        .choices
        .first()
        .and_then(|c| c.delta.content.as_deref())
        .filter(|t| !t.is_empty())
    {
        return StreamEvent::Text(text.to_string());
    }

    if let Some(u) = resp.usage {
        let cached = u
            .prompt_tokens_details
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0);
        return StreamEvent::Usage(Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: cached,
            cache_write_tokens: 0,
            model: resp.model.unwrap_or_else(|| model.to_string()),
        });
    }

    StreamEvent::Ignore
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ReplyStream, ProviderError> {
        let Some(base_url) = request.base_url.as_deref() else {
            return Err(ProviderError::NotConfigured(
                "OpenAI-compatible request without a base URL".into(),
            ));
        };
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, url = %url, "Sending streaming request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = request.credential.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::from_status(status, error_body));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let model = request.model.clone();

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseBuffer::new();
            let mut usage: Option<Usage> = None;

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
                    let SseLine::Data(data) = line else { continue };
                    match parse_stream_data(&data, &model) {
                        StreamEvent::Text(text) => {
                            if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                                return;
                            }
                        }
                        StreamEvent::Usage(u) => usage = Some(u),
                        StreamEvent::Done => {
                            let _ = tx.send(Ok(StreamChunk::finished(usage.take()))).await;
                            return;
                        }
                        StreamEvent::Ignore => {}
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(StreamChunk::finished(usage))).await;
        });

        Ok(rx)
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokenDetails>,
}

#[derive(Debug, Deserialize)]
struct PromptTokenDetails {
    #[serde(default)]
    cached_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_becomes_first_message() {
        let system = SystemPrompt::Layered(vec![
            SystemBlock::cached("persona"),
            SystemBlock::volatile("turn"),
        ]);
        let msgs = vec![ChatMessage::assistant("Morning!"), ChatMessage::user("hi")];
        let api = OpenAiCompatBackend::to_api_messages(&system, &msgs);
        assert_eq!(api.len(), 3);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[0].content, "persona\n\n---\n\nturn");
        assert_eq!(api[1].role, "assistant");
        assert_eq!(api[2].role, "user");
    }

    #[test]
    fn empty_system_is_omitted() {
        let api = OpenAiCompatBackend::to_api_messages(&SystemPrompt::default(), &[]);
        assert!(api.is_empty());
    }

    #[test]
    fn body_requests_streamed_usage() {
        let mut req = ProviderRequest::new(SystemPrompt::Flat("s".into()), vec![]);
        req.model = "llama-3.3-70b-versatile".into();
        req.max_tokens = Some(512);
        let body = OpenAiCompatBackend::build_body(&req);
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["model"], "llama-3.3-70b-versatile");
    }

    #[test]
    fn parse_content_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        assert_eq!(
            parse_stream_data(data, "m"),
            StreamEvent::Text("Hello".into())
        );
    }

    #[test]
    fn parse_usage_chunk() {
        let data = r#"{"model":"gpt-4o-mini-2024-07-18","choices":[],"usage":{"prompt_tokens":100,"completion_tokens":5,"prompt_tokens_details":{"cached_tokens":64}}}"#;
        match parse_stream_data(data, "gpt-4o-mini") {
            StreamEvent::Usage(u) => {
                assert_eq!(u.input_tokens, 100);
                assert_eq!(u.output_tokens, 5);
                assert_eq!(u.cache_read_tokens, 64);
                assert_eq!(u.model, "gpt-4o-mini-2024-07-18");
            }
            other => panic!("expected usage, got {other:?}"),
        }
    }

    #[test]
    fn parse_done_and_garbage() {
        assert_eq!(parse_stream_data("[DONE]", "m"), StreamEvent::Done);
        assert_eq!(parse_stream_data("{not json", "m"), StreamEvent::Ignore);
        assert_eq!(
            parse_stream_data(r#"{"choices":[{"delta":{}}]}"#, "m"),
            StreamEvent::Ignore
        );
    }

    #[tokio::test]
    async fn missing_base_url_is_not_configured() {
        let backend = OpenAiCompatBackend::new(Duration::from_secs(5)).unwrap();
        let req = ProviderRequest::new(SystemPrompt::default(), vec![]);
        let err = backend.stream(req).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
