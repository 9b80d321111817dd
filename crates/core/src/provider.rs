//! Backend trait, the abstraction over LLM wire endpoints.
//!
//! A Backend knows how to send a system prompt plus a message history to one
//! kind of endpoint and hand back an incremental text stream. Provider-specific
//! framing (role renaming, cache hints, SSE parsing) stays inside the
//! implementation; the router and the session engine only see this contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ChatMessage;

/// Separator used when layered system blocks are flattened for backends that
/// accept a single system string.
pub const FLAT_BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// One segment of a layered system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,

    /// Whether the backend may cache this prefix segment.
    #[serde(default)]
    pub cache: bool,
}

impl SystemBlock {
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: true,
        }
    }

    pub fn volatile(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: false,
        }
    }
}

/// System context, either as one string or as ordered cacheable layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemPrompt {
    Flat(String),
    Layered(Vec<SystemBlock>),
}

impl SystemPrompt {
    /// Render as a single string.
    pub fn flat(&self) -> String {
        match self {
            SystemPrompt::Flat(text) => text.clone(),
            SystemPrompt::Layered(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join(FLAT_BLOCK_SEPARATOR),
        }
    }

    /// Layered view; a flat prompt becomes one uncached block.
    pub fn blocks(&self) -> Vec<SystemBlock> {
        match self {
            SystemPrompt::Flat(text) if text.is_empty() => Vec::new(),
            SystemPrompt::Flat(text) => vec![SystemBlock::volatile(text.clone())],
            SystemPrompt::Layered(blocks) => blocks.clone(),
        }
    }
}

impl Default for SystemPrompt {
    fn default() -> Self {
        SystemPrompt::Flat(String::new())
    }
}

/// Model capability tier a session asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Basic,
    #[default]
    Standard,
    Reasoning,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Basic => "basic",
            ModelTier::Standard => "standard",
            ModelTier::Reasoning => "reasoning",
        }
    }
}

/// A stored credential for one provider.
///
/// API-key providers only carry `access_token`. OAuth-style connections also
/// carry a refresh token and an expiry (unix seconds).
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Connection {
    pub provider: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    /// Endpoint override (local and custom providers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Models discovered from the provider, for catalog entries without a fixed list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    /// Set when a lazy refresh replaced the access token; the owner should persist it.
    #[serde(skip)]
    pub refreshed: bool,
}

impl Connection {
    /// An API-key style connection.
    pub fn api_key(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            access_token: key.into(),
            ..Self::default()
        }
    }

    pub fn is_oauth(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_token(&self) -> bool {
        !self.access_token.is_empty()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field("oauth", &self.is_oauth())
            .field("expires_at", &self.expires_at)
            .field("base_url", &self.base_url)
            .field("models", &self.models)
            .field("refreshed", &self.refreshed)
            .finish()
    }
}

/// A single call to a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model id as the endpoint expects it
    pub model: String,

    /// System context
    pub system: SystemPrompt,

    /// Ordered transcript
    pub messages: Vec<ChatMessage>,

    /// Resolved credential; `None` for built-in backends that carry their own key
    #[serde(skip)]
    pub credential: Option<String>,

    /// Endpoint override for OpenAI-compatible hosts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    /// A request with no model or credential bound yet; the router fills those per attempt.
    pub fn new(system: SystemPrompt, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: String::new(),
            system,
            messages,
            credential: None,
            base_url: None,
            max_tokens: None,
            temperature: default_temperature(),
        }
    }
}

/// Token usage reported at the end of a stream.
///
/// `input_tokens` counts every prompt token, cached ones included;
/// `cache_read_tokens` and `cache_write_tokens` are subsets of it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,

    #[serde(default)]
    pub cache_read_tokens: u32,

    #[serde(default)]
    pub cache_write_tokens: u32,

    /// Model that actually answered
    #[serde(default)]
    pub model: String,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only near the end)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn finished(usage: Option<Usage>) -> Self {
        Self {
            content: None,
            done: true,
            usage,
        }
    }
}

/// Incremental reply from a backend.
pub type ReplyStream = tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core Backend trait.
///
/// Every wire endpoint (Anthropic Messages, OpenAI-compatible chat completions,
/// test doubles) implements this. A returned `Err` means the call never
/// produced a stream; errors inside an open stream arrive as stream items.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "anthropic", "openai_compat").
    fn name(&self) -> &str;

    /// Open a streamed completion.
    async fn stream(&self, request: ProviderRequest) -> Result<ReplyStream, ProviderError>;
}
