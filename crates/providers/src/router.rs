//! Provider router: walks a fallback chain until one backend starts replying.
//!
//! Each chain entry names a logical endpoint; the router owns one backend per
//! endpoint and binds the entry's model, base URL and credential onto the
//! request before calling it. Transient failures (see
//! [`ProviderError::triggers_fallback`]) move on to the next entry, whether
//! the call fails to open or the opened stream fails before its first text.
//! Anything else is returned to the caller immediately.

use huddle_config::AppConfig;
use huddle_core::error::ProviderError;
use huddle_core::provider::{Backend, ProviderRequest, ReplyStream, StreamChunk};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::anthropic::AnthropicBackend;
use crate::catalog::Endpoint;
use crate::chain::ChainEntry;
use crate::credentials::{HttpTokenRefresher, TokenRefresher, ensure_fresh};
use crate::openai_compat::OpenAiCompatBackend;

/// One failed attempt, kept for the aggregated exhaustion error.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub provider: String,
    pub model: String,
    pub error: ProviderError,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("No providers available: the fallback chain is empty")]
    EmptyChain,

    #[error("Provider '{provider}' failed: {error}")]
    Terminal {
        provider: String,
        error: ProviderError,
    },

    #[error("All providers failed: {}", describe_attempts(.attempts))]
    Exhausted { attempts: Vec<FailedAttempt> },
}

fn describe_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{} ({}): {}", a.provider, a.model, a.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A stream opened by one chain entry.
///
/// Chunks read while checking the stream's start are replayed first by
/// [`RoutedReply::recv`].
pub struct RoutedReply {
    pub provider_id: String,
    pub model: String,
    head: VecDeque<StreamChunk>,
    stream: ReplyStream,
}

impl RoutedReply {
    /// Next item of the reply, or `None` once the stream has closed.
    pub async fn recv(&mut self) -> Option<Result<StreamChunk, ProviderError>> {
        match self.head.pop_front() {
            Some(chunk) => Some(Ok(chunk)),
            None => self.stream.recv().await,
        }
    }
}

impl std::fmt::Debug for RoutedReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedReply")
            .field("provider_id", &self.provider_id)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Routes requests across a fallback chain.
#[derive(Default)]
pub struct ProviderRouter {
    backends: HashMap<Endpoint, Arc<dyn Backend>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
}

impl ProviderRouter {
    /// Create a router with no backends registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend serving `endpoint`.
    pub fn with_backend(mut self, endpoint: Endpoint, backend: Arc<dyn Backend>) -> Self {
        self.backends.insert(endpoint, backend);
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Build the standard backends from configuration.
    ///
    /// The built-in endpoint is registered only when a built-in key is set;
    /// chain entries pointing at it otherwise fall through as not configured.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.builtin.timeout_secs);

        let anthropic: Arc<dyn Backend> = Arc::new(AnthropicBackend::new(timeout)?);
        let openai: Arc<dyn Backend> = Arc::new(OpenAiCompatBackend::new(timeout)?);

        let mut router = Self::new()
            .with_backend(Endpoint::Anthropic, anthropic)
            .with_backend(Endpoint::OpenAiCompat, openai);

        if let Some(key) = config.builtin.api_key.as_deref().filter(|k| !k.is_empty()) {
            let builtin = AnthropicBackend::new(timeout)?
                .with_api_key(key)
                .with_base_url(&config.builtin.base_url);
            router = router.with_backend(Endpoint::Builtin, Arc::new(builtin));
        }

        if let Some(refresher) = HttpTokenRefresher::from_config(&config.oauth)? {
            router = router.with_refresher(Arc::new(refresher));
        }

        Ok(router)
    }

    /// Whether a backend is registered for `endpoint`.
    pub fn has_backend(&self, endpoint: Endpoint) -> bool {
        self.backends.contains_key(&endpoint)
    }

    /// Try each chain entry in order until one opens a stream that gets as
    /// far as its first text (or finishes cleanly without any).
    ///
    /// Credentials are refreshed lazily per entry; refreshed connections stay
    /// on the chain entries (flagged `refreshed`) for the caller to persist.
    pub async fn call_with_fallback(
        &self,
        chain: &mut [ChainEntry],
        request: &ProviderRequest,
    ) -> Result<RoutedReply, RouteError> {
        if chain.is_empty() {
            return Err(RouteError::EmptyChain);
        }

        let total = chain.len();
        let mut attempts = Vec::new();
        let now = chrono::Utc::now().timestamp();

        for (i, entry) in chain.iter_mut().enumerate() {
            info!(
                provider = %entry.provider_id,
                model = %entry.model,
                attempt = i + 1,
                total,
                "Fallback: trying provider"
            );

            let result = match self.prepare(entry, request, now).await {
                Ok((backend, bound)) => match backend.stream(bound).await {
                    Ok(mut stream) => match read_head(&mut stream).await {
                        Ok(head) => Ok((head, stream)),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };

            match result {
                Ok((head, stream)) => {
                    return Ok(RoutedReply {
                        provider_id: entry.provider_id.clone(),
                        model: entry.model.clone(),
                        head,
                        stream,
                    });
                }
                Err(error) if error.triggers_fallback() => {
                    warn!(
                        provider = %entry.provider_id,
                        error = %error,
                        "Fallback: provider failed, trying next"
                    );
                    attempts.push(FailedAttempt {
                        provider: entry.provider_id.clone(),
                        model: entry.model.clone(),
                        error,
                    });
                }
                Err(error) => {
                    warn!(provider = %entry.provider_id, error = %error, "Provider failed");
                    return Err(RouteError::Terminal {
                        provider: entry.provider_id.clone(),
                        error,
                    });
                }
            }
        }

        Err(RouteError::Exhausted { attempts })
    }

    /// Pick the backend for `entry` and bind model, base URL and credential.
    async fn prepare(
        &self,
        entry: &mut ChainEntry,
        request: &ProviderRequest,
        now: i64,
    ) -> Result<(Arc<dyn Backend>, ProviderRequest), ProviderError> {
        let backend = self.backends.get(&entry.endpoint).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!("no backend for '{}'", entry.provider_id))
        })?;

        let credential = match entry.connection.as_mut() {
            Some(conn) if conn.has_token() => {
                Some(ensure_fresh(conn, self.refresher.as_deref(), now).await?)
            }
            _ => None,
        };

        let mut bound = request.clone();
        bound.model = entry.model.clone();
        bound.base_url = entry.api_base.clone();
        bound.credential = credential;

        Ok((backend, bound))
    }
}

/// Read `stream` up to and including its first text chunk.
///
/// An error before any text is returned so the caller can treat it like a
/// failed open. Errors after the first text belong to the caller.
async fn read_head(stream: &mut ReplyStream) -> Result<VecDeque<StreamChunk>, ProviderError> {
    let mut head = VecDeque::new();
    while let Some(item) = stream.recv().await {
        let chunk = item?;
        let stop = chunk.done || chunk.content.as_deref().is_some_and(|c| !c.is_empty());
        head.push_back(chunk);
        if stop {
            break;
        }
    }
    Ok(head)
}
