//! LLM provider routing for huddle.
//!
//! The catalog describes every known provider and its priced models; a chain
//! is the cost-ordered list of attempts built for one session; the router
//! walks that chain through the Anthropic and OpenAI-compatible backends,
//! falling back on transient failures.

pub mod anthropic;
pub mod catalog;
pub mod chain;
pub mod credentials;
pub mod openai_compat;
pub mod router;
pub mod sse;

pub use anthropic::AnthropicBackend;
pub use catalog::{AuthKind, BUILTIN_PROVIDER, Catalog, CatalogEntry, CatalogModel, Endpoint};
pub use chain::{ChainEntry, build_chain};
pub use credentials::{HttpTokenRefresher, RefreshedToken, TokenRefresher, ensure_fresh};
pub use openai_compat::OpenAiCompatBackend;
pub use router::{FailedAttempt, ProviderRouter, RouteError, RoutedReply};
