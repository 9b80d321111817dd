//! Fallback chain construction.
//!
//! A chain is the ordered list of (provider, model) attempts for one
//! session, cheapest first. It is rebuilt whenever a session starts and is
//! never persisted.

use huddle_core::{Connection, ModelTier};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{Catalog, Endpoint, UNKNOWN_PRICE};

/// One attempt in a fallback chain.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEntry {
    pub provider_id: String,
    pub model: String,
    pub endpoint: Endpoint,
    /// Base URL for OpenAI-compatible hosts (connection override or catalog default)
    pub api_base: Option<String>,
    /// `None` for the built-in backend and token-less local providers
    #[serde(skip)]
    pub connection: Option<Connection>,
    /// Average of input and output price per million tokens
    pub sort_key: f64,
}

/// Build the cost-ordered chain for `tier`.
///
/// Entries are dropped when the provider is unknown, when a token is required
/// and missing, or when no model can be chosen. The sort is stable, so equal
/// prices keep the order of `enabled`.
pub fn build_chain(
    catalog: &Catalog,
    enabled: &[String],
    connections: &[Connection],
    tier: ModelTier,
) -> Vec<ChainEntry> {
    let mut chain = Vec::new();

    for id in enabled {
        let Some(entry) = catalog.get(id) else {
            debug!(provider = %id, "Skipping unknown provider");
            continue;
        };

        let connection = connections.iter().find(|c| &c.provider == id);
        if entry.needs_token() && !connection.is_some_and(Connection::has_token) {
            debug!(provider = %id, "Skipping provider without credentials");
            continue;
        }

        let Some(model) = catalog.model_for_tier(id, tier, connection) else {
            debug!(provider = %id, tier = tier.as_str(), "Skipping provider with no usable model");
            continue;
        };

        let api_base = connection
            .and_then(|c| c.base_url.clone())
            .or_else(|| entry.api_base.clone());

        chain.push(ChainEntry {
            provider_id: id.clone(),
            model: model.id.clone(),
            endpoint: entry.endpoint,
            api_base,
            connection: connection.cloned(),
            sort_key: model.average_price().unwrap_or(UNKNOWN_PRICE),
        });
    }

    chain.sort_by(|a, b| a.sort_key.total_cmp(&b.sort_key));

    info!(
        tier = tier.as_str(),
        entries = chain.len(),
        order = %chain
            .iter()
            .map(|e| e.provider_id.as_str())
            .collect::<Vec<_>>()
            .join(" > "),
        "Provider chain built"
    );

    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BUILTIN_PROVIDER;

    fn ids(chain: &[ChainEntry]) -> Vec<&str> {
        chain.iter().map(|e| e.provider_id.as_str()).collect()
    }

    #[test]
    fn empty_inputs_give_empty_chain() {
        let chain = build_chain(&Catalog::builtin(), &[], &[], ModelTier::Standard);
        assert!(chain.is_empty());
    }

    #[test]
    fn builtin_and_credentialed_provider_sorted_by_price() {
        let enabled = vec![BUILTIN_PROVIDER.to_string(), "deepseek".to_string()];
        let conns = vec![Connection::api_key("deepseek", "sk-test")];
        let chain = build_chain(&Catalog::builtin(), &enabled, &conns, ModelTier::Standard);

        assert_eq!(chain.len(), 2);
        assert_eq!(ids(&chain), vec!["deepseek", BUILTIN_PROVIDER]);
        assert!(chain[0].sort_key < chain[1].sort_key);
        assert!(chain[1].connection.is_none());
        assert_eq!(chain[1].endpoint, Endpoint::Builtin);
        assert_eq!(chain[0].api_base.as_deref(), Some("https://api.deepseek.com"));
    }

    #[test]
    fn providers_without_token_are_excluded() {
        let enabled = vec!["openai".to_string(), "groq".to_string()];
        let conns = vec![Connection::api_key("openai", "")];
        let chain = build_chain(&Catalog::builtin(), &enabled, &conns, ModelTier::Basic);
        assert!(chain.is_empty());
    }

    #[test]
    fn unknown_providers_are_skipped() {
        let enabled = vec!["nope".to_string(), BUILTIN_PROVIDER.to_string()];
        let chain = build_chain(&Catalog::builtin(), &enabled, &[], ModelTier::Basic);
        assert_eq!(ids(&chain), vec![BUILTIN_PROVIDER]);
        assert_eq!(chain[0].model, "claude-haiku-4-5-20251001");
    }

    #[test]
    fn local_provider_needs_models_not_token() {
        let enabled = vec!["ollama".to_string(), "lmstudio".to_string()];
        let conns = vec![Connection {
            provider: "ollama".into(),
            base_url: Some("http://gpu-box:11434/v1".into()),
            models: vec!["llama3.2".into()],
            ..Connection::default()
        }];
        let chain = build_chain(&Catalog::builtin(), &enabled, &conns, ModelTier::Standard);
        // lmstudio has neither catalog nor fetched models
        assert_eq!(ids(&chain), vec!["ollama"]);
        assert_eq!(chain[0].model, "llama3.2");
        assert_eq!(chain[0].api_base.as_deref(), Some("http://gpu-box:11434/v1"));
        assert_eq!(chain[0].sort_key, UNKNOWN_PRICE);
    }

    #[test]
    fn equal_prices_keep_enabled_order() {
        let enabled = vec!["groq".to_string(), "gemini".to_string()];
        let conns = vec![
            Connection::api_key("gemini", "AIza-test"),
            Connection::api_key("groq", "gsk_test"),
        ];
        let chain = build_chain(&Catalog::builtin(), &enabled, &conns, ModelTier::Standard);
        assert_eq!(ids(&chain), vec!["groq", "gemini"]);
    }

    #[test]
    fn unpriced_models_sort_last() {
        let enabled = vec!["ollama".to_string(), BUILTIN_PROVIDER.to_string()];
        let conns = vec![Connection {
            provider: "ollama".into(),
            models: vec!["mistral-7b".into()],
            ..Connection::default()
        }];
        let chain = build_chain(&Catalog::builtin(), &enabled, &conns, ModelTier::Reasoning);
        assert_eq!(ids(&chain), vec![BUILTIN_PROVIDER, "ollama"]);
    }
}
