//! Provider catalog: every backend huddle can route to, with models,
//! prices, and how each one authenticates.
//!
//! Model choice for a tier goes through an explicit `(provider, tier)` table
//! first. Keyword matching on model names only runs for providers the table
//! doesn't cover (custom endpoints, locally discovered models).

use huddle_config::{AppConfig, CustomProviderConfig};
use huddle_core::{Connection, ModelTier};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Id of the built-in backend that needs no user connection.
pub const BUILTIN_PROVIDER: &str = "huddle";

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Shipped with the app; no user connection needed
    Builtin,
    ApiKey,
    OAuth,
    /// OAuth or an API key
    Either,
    /// Runs on the user's machine; a token is optional
    Local,
}

/// Logical wire endpoint. The router maps each to a `Backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    /// Anthropic Messages API with the built-in key
    Builtin,
    /// Anthropic Messages API with the user's key
    Anthropic,
    /// OpenAI-compatible chat completions
    OpenAiCompat,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Builtin => "builtin",
            Endpoint::Anthropic => "anthropic",
            Endpoint::OpenAiCompat => "openai_compat",
        }
    }
}

/// A model offered by a provider. Prices are USD per million tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogModel {
    pub id: String,
    pub name: String,
    pub input_per_m: Option<f64>,
    pub output_per_m: Option<f64>,
    /// Can't reliably produce the structured reply block
    #[serde(default)]
    pub weak: bool,
}

impl CatalogModel {
    fn priced(id: &str, name: &str, input: f64, output: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input_per_m: Some(input),
            output_per_m: Some(output),
            weak: false,
        }
    }

    fn weak(mut self) -> Self {
        self.weak = true;
        self
    }

    /// A model known only by id (fetched from the provider).
    pub fn unpriced(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            input_per_m: None,
            output_per_m: None,
            weak: false,
        }
    }

    /// Average of input and output price, when both are known.
    pub fn average_price(&self) -> Option<f64> {
        match (self.input_per_m, self.output_per_m) {
            (Some(i), Some(o)) => Some((i + o) / 2.0),
            _ => None,
        }
    }

    fn sort_price(&self) -> f64 {
        self.average_price().unwrap_or(UNKNOWN_PRICE)
    }

    fn matches_any(&self, keywords: &[&str]) -> bool {
        let id = self.id.to_lowercase();
        let name = self.name.to_lowercase();
        keywords.iter().any(|kw| id.contains(kw) || name.contains(kw))
    }
}

/// Sort key for models without a known price; they go to the back of the chain.
pub const UNKNOWN_PRICE: f64 = 999.0;

/// One provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub auth: AuthKind,
    pub endpoint: Endpoint,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub models: Vec<CatalogModel>,
}

impl CatalogEntry {
    fn new(id: &str, name: &str, auth: AuthKind, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            auth,
            endpoint,
            api_base: None,
            models: Vec::new(),
        }
    }

    fn base(mut self, api_base: &str) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    fn model(mut self, model: CatalogModel) -> Self {
        self.models.push(model);
        self
    }

    /// Whether a chain entry can be built without a stored token.
    pub fn needs_token(&self) -> bool {
        !matches!(self.auth, AuthKind::Builtin | AuthKind::Local)
    }

    /// Catalog models, or the connection's fetched list when the catalog has none.
    pub fn effective_models(&self, connection: Option<&Connection>) -> Vec<CatalogModel> {
        if !self.models.is_empty() {
            return self.models.clone();
        }
        connection
            .map(|c| c.models.iter().map(CatalogModel::unpriced).collect())
            .unwrap_or_default()
    }
}

// ── Tier keywords (offline fallback) ──

const BASIC_KEYWORDS: &[&str] = &["haiku", "mini", "flash", "instant", "8b", "small", "nemo"];
const STANDARD_KEYWORDS: &[&str] = &[
    "sonnet", "flash", "chat", "gpt-4o-mini", "70b", "grok-2-mini", "small", "nemo", "72b",
    "sonar", "k2.5",
];
const REASONING_KEYWORDS: &[&str] = &[
    "sonnet", "pro", "gpt-4o", "reasoner", "grok-2", "opus", "large", "sonar-pro", "72b", "k2.5",
];

fn tier_keywords(tier: ModelTier) -> &'static [&'static str] {
    match tier {
        ModelTier::Basic => BASIC_KEYWORDS,
        ModelTier::Standard => STANDARD_KEYWORDS,
        ModelTier::Reasoning => REASONING_KEYWORDS,
    }
}

/// Pick a model for `tier` from `models` by name keywords.
///
/// Weak models are never chosen. Reasoning excludes anything that also reads
/// as a basic model (`gpt-4o-mini` is not `gpt-4o`). With no keyword hit the
/// cheapest capable model wins; ties keep list order.
pub fn keyword_model(models: &[CatalogModel], tier: ModelTier) -> Option<&CatalogModel> {
    let capable: Vec<&CatalogModel> = models.iter().filter(|m| !m.weak).collect();
    if capable.is_empty() {
        return None;
    }
    let keywords = tier_keywords(tier);
    let matches: Vec<&CatalogModel> = capable
        .iter()
        .copied()
        .filter(|m| m.matches_any(keywords))
        .filter(|m| tier != ModelTier::Reasoning || !m.matches_any(BASIC_KEYWORDS))
        .collect();
    let pool = if matches.is_empty() { capable } else { matches };
    pool.into_iter()
        .min_by(|a, b| a.sort_price().total_cmp(&b.sort_price()))
}

/// All known providers plus the explicit tier table.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
    tiers: HashMap<(String, ModelTier), String>,
}

impl Catalog {
    /// The shipped provider list.
    pub fn builtin() -> Self {
        use AuthKind::*;

        let entries = vec![
            CatalogEntry::new(BUILTIN_PROVIDER, "Huddle", Builtin, Endpoint::Builtin)
                .model(CatalogModel::priced("claude-sonnet-4-5-20250929", "Claude Sonnet 4.5", 3.0, 15.0))
                .model(CatalogModel::priced("claude-haiku-4-5-20251001", "Claude Haiku 4.5", 1.0, 5.0)),
            CatalogEntry::new("gemini", "Google Gemini", Either, Endpoint::OpenAiCompat)
                .base("https://generativelanguage.googleapis.com/v1beta/openai")
                .model(CatalogModel::priced("gemini-2.0-flash", "Gemini 2.0 Flash", 0.0, 0.0))
                .model(CatalogModel::priced("gemini-2.5-pro", "Gemini 2.5 Pro", 0.0, 0.0))
                .model(CatalogModel::priced("gemini-1.5-flash", "Gemini 1.5 Flash", 0.0, 0.0))
                .model(CatalogModel::priced("gemini-1.5-pro", "Gemini 1.5 Pro", 0.0, 0.0)),
            CatalogEntry::new("groq", "Groq", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.groq.com/openai/v1")
                .model(CatalogModel::priced("llama-3.3-70b-versatile", "Llama 3.3 70B", 0.0, 0.0))
                .model(CatalogModel::priced("llama-3.1-8b-instant", "Llama 3.1 8B", 0.0, 0.0).weak())
                .model(CatalogModel::priced("mixtral-8x7b-32768", "Mixtral 8x7B", 0.0, 0.0).weak()),
            CatalogEntry::new("deepseek", "DeepSeek", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.deepseek.com")
                .model(CatalogModel::priced("deepseek-chat", "DeepSeek Chat", 0.14, 0.28))
                .model(CatalogModel::priced("deepseek-reasoner", "DeepSeek Reasoner", 0.55, 2.19)),
            CatalogEntry::new("grok", "xAI (Grok)", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.x.ai/v1")
                .model(CatalogModel::priced("grok-2", "Grok 2", 2.0, 10.0))
                .model(CatalogModel::priced("grok-2-mini", "Grok 2 Mini", 0.3, 0.5)),
            CatalogEntry::new("openai", "OpenAI", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.openai.com/v1")
                .model(CatalogModel::priced("gpt-4o", "GPT-4o", 2.5, 10.0))
                .model(CatalogModel::priced("gpt-4o-mini", "GPT-4o Mini", 0.15, 0.6))
                .model(CatalogModel::priced("o3-mini", "o3 Mini", 1.1, 4.4)),
            CatalogEntry::new("anthropic", "Anthropic", ApiKey, Endpoint::Anthropic)
                .base("https://api.anthropic.com")
                .model(CatalogModel::priced("claude-sonnet-4-5-20250929", "Claude Sonnet 4.5", 3.0, 15.0))
                .model(CatalogModel::priced("claude-haiku-4-5-20251001", "Claude Haiku 4.5", 1.0, 5.0))
                .model(CatalogModel::priced("claude-opus-4-5-20250929", "Claude Opus 4.5", 5.0, 25.0)),
            CatalogEntry::new("mistral", "Mistral", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.mistral.ai/v1")
                .model(CatalogModel::priced("mistral-large-latest", "Mistral Large", 2.0, 6.0))
                .model(CatalogModel::priced("mistral-small-latest", "Mistral Small", 0.1, 0.3))
                .model(CatalogModel::priced("open-mistral-nemo", "Mistral Nemo", 0.15, 0.15).weak()),
            CatalogEntry::new("together", "Together AI", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.together.xyz/v1")
                .model(CatalogModel::priced("meta-llama/Llama-3.3-70B-Instruct-Turbo", "Llama 3.3 70B", 0.88, 0.88))
                .model(CatalogModel::priced("meta-llama/Llama-3.1-8B-Instruct-Turbo", "Llama 3.1 8B", 0.18, 0.18).weak())
                .model(CatalogModel::priced("Qwen/Qwen2.5-72B-Instruct-Turbo", "Qwen 2.5 72B", 1.2, 1.2)),
            CatalogEntry::new("fireworks", "Fireworks AI", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.fireworks.ai/inference/v1")
                .model(CatalogModel::priced("accounts/fireworks/models/llama-v3p3-70b-instruct", "Llama 3.3 70B", 0.9, 0.9))
                .model(CatalogModel::priced("accounts/fireworks/models/qwen2p5-72b-instruct", "Qwen 2.5 72B", 0.9, 0.9)),
            CatalogEntry::new("openrouter", "OpenRouter", ApiKey, Endpoint::OpenAiCompat)
                .base("https://openrouter.ai/api/v1")
                .model(CatalogModel::priced("anthropic/claude-sonnet-4-5-20250929", "Claude Sonnet 4.5", 3.0, 15.0))
                .model(CatalogModel::priced("openai/gpt-4o", "GPT-4o", 2.5, 10.0))
                .model(CatalogModel::priced("google/gemini-2.0-flash-exp", "Gemini Flash", 0.0, 0.0))
                .model(CatalogModel::priced("meta-llama/llama-3.3-70b-instruct", "Llama 3.3 70B", 0.5, 0.5)),
            CatalogEntry::new("perplexity", "Perplexity", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.perplexity.ai")
                .model(CatalogModel::priced("sonar-pro", "Sonar Pro", 3.0, 15.0))
                .model(CatalogModel::priced("sonar", "Sonar", 1.0, 1.0)),
            CatalogEntry::new("kimi", "Kimi", ApiKey, Endpoint::OpenAiCompat)
                .base("https://api.moonshot.cn/v1")
                .model(CatalogModel::priced("kimi-k2.5", "Kimi K2.5", 0.6, 2.5)),
            CatalogEntry::new("ollama", "Ollama", Local, Endpoint::OpenAiCompat)
                .base("http://localhost:11434/v1"),
            CatalogEntry::new("lmstudio", "LM Studio", Local, Endpoint::OpenAiCompat)
                .base("http://localhost:1234/v1"),
        ];

        let mut catalog = Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
            tiers: HashMap::new(),
        };

        let sonnet = "claude-sonnet-4-5-20250929";
        let haiku = "claude-haiku-4-5-20251001";
        catalog.pin(BUILTIN_PROVIDER, [haiku, sonnet, sonnet]);
        catalog.pin("anthropic", [haiku, sonnet, "claude-opus-4-5-20250929"]);
        catalog.pin("gemini", ["gemini-2.0-flash", "gemini-2.0-flash", "gemini-2.5-pro"]);
        catalog.pin("groq", ["llama-3.3-70b-versatile"; 3]);
        catalog.pin("deepseek", ["deepseek-chat", "deepseek-chat", "deepseek-reasoner"]);
        catalog.pin("grok", ["grok-2-mini", "grok-2-mini", "grok-2"]);
        catalog.pin("openai", ["gpt-4o-mini", "gpt-4o-mini", "gpt-4o"]);
        catalog.pin(
            "mistral",
            ["mistral-small-latest", "mistral-small-latest", "mistral-large-latest"],
        );
        catalog.pin(
            "together",
            [
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
                "meta-llama/Llama-3.3-70B-Instruct-Turbo",
                "Qwen/Qwen2.5-72B-Instruct-Turbo",
            ],
        );
        catalog.pin(
            "fireworks",
            [
                "accounts/fireworks/models/llama-v3p3-70b-instruct",
                "accounts/fireworks/models/llama-v3p3-70b-instruct",
                "accounts/fireworks/models/qwen2p5-72b-instruct",
            ],
        );
        catalog.pin(
            "openrouter",
            [
                "google/gemini-2.0-flash-exp",
                "google/gemini-2.0-flash-exp",
                "openai/gpt-4o",
            ],
        );
        catalog.pin("perplexity", ["sonar", "sonar", "sonar-pro"]);
        catalog.pin("kimi", ["kimi-k2.5"; 3]);

        catalog
    }

    /// Shipped providers merged with the custom ones from config.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut catalog = Self::builtin();
        for custom in &config.providers.custom {
            catalog.add_custom(custom);
        }
        catalog
    }

    /// Add (or replace) an OpenAI-compatible provider defined in config.
    pub fn add_custom(&mut self, custom: &CustomProviderConfig) {
        let name = if custom.name.is_empty() {
            custom.id.clone()
        } else {
            custom.name.clone()
        };
        let auth = if custom.requires_key {
            AuthKind::ApiKey
        } else {
            AuthKind::Local
        };
        let mut entry = CatalogEntry::new(&custom.id, &name, auth, Endpoint::OpenAiCompat)
            .base(&custom.base_url);
        entry.models = custom
            .models
            .iter()
            .map(|m| CatalogModel {
                id: m.id.clone(),
                name: m.id.clone(),
                input_per_m: m.input_per_m,
                output_per_m: m.output_per_m,
                weak: false,
            })
            .collect();
        self.tiers.retain(|(provider, _), _| provider != &custom.id);
        self.entries.insert(custom.id.clone(), entry);
    }

    /// Register explicit choices for basic, standard, reasoning.
    fn pin(&mut self, provider: &str, models: [&str; 3]) {
        let tiers = [ModelTier::Basic, ModelTier::Standard, ModelTier::Reasoning];
        for (tier, model) in tiers.into_iter().zip(models) {
            self.tiers
                .insert((provider.to_string(), tier), model.to_string());
        }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Choose a model for `tier` on provider `id`.
    ///
    /// The explicit table wins when its model is present and capable;
    /// otherwise keyword matching over the effective model list.
    pub fn model_for_tier(
        &self,
        id: &str,
        tier: ModelTier,
        connection: Option<&Connection>,
    ) -> Option<CatalogModel> {
        let entry = self.entries.get(id)?;
        let models = entry.effective_models(connection);

        if let Some(pinned) = self.tiers.get(&(id.to_string(), tier)) {
            if let Some(m) = models.iter().find(|m| &m.id == pinned && !m.weak) {
                return Some(m.clone());
            }
        }

        keyword_model(&models, tier).cloned()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}
