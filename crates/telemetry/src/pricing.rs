//! Built-in pricing table for the models huddle routes to.
//!
//! Prices are in USD per 1 million tokens. Each model has an input and
//! output price. Custom pricing can be added at runtime via TOML config.
//! Models missing from the table are billed at [`FALLBACK_PRICING`] so an
//! unknown model never reads as free.

use huddle_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::TelemetryError;

/// Cache reads are billed at this fraction of the input price.
pub const CACHE_READ_MULTIPLIER: f64 = 0.1;
/// Cache writes are billed at this multiple of the input price.
pub const CACHE_WRITE_MULTIPLIER: f64 = 1.25;

/// Used for any model not in the table.
pub const FALLBACK_PRICING: ModelPricing = ModelPricing {
    input_per_m: 3.0,
    output_per_m: 15.0,
};

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Create a pricing entry from untrusted input.
    pub fn try_new(input_per_m: f64, output_per_m: f64) -> Result<Self, TelemetryError> {
        if !input_per_m.is_finite() || !output_per_m.is_finite() {
            return Err(TelemetryError::InvalidPricing("prices must be finite".into()));
        }
        if input_per_m < 0.0 || output_per_m < 0.0 {
            return Err(TelemetryError::InvalidPricing(
                "prices must be non-negative".into(),
            ));
        }
        Ok(Self::new(input_per_m, output_per_m))
    }

    /// Average of input and output price; the fallback chain sorts on this.
    pub fn average(&self) -> f64 {
        (self.input_per_m + self.output_per_m) / 2.0
    }

    /// Compute cost for plain token counts (no cache).
    pub fn cost(&self, input_tokens: u32, output_tokens: u32) -> f64 {
        (input_tokens as f64 * self.input_per_m + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0
    }

    /// Compute cost for a usage report, splitting cached input out.
    ///
    /// `input_tokens` includes cached tokens; only the remainder is billed at
    /// the regular rate.
    pub fn cost_for(&self, usage: &Usage) -> f64 {
        let regular = usage
            .input_tokens
            .saturating_sub(usage.cache_read_tokens)
            .saturating_sub(usage.cache_write_tokens) as f64;
        let input = regular * self.input_per_m;
        let cache_read = usage.cache_read_tokens as f64 * self.input_per_m * CACHE_READ_MULTIPLIER;
        let cache_write =
            usage.cache_write_tokens as f64 * self.input_per_m * CACHE_WRITE_MULTIPLIER;
        let output = usage.output_tokens as f64 * self.output_per_m;
        (input + cache_read + cache_write + output) / 1_000_000.0
    }
}

/// Thread-safe pricing table with built-in defaults and custom overrides.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
}

impl PricingTable {
    /// Create a pricing table with built-in model prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert("claude-sonnet-4-5".into(), ModelPricing::new(3.0, 15.0));
        prices.insert("claude-haiku-4-5".into(), ModelPricing::new(1.0, 5.0));
        prices.insert("claude-opus-4-5".into(), ModelPricing::new(5.0, 25.0));

        // ── Google (free tier) ─────────────────────────────────────
        prices.insert("gemini-2.0-flash".into(), ModelPricing::new(0.0, 0.0));
        prices.insert("gemini-2.5-pro".into(), ModelPricing::new(0.0, 0.0));
        prices.insert("gemini-1.5-flash".into(), ModelPricing::new(0.0, 0.0));
        prices.insert("gemini-1.5-pro".into(), ModelPricing::new(0.0, 0.0));

        // ── Groq (free tier) ───────────────────────────────────────
        prices.insert("llama-3.3-70b-versatile".into(), ModelPricing::new(0.0, 0.0));
        prices.insert("llama-3.1-8b-instant".into(), ModelPricing::new(0.0, 0.0));
        prices.insert("mixtral-8x7b-32768".into(), ModelPricing::new(0.0, 0.0));

        // ── DeepSeek ───────────────────────────────────────────────
        prices.insert("deepseek-chat".into(), ModelPricing::new(0.14, 0.28));
        prices.insert("deepseek-reasoner".into(), ModelPricing::new(0.55, 2.19));

        // ── xAI ────────────────────────────────────────────────────
        prices.insert("grok-2".into(), ModelPricing::new(2.0, 10.0));
        prices.insert("grok-2-mini".into(), ModelPricing::new(0.3, 0.5));

        // ── OpenAI ─────────────────────────────────────────────────
        prices.insert("gpt-4o".into(), ModelPricing::new(2.5, 10.0));
        prices.insert("gpt-4o-mini".into(), ModelPricing::new(0.15, 0.6));
        prices.insert("o3-mini".into(), ModelPricing::new(1.1, 4.4));

        Self {
            prices: RwLock::new(prices),
        }
    }

    /// Create an empty pricing table.
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ModelPricing>> {
        self.prices.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up pricing for a model. Returns None if not found.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.read().get(model).copied()
    }

    /// Add or update pricing for a model.
    pub fn set(&self, model: impl Into<String>, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(|e| e.into_inner());
        prices.insert(model.into(), pricing);
    }

    /// Resolve pricing with flexible matching, or `None` if nothing fits.
    ///
    /// Tries exact match first, then strips a provider prefix
    /// (`openai/gpt-4o` → `gpt-4o`), then the longest table key that is a
    /// prefix of the model (`claude-haiku-4-5-20251001` → `claude-haiku-4-5`).
    pub fn lookup(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.read();

        // 1. Exact match
        if let Some(p) = prices.get(model) {
            return Some(*p);
        }

        // 2. Bare model name
        let model_lower = model.to_lowercase();
        let bare_model = model_lower.rsplit('/').next().unwrap_or(&model_lower);
        if let Some(p) = prices.get(bare_model) {
            return Some(*p);
        }

        // 3. Longest key that prefixes the dated/suffixed id
        prices
            .iter()
            .filter(|(key, _)| bare_model.starts_with(&key.to_lowercase()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
    }

    /// Pricing for a model, falling back to [`FALLBACK_PRICING`].
    pub fn pricing_for(&self, model: &str) -> ModelPricing {
        self.lookup(model).unwrap_or(FALLBACK_PRICING)
    }

    /// Compute USD cost for a model call without cache accounting.
    pub fn compute_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        self.pricing_for(model).cost(input_tokens, output_tokens)
    }

    /// Compute USD cost for a usage report, including cache reads/writes.
    pub fn calculate_cost(&self, usage: &Usage) -> f64 {
        self.pricing_for(&usage.model).cost_for(usage)
    }

    /// List all known model names.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of models in the pricing table.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable")
            .field("models", &self.len())
            .finish()
    }
}
