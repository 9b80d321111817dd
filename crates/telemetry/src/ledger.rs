//! Per-session usage ledger.
//!
//! Each model call made during a meeting is recorded with the provider that
//! answered, its token usage, and the computed cost. The ledger is owned by
//! the session engine and summarized when the meeting closes.

use chrono::{DateTime, Utc};
use huddle_core::Usage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::TelemetryError;
use crate::pricing::PricingTable;

/// One recorded model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub provider: String,
    pub usage: Usage,
    pub cost_usd: f64,
    pub at: DateTime<Utc>,
}

/// Aggregated usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderTotals {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Running totals across a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageLedger {
    entries: Vec<LedgerEntry>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Price a call and record it. Returns the cost in USD.
    pub fn record(&mut self, provider: &str, usage: &Usage, pricing: &PricingTable) -> f64 {
        let cost_usd = pricing.calculate_cost(usage);
        tracing::debug!(
            provider = %provider,
            model = %usage.model,
            input = usage.input_tokens,
            output = usage.output_tokens,
            cost = %format_cost(cost_usd),
            "Recorded model usage"
        );
        self.entries.push(LedgerEntry {
            provider: provider.to_string(),
            usage: usage.clone(),
            cost_usd,
            at: Utc::now(),
        });
        cost_usd
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn calls(&self) -> usize {
        self.entries.len()
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost_usd).sum()
    }

    pub fn total_input_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.usage.input_tokens as u64).sum()
    }

    pub fn total_output_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.usage.output_tokens as u64).sum()
    }

    pub fn total_cache_read_tokens(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.usage.cache_read_tokens as u64)
            .sum()
    }

    /// Totals grouped by provider id, in name order.
    pub fn by_provider(&self) -> BTreeMap<String, ProviderTotals> {
        let mut out: BTreeMap<String, ProviderTotals> = BTreeMap::new();
        for e in &self.entries {
            let t = out.entry(e.provider.clone()).or_default();
            t.calls += 1;
            t.input_tokens += e.usage.input_tokens as u64;
            t.output_tokens += e.usage.output_tokens as u64;
            t.cost_usd += e.cost_usd;
        }
        out
    }

    /// One-line human summary, e.g. `3 calls, 12.4K in / 850 out, $0.05`.
    pub fn summary(&self) -> String {
        format!(
            "{} calls, {} in / {} out, {}",
            self.calls(),
            format_tokens(self.total_input_tokens()),
            format_tokens(self.total_output_tokens()),
            format_cost(self.total_cost())
        )
    }

    pub fn to_json(&self) -> Result<String, TelemetryError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Format a USD amount with two decimals: `$0.42`.
pub fn format_cost(usd: f64) -> String {
    format!("${usd:.2}")
}

/// Compact token count: `950`, `12.4K`, `1.2M`.
pub fn format_tokens(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(model: &str, input: u32, output: u32) -> Usage {
        Usage {
            input_tokens: input,
            output_tokens: output,
            model: model.into(),
            ..Usage::default()
        }
    }

    #[test]
    fn format_helpers() {
        assert_eq!(format_cost(0.0), "$0.00");
        assert_eq!(format_cost(3.456), "$3.46");
        assert_eq!(format_tokens(950), "950");
        assert_eq!(format_tokens(12_400), "12.4K");
        assert_eq!(format_tokens(1_260_000), "1.3M");
    }

    #[test]
    fn ledger_accumulates_by_provider() {
        let pricing = PricingTable::with_defaults();
        let mut ledger = UsageLedger::new();

        let c1 = ledger.record("huddle", &usage("claude-sonnet-4-5", 1_000_000, 0), &pricing);
        assert!((c1 - 3.0).abs() < 1e-10);
        ledger.record("groq", &usage("llama-3.3-70b-versatile", 5_000, 200), &pricing);
        ledger.record("huddle", &usage("claude-sonnet-4-5", 0, 2_000), &pricing);

        assert_eq!(ledger.calls(), 3);
        assert_eq!(ledger.total_input_tokens(), 1_005_000);
        let by = ledger.by_provider();
        assert_eq!(by["huddle"].calls, 2);
        assert_eq!(by["groq"].cost_usd, 0.0);
        assert!((ledger.total_cost() - 3.03).abs() < 1e-10);
        assert_eq!(ledger.summary(), "3 calls, 1.0M in / 2.2K out, $3.03");
    }

    #[test]
    fn ledger_serializes() {
        let mut ledger = UsageLedger::new();
        ledger.record("huddle", &usage("x", 1, 1), &PricingTable::empty());
        let json = ledger.to_json().unwrap();
        assert!(json.contains("huddle"));
    }
}
