//! Cost accounting for huddle.
//!
//! Provides the model pricing table (with cache-aware cost calculation and a
//! conservative fallback for unknown models) and the per-session usage
//! ledger the engine records every model call into.

pub mod ledger;
pub mod pricing;

pub use ledger::{LedgerEntry, ProviderTotals, UsageLedger, format_cost, format_tokens};
pub use pricing::{FALLBACK_PRICING, ModelPricing, PricingTable};

/// Errors from the telemetry subsystem.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid pricing: {0}")]
    InvalidPricing(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
