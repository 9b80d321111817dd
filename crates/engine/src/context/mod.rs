//! Context assembly: tiered budget builder plus maintenance helpers.

pub mod budget;
pub mod compact;
pub mod consolidate;
pub mod token;

pub use budget::{BuiltContext, ContextBlock, ContextBuilder};
pub use compact::{compact, compact_record};
pub use consolidate::consolidate;
pub use token::estimate_tokens;
