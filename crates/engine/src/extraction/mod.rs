//! Reply extraction.
//!
//! The model appends a `<meeting_state>` block to each reply. A
//! [`ReplyParser`] splits the reply into what the user sees and the
//! structured records and agenda directives the engine acts on.

pub mod protocol;
pub mod tagged;

use huddle_core::extraction::ExtractionResult;

pub use protocol::format_instructions;
pub use tagged::{TaggedParser, parse_meeting_state};

/// Turns a raw model reply into an [`ExtractionResult`].
///
/// Parsing never fails: anything unrecognized is dropped and the reply text
/// is still returned for display.
pub trait ReplyParser: Send + Sync {
    fn parse(&self, reply: &str) -> ExtractionResult;

    /// Protocol description for the system prompt.
    fn format_instructions(&self, with_profiles: bool) -> String;
}
