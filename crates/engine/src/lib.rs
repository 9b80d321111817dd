//! The meeting orchestration core of huddle.
//!
//! A meeting runs as a sequence of turns:
//!
//! 1. **Start**: generate the agenda for the meeting type and build the
//!    cost-ordered provider chain
//! 2. **Assemble** the layered system prompt (persona, rules, store context,
//!    agenda state)
//! 3. **Call** the chain through the router, streaming text to the caller
//! 4. **Parse** the `<meeting_state>` block out of the reply
//! 5. **Apply** agenda updates and advance the state machine
//! 6. **Snapshot** the session to the store
//!
//! Provider failures never fail a turn; the user gets an in-character
//! fallback reply and the meeting carries on.

pub mod agenda;
pub mod context;
pub mod extraction;
pub mod session;

pub use agenda::{AgendaScheduler, CarriedItem, agenda_for};
pub use context::{BuiltContext, ContextBlock, ContextBuilder, estimate_tokens};
pub use extraction::{ReplyParser, TaggedParser, format_instructions, parse_meeting_state};
pub use session::{Meeting, SessionEngine, TextSink, TurnOutcome, next_state, transition};
