//! Meeting lifecycle: state machine, prompt assembly and the turn loop.

pub mod engine;
pub mod prompt;
pub mod state;

pub use engine::{Meeting, SessionEngine, TextSink, TurnOutcome};
pub use prompt::{assemble_system_prompt, meeting_rules};
pub use state::{next_state, transition};
