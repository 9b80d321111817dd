//! The session lifecycle state machine.
//!
//! | Event | From | To |
//! |-------|------|----|
//! | `agenda_ready` | INITIALIZING | OPENING |
//! | `user_message` | OPENING | AGENDA_LOOP |
//! | `turn_complete` | AGENDA_LOOP | AGENDA_LOOP if items are open, else OPEN_FLOOR |
//! | `new_items` | OPEN_FLOOR | AGENDA_LOOP |
//! | `user_done` | OPEN_FLOOR | CLOSING |
//! | `timeout` | OPENING, AGENDA_LOOP, OPEN_FLOOR | PAUSED |
//! | `resume` | PAUSED | AGENDA_LOOP if items are open, else OPEN_FLOOR |
//! | `quick_summary` | PAUSED | CLOSING |
//! | `closed` | any | CLOSED (`ended_at` is stamped once) |
//!
//! Every (state, event) pair not listed is a no-op.

use chrono::Utc;
use huddle_core::session::{Session, SessionEvent, SessionState};
use tracing::{debug, info};

/// Where `event` takes a session in `state`, or `None` for a no-op.
///
/// `has_open_items` decides between the agenda loop and the open floor.
pub fn next_state(
    state: SessionState,
    event: SessionEvent,
    has_open_items: bool,
) -> Option<SessionState> {
    use SessionEvent as E;
    use SessionState as S;

    let agenda_or_floor = if has_open_items {
        S::AgendaLoop
    } else {
        S::OpenFloor
    };

    match (state, event) {
        (S::Initializing, E::AgendaReady) => Some(S::Opening),
        (S::Opening, E::UserMessage) => Some(S::AgendaLoop),
        (S::AgendaLoop, E::TurnComplete) => Some(agenda_or_floor),
        (S::OpenFloor, E::NewItems) => Some(S::AgendaLoop),
        (S::OpenFloor, E::UserDone) => Some(S::Closing),
        (S::Opening | S::AgendaLoop | S::OpenFloor, E::Timeout) => Some(S::Paused),
        (S::Paused, E::Resume) => Some(agenda_or_floor),
        (S::Paused, E::QuickSummary) => Some(S::Closing),
        (_, E::Closed) => Some(S::Closed),
        _ => None,
    }
}

/// Apply `event` to `session`. Returns false when the event was a no-op.
pub fn transition(session: &mut Session, event: SessionEvent) -> bool {
    let from = session.state;
    let Some(to) = next_state(from, event, session.has_open_items()) else {
        debug!(session_id = %session.id, state = %from, event = ?event, "Event ignored");
        return false;
    };

    session.state = to;
    if event == SessionEvent::Closed && from != SessionState::Closed {
        session.ended_at = Some(Utc::now());
    }
    if from != to {
        info!(session_id = %session.id, from = %from, to = %to, event = ?event, "Session state changed");
    }
    true
}
