//! Session types: meeting kinds, lifecycle states, and the session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agenda::AgendaItem;
use crate::message::ChatMessage;
use crate::provider::ModelTier;

/// The kind of meeting being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    MorningMeeting,
    CheckIn,
    EveningReview,
    WeeklyReview,
    Onboarding,
    Strategic,
}

impl SessionType {
    pub const ALL: [SessionType; 6] = [
        SessionType::MorningMeeting,
        SessionType::CheckIn,
        SessionType::EveningReview,
        SessionType::WeeklyReview,
        SessionType::Onboarding,
        SessionType::Strategic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::MorningMeeting => "morning_meeting",
            SessionType::CheckIn => "check_in",
            SessionType::EveningReview => "evening_review",
            SessionType::WeeklyReview => "weekly_review",
            SessionType::Onboarding => "onboarding",
            SessionType::Strategic => "strategic",
        }
    }

    /// Default model tier for this kind of meeting.
    pub fn tier(&self) -> ModelTier {
        match self {
            SessionType::CheckIn => ModelTier::Basic,
            SessionType::MorningMeeting
            | SessionType::EveningReview
            | SessionType::Onboarding => ModelTier::Standard,
            SessionType::WeeklyReview | SessionType::Strategic => ModelTier::Reasoning,
        }
    }
}

impl std::fmt::Display for SessionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Initializing,
    Opening,
    AgendaLoop,
    OpenFloor,
    Paused,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "INITIALIZING",
            SessionState::Opening => "OPENING",
            SessionState::AgendaLoop => "AGENDA_LOOP",
            SessionState::OpenFloor => "OPEN_FLOOR",
            SessionState::Paused => "PAUSED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    AgendaReady,
    UserMessage,
    TurnComplete,
    NewItems,
    UserDone,
    Timeout,
    Resume,
    QuickSummary,
    Closed,
}

impl SessionEvent {
    pub const ALL: [SessionEvent; 9] = [
        SessionEvent::AgendaReady,
        SessionEvent::UserMessage,
        SessionEvent::TurnComplete,
        SessionEvent::NewItems,
        SessionEvent::UserDone,
        SessionEvent::Timeout,
        SessionEvent::Resume,
        SessionEvent::QuickSummary,
        SessionEvent::Closed,
    ];
}

/// A meeting in progress (or finished).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    #[serde(rename = "type")]
    pub session_type: SessionType,

    pub state: SessionState,

    #[serde(default)]
    pub agenda: Vec<AgendaItem>,

    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>, session_type: SessionType) -> Self {
        Self {
            id: id.into(),
            session_type,
            state: SessionState::Initializing,
            agenda: Vec::new(),
            messages: Vec::new(),
            summary: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Whether any agenda item still needs discussion.
    pub fn has_open_items(&self) -> bool {
        self.agenda.iter().any(AgendaItem::is_open)
    }

    /// Number of user turns so far.
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == crate::message::Role::User)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_map() {
        assert_eq!(SessionType::CheckIn.tier(), ModelTier::Basic);
        assert_eq!(SessionType::MorningMeeting.tier(), ModelTier::Standard);
        assert_eq!(SessionType::Onboarding.tier(), ModelTier::Standard);
        assert_eq!(SessionType::WeeklyReview.tier(), ModelTier::Reasoning);
        assert_eq!(SessionType::Strategic.tier(), ModelTier::Reasoning);
    }

    #[test]
    fn new_session_starts_initializing() {
        let s = Session::new("session-1", SessionType::CheckIn);
        assert_eq!(s.state, SessionState::Initializing);
        assert!(s.agenda.is_empty());
        assert!(!s.has_open_items());
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn wire_names() {
        let json = serde_json::to_string(&SessionType::EveningReview).unwrap();
        assert_eq!(json, r#""evening_review""#);
        let json = serde_json::to_string(&SessionState::AgendaLoop).unwrap();
        assert_eq!(json, r#""AGENDA_LOOP""#);
    }
}
