//! Agenda item types.
//!
//! An agenda is the working set of topics a meeting intends to raise. Items
//! carry a type, a priority, an optional question for the user, and a status
//! that moves from pending through active to one of the terminal states.

use serde::{Deserialize, Serialize};

/// What kind of discussion an item asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    #[serde(rename = "INFORM")]
    Inform,
    #[serde(rename = "DECIDE")]
    Decide,
    #[serde(rename = "FOLLOW-UP")]
    FollowUp,
    #[serde(rename = "RESEARCH")]
    Research,
    #[serde(rename = "REFLECT")]
    Reflect,
    #[serde(rename = "PLAN")]
    Plan,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Inform => "INFORM",
            ItemType::Decide => "DECIDE",
            ItemType::FollowUp => "FOLLOW-UP",
            ItemType::Research => "RESEARCH",
            ItemType::Reflect => "REFLECT",
            ItemType::Plan => "PLAN",
        }
    }

    /// Lenient parse of a model-provided type label.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().replace('_', "-").as_str() {
            "INFORM" => Some(ItemType::Inform),
            "DECIDE" => Some(ItemType::Decide),
            "FOLLOW-UP" | "FOLLOWUP" => Some(ItemType::FollowUp),
            "RESEARCH" => Some(ItemType::Research),
            "REFLECT" => Some(ItemType::Reflect),
            "PLAN" => Some(ItemType::Plan),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Item priority. Ordering follows urgency: `Critical < High < Normal < Low`,
/// so an ascending sort puts the most urgent item first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    /// Sort rank, 0 is most urgent.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }

    /// One step more urgent. Critical stays critical.
    pub fn escalate(&self) -> Self {
        match self {
            Priority::Low => Priority::Normal,
            Priority::Normal => Priority::High,
            Priority::High | Priority::Critical => Priority::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "normal" => Some(Priority::Normal),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Active,
    Resolved,
    Deferred,
    Dismissed,
}

impl ItemStatus {
    /// Pending and active items still need discussion.
    pub fn is_open(&self) -> bool {
        matches!(self, ItemStatus::Pending | ItemStatus::Active)
    }
}

/// One discussion topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgendaItem {
    pub id: String,

    #[serde(rename = "type")]
    pub item_type: ItemType,

    pub priority: Priority,

    pub content: String,

    /// `None` means the item is informational only
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub status: ItemStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    /// Opaque back-reference to whatever produced the item
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    /// Stable correlation key for items that track a profile gap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_id: Option<String>,
}

impl AgendaItem {
    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}
