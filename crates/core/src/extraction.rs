//! Structured output recovered from a model reply.
//!
//! A reply may carry a protocol block with facts to persist (`Extractions`)
//! and instructions for the agenda (`AgendaUpdates`). Parsing lives in the
//! engine; these are the shapes both sides agree on.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::agenda::{ItemType, Priority};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTask {
    pub text: String,
    /// Raw deadline as the model wrote it; see [`normalize_deadline`].
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub content: String,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub content: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitingFor {
    pub content: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileField {
    pub field: String,
    pub value: String,
}

/// Facts to persist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extractions {
    #[serde(default)]
    pub tasks: Vec<ExtractedTask>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub commitments: Vec<Commitment>,
    #[serde(default)]
    pub waiting_for: Vec<WaitingFor>,
    #[serde(default)]
    pub profiles: Vec<ProfileField>,
}

impl Extractions {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
            && self.decisions.is_empty()
            && self.commitments.is_empty()
            && self.waiting_for.is_empty()
            && self.profiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
            + self.decisions.len()
            + self.commitments.len()
            + self.waiting_for.len()
            + self.profiles.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveDirective {
    pub id: String,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferDirective {
    pub id: String,
}

/// A new item requested by the model. Missing fields take the scheduler's defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDirective {
    #[serde(default, rename = "type")]
    pub item_type: Option<ItemType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub content: String,
}

/// Agenda changes requested by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgendaUpdates {
    #[serde(default)]
    pub resolves: Vec<ResolveDirective>,
    #[serde(default)]
    pub defers: Vec<DeferDirective>,
    #[serde(default)]
    pub adds: Vec<AddDirective>,
}

impl AgendaUpdates {
    pub fn is_empty(&self) -> bool {
        self.resolves.is_empty() && self.defers.is_empty() && self.adds.is_empty()
    }
}

/// Everything a reply parser produces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Reply text with the protocol block removed
    pub display_text: String,
    pub extractions: Extractions,
    pub agenda_updates: AgendaUpdates,
    /// Model's hint for what to raise next
    #[serde(default)]
    pub next_item: Option<String>,
}

impl ExtractionResult {
    /// A result carrying only display text.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            display_text: text.into(),
            ..Self::default()
        }
    }

    /// Whether the reply carried any structured output at all.
    pub fn has_content(&self) -> bool {
        !self.extractions.is_empty() || !self.agenda_updates.is_empty() || self.next_item.is_some()
    }
}

/// Accept only `YYYY-MM-DD` calendar dates. Anything else is dropped without
/// error so that a sloppy deadline never blocks the fact it is attached to.
pub fn normalize_deadline(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let bytes = raw.as_bytes();
    let shape_ok = bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !shape_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
