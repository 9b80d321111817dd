//! Store trait: the persistence contract the orchestration core reads through.
//!
//! Every read the context builder and the agenda recipes need is an explicit
//! query method here, so the core never builds ad hoc queries and can be
//! exercised against the in-memory fake.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::provider::Connection;
use crate::session::Session;

/// Kind of a persisted memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Blocker,
    Commitment,
    WaitingFor,
    Status,
    Decision,
    Discovery,
    Pattern,
    Dependency,
    Insight,
    Idea,
    PersonFact,
    FollowUp,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Blocker => "blocker",
            RecordKind::Commitment => "commitment",
            RecordKind::WaitingFor => "waiting_for",
            RecordKind::Status => "status",
            RecordKind::Decision => "decision",
            RecordKind::Discovery => "discovery",
            RecordKind::Pattern => "pattern",
            RecordKind::Dependency => "dependency",
            RecordKind::Insight => "insight",
            RecordKind::Idea => "idea",
            RecordKind::PersonFact => "person_fact",
            RecordKind::FollowUp => "follow_up",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single persisted fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: i64,
    pub kind: RecordKind,
    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Id of the record that replaced this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<i64>,
}

impl MemoryRecord {
    pub fn new(id: i64, kind: RecordKind, content: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            content: content.into(),
            project: None,
            person: None,
            created_at: Utc::now(),
            superseded_by: None,
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_person(mut self, person: impl Into<String>) -> Self {
        self.person = Some(person.into());
        self
    }

    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// A planned task for a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub text: String,
    pub plan_date: NaiveDate,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub position: i32,
}

/// Most recent activity seen for a tracked project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectActivity {
    pub project: String,
    pub last_activity: DateTime<Utc>,
}

/// The persistence contract.
///
/// All read methods return only active (non-superseded) records.
#[async_trait]
pub trait Store: Send + Sync {
    /// Active records of one kind, newest first.
    async fn active_records(&self, kind: RecordKind) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Active records of any of `kinds` created at or after `since`, newest first.
    async fn records_since(
        &self,
        kinds: &[RecordKind],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Active status records for the named projects, newest first.
    async fn statuses_for(&self, projects: &[String]) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Active person facts about the named people, newest first.
    async fn facts_about(&self, people: &[String]) -> Result<Vec<MemoryRecord>, StoreError>;

    /// Distinct projects that have at least one active status record.
    async fn tracked_projects(&self) -> Result<Vec<String>, StoreError>;

    /// Latest activity per tracked project.
    async fn project_activity(&self) -> Result<Vec<ProjectActivity>, StoreError>;

    /// Tasks planned for `date`, in position order.
    async fn tasks_for(&self, date: NaiveDate) -> Result<Vec<TaskRow>, StoreError>;

    /// Mark `old` as superseded by `keep`.
    async fn supersede(&self, old: i64, keep: i64) -> Result<(), StoreError>;

    /// Persist a snapshot of a session.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Persist a (possibly refreshed) provider connection.
    async fn save_connection(&self, connection: &Connection) -> Result<(), StoreError>;

    // ── Convenience reads ──

    async fn blockers(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        self.active_records(RecordKind::Blocker).await
    }

    async fn commitments(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        self.active_records(RecordKind::Commitment).await
    }

    async fn waiting_for(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        self.active_records(RecordKind::WaitingFor).await
    }

    async fn recent_decisions(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        self.records_since(&[RecordKind::Decision], since, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_kind_serializes_snake_case() {
        let json = serde_json::to_string(&RecordKind::WaitingFor).unwrap();
        assert_eq!(json, r#""waiting_for""#);
        assert_eq!(RecordKind::PersonFact.to_string(), "person_fact");
    }

    #[test]
    fn record_builder() {
        let rec = MemoryRecord::new(7, RecordKind::Status, "shipping beta")
            .with_project("atlas")
            .with_person("maya");
        assert_eq!(rec.project.as_deref(), Some("atlas"));
        assert_eq!(rec.person.as_deref(), Some("maya"));
        assert!(rec.is_active());
    }
}
