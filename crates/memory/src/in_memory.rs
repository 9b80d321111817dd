//! In-memory store, useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use huddle_core::error::StoreError;
use huddle_core::provider::Connection;
use huddle_core::session::Session;
use huddle_core::store::{MemoryRecord, ProjectActivity, RecordKind, Store, TaskRow};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Tables {
    records: Vec<MemoryRecord>,
    tasks: Vec<TaskRow>,
    sessions: HashMap<String, Session>,
    snapshots: usize,
    connections: HashMap<String, Connection>,
    next_id: i64,
}

/// A store that keeps every table in process memory.
///
/// Reads can be made to fail on demand so degraded paths can be tested.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    fail_reads: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record; an id of 0 is replaced with the next free id.
    pub async fn add_record(&self, mut record: MemoryRecord) -> i64 {
        let mut tables = self.tables.write().await;
        if record.id == 0 {
            tables.next_id += 1;
            record.id = tables.next_id;
        } else {
            tables.next_id = tables.next_id.max(record.id);
        }
        let id = record.id;
        tables.records.push(record);
        id
    }

    pub async fn add_task(&self, task: TaskRow) {
        self.tables.write().await.tasks.push(task);
    }

    pub async fn record(&self, id: i64) -> Option<MemoryRecord> {
        let tables = self.tables.read().await;
        tables.records.iter().find(|r| r.id == id).cloned()
    }

    /// Last snapshot saved for `session_id`.
    pub async fn session(&self, session_id: &str) -> Option<Session> {
        self.tables.read().await.sessions.get(session_id).cloned()
    }

    /// Number of session snapshots written so far.
    pub async fn snapshot_count(&self) -> usize {
        self.tables.read().await.snapshots
    }

    pub async fn connection(&self, provider: &str) -> Option<Connection> {
        self.tables.read().await.connections.get(provider).cloned()
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::QueryFailed("reads disabled".into()));
        }
        Ok(())
    }

    async fn select<F>(&self, filter: F) -> Result<Vec<MemoryRecord>, StoreError>
    where
        F: Fn(&MemoryRecord) -> bool,
    {
        self.check_reads()?;
        let tables = self.tables.read().await;
        let mut found: Vec<MemoryRecord> = tables
            .records
            .iter()
            .filter(|r| r.is_active() && filter(r))
            .cloned()
            .collect();
        // newest first; later inserts win ties
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(found)
    }
}

fn named_in(value: &Option<String>, names: &[String]) -> bool {
    value
        .as_deref()
        .is_some_and(|v| names.iter().any(|n| n.eq_ignore_ascii_case(v)))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn active_records(&self, kind: RecordKind) -> Result<Vec<MemoryRecord>, StoreError> {
        self.select(|r| r.kind == kind).await
    }

    async fn records_since(
        &self,
        kinds: &[RecordKind],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let mut found = self
            .select(|r| kinds.contains(&r.kind) && r.created_at >= since)
            .await?;
        found.truncate(limit);
        Ok(found)
    }

    async fn statuses_for(&self, projects: &[String]) -> Result<Vec<MemoryRecord>, StoreError> {
        self.select(|r| r.kind == RecordKind::Status && named_in(&r.project, projects))
            .await
    }

    async fn facts_about(&self, people: &[String]) -> Result<Vec<MemoryRecord>, StoreError> {
        self.select(|r| r.kind == RecordKind::PersonFact && named_in(&r.person, people))
            .await
    }

    async fn tracked_projects(&self) -> Result<Vec<String>, StoreError> {
        let statuses = self.active_records(RecordKind::Status).await?;
        let mut projects: Vec<String> = statuses.into_iter().filter_map(|r| r.project).collect();
        projects.sort();
        projects.dedup();
        Ok(projects)
    }

    async fn project_activity(&self) -> Result<Vec<ProjectActivity>, StoreError> {
        let tracked = self.tracked_projects().await?;
        let records = self.select(|r| named_in(&r.project, &tracked)).await?;

        let mut latest: BTreeMap<String, DateTime<Utc>> = BTreeMap::new();
        for record in records {
            let Some(project) = record.project else { continue };
            latest
                .entry(project)
                .and_modify(|at| *at = (*at).max(record.created_at))
                .or_insert(record.created_at);
        }

        Ok(latest
            .into_iter()
            .map(|(project, last_activity)| ProjectActivity {
                project,
                last_activity,
            })
            .collect())
    }

    async fn tasks_for(&self, date: NaiveDate) -> Result<Vec<TaskRow>, StoreError> {
        self.check_reads()?;
        let tables = self.tables.read().await;
        let mut tasks: Vec<TaskRow> = tables
            .tasks
            .iter()
            .filter(|t| t.plan_date == date)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn supersede(&self, old: i64, keep: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let record = tables
            .records
            .iter_mut()
            .find(|r| r.id == old)
            .ok_or_else(|| StoreError::NotFound(format!("record {old}")))?;
        record.superseded_by = Some(keep);
        debug!(old, keep, "Record superseded");
        Ok(())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.sessions.insert(session.id.clone(), session.clone());
        tables.snapshots += 1;
        Ok(())
    }

    async fn save_connection(&self, connection: &Connection) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .connections
            .insert(connection.provider.clone(), connection.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use huddle_core::session::SessionType;

    fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }

    #[tokio::test]
    async fn ids_are_assigned_and_reads_are_newest_first() {
        let store = InMemoryStore::new();
        let a = store
            .add_record(MemoryRecord::new(0, RecordKind::Blocker, "old").created(days_ago(3)))
            .await;
        let b = store
            .add_record(MemoryRecord::new(0, RecordKind::Blocker, "new").created(days_ago(1)))
            .await;
        store
            .add_record(MemoryRecord::new(0, RecordKind::Idea, "other"))
            .await;

        assert_eq!((a, b), (1, 2));
        let blockers = store.blockers().await.unwrap();
        assert_eq!(
            blockers.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(),
            vec!["new", "old"]
        );
    }

    #[tokio::test]
    async fn superseded_records_are_hidden() {
        let store = InMemoryStore::new();
        let old = store
            .add_record(MemoryRecord::new(0, RecordKind::Status, "v1").with_project("atlas"))
            .await;
        let new = store
            .add_record(MemoryRecord::new(0, RecordKind::Status, "v2").with_project("atlas"))
            .await;

        store.supersede(old, new).await.unwrap();
        let statuses = store.statuses_for(&["Atlas".to_string()]).await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].content, "v2");
        assert_eq!(store.record(old).await.unwrap().superseded_by, Some(new));
        assert!(store.supersede(99, new).await.is_err());
    }

    #[tokio::test]
    async fn records_since_filters_and_limits() {
        let store = InMemoryStore::new();
        for i in 0..5 {
            store
                .add_record(
                    MemoryRecord::new(0, RecordKind::Decision, format!("d{i}"))
                        .created(days_ago(i)),
                )
                .await;
        }
        store
            .add_record(MemoryRecord::new(0, RecordKind::Decision, "ancient").created(days_ago(30)))
            .await;

        let recent = store.recent_decisions(days_ago(7), 3).await.unwrap();
        assert_eq!(
            recent.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(),
            vec!["d0", "d1", "d2"]
        );
    }

    #[tokio::test]
    async fn project_activity_tracks_latest_record() {
        let store = InMemoryStore::new();
        store
            .add_record(
                MemoryRecord::new(0, RecordKind::Status, "ok")
                    .with_project("atlas")
                    .created(days_ago(10)),
            )
            .await;
        store
            .add_record(
                MemoryRecord::new(0, RecordKind::Blocker, "stuck")
                    .with_project("atlas")
                    .created(days_ago(2)),
            )
            .await;

        assert_eq!(store.tracked_projects().await.unwrap(), vec!["atlas"]);
        let activity = store.project_activity().await.unwrap();
        assert_eq!(activity.len(), 1);
        assert!(activity[0].last_activity > days_ago(3));
    }

    #[tokio::test]
    async fn tasks_come_back_in_position_order() {
        let store = InMemoryStore::new();
        let today = Utc::now().date_naive();
        for (id, position) in [(1, 2), (2, 0), (3, 1)] {
            store
                .add_task(TaskRow {
                    id,
                    text: format!("task {id}"),
                    plan_date: today,
                    checked: false,
                    position,
                })
                .await;
        }
        let ids: Vec<i64> = store
            .tasks_for(today)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn writes_are_recorded() {
        let store = InMemoryStore::new();
        let session = Session::new("session-1", SessionType::CheckIn);
        store.save_session(&session).await.unwrap();
        store.save_session(&session).await.unwrap();
        store
            .save_connection(&Connection::api_key("groq", "gsk"))
            .await
            .unwrap();

        assert_eq!(store.snapshot_count().await, 2);
        assert!(store.session("session-1").await.is_some());
        assert_eq!(store.connection("groq").await.unwrap().access_token, "gsk");
    }

    #[tokio::test]
    async fn failing_reads_surface_errors() {
        let store = InMemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.blockers().await.is_err());
        store.set_fail_reads(false);
        assert!(store.blockers().await.unwrap().is_empty());
    }
}
