//! Record consolidation.
//!
//! Status and pattern records describe the current state of a project, so
//! only the newest one per project is worth loading. Older duplicates are
//! superseded by it.

use huddle_core::error::StoreError;
use huddle_core::store::{MemoryRecord, RecordKind, Store};
use std::collections::BTreeMap;
use tracing::info;

/// Kinds where only the newest record per project stays active.
pub const CONSOLIDATED_KINDS: [RecordKind; 2] = [RecordKind::Status, RecordKind::Pattern];

/// Supersede older same-kind, same-project records. Returns how many were superseded.
///
/// Relies on the store returning active records newest first.
pub async fn consolidate(store: &dyn Store) -> Result<usize, StoreError> {
    let mut superseded = 0;

    for kind in CONSOLIDATED_KINDS {
        let records = store.active_records(kind).await?;

        let mut groups: BTreeMap<Option<String>, Vec<MemoryRecord>> = BTreeMap::new();
        for record in records {
            groups.entry(record.project.clone()).or_default().push(record);
        }

        for (_, group) in groups.into_iter().filter(|(_, g)| g.len() > 1) {
            let keep = group[0].id;
            for old in &group[1..] {
                store.supersede(old.id, keep).await?;
                superseded += 1;
            }
        }
    }

    if superseded > 0 {
        info!(superseded, "Consolidated records");
    }
    Ok(superseded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use huddle_memory::InMemoryStore;

    #[tokio::test]
    async fn keeps_newest_per_kind_and_project() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        let old = store
            .add_record(
                MemoryRecord::new(0, RecordKind::Status, "alpha")
                    .with_project("atlas")
                    .created(now - Duration::days(2)),
            )
            .await;
        let new = store
            .add_record(
                MemoryRecord::new(0, RecordKind::Status, "beta")
                    .with_project("atlas")
                    .created(now),
            )
            .await;
        let other = store
            .add_record(MemoryRecord::new(0, RecordKind::Status, "solo").with_project("orbit"))
            .await;
        let blocker = store
            .add_record(MemoryRecord::new(0, RecordKind::Blocker, "dup").with_project("atlas"))
            .await;
        store
            .add_record(MemoryRecord::new(0, RecordKind::Blocker, "dup").with_project("atlas"))
            .await;

        assert_eq!(consolidate(&store).await.unwrap(), 1);
        assert_eq!(store.record(old).await.unwrap().superseded_by, Some(new));
        assert!(store.record(new).await.unwrap().is_active());
        assert!(store.record(other).await.unwrap().is_active());
        assert!(store.record(blocker).await.unwrap().is_active());

        // idempotent
        assert_eq!(consolidate(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn records_without_project_form_one_group() {
        let store = InMemoryStore::new();
        let now = Utc::now();
        store
            .add_record(
                MemoryRecord::new(0, RecordKind::Pattern, "late starts")
                    .created(now - Duration::hours(1)),
            )
            .await;
        store
            .add_record(MemoryRecord::new(0, RecordKind::Pattern, "skips lunch").created(now))
            .await;

        assert_eq!(consolidate(&store).await.unwrap(), 1);
        let active = store.active_records(RecordKind::Pattern).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "skips lunch");
    }
}
