//! Opening agendas per meeting type, generated from the store.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use huddle_core::agenda::{AgendaItem, ItemType, Priority};
use huddle_core::error::StoreError;
use huddle_core::session::SessionType;
use huddle_core::store::{MemoryRecord, RecordKind, Store};
use serde_json::json;
use tracing::debug;

use super::scheduler::AgendaScheduler;

/// No recipe produces more than this many items.
pub const MAX_ITEMS: usize = 12;

pub const DISCOVERY_WINDOW_DAYS: i64 = 2;
pub const DISCOVERY_LIMIT: usize = 3;
pub const STALE_AFTER_DAYS: i64 = 5;
pub const STALE_LIMIT: usize = 3;
pub const CHECK_IN_LIMIT: usize = 3;

/// Open tasks named in the evening carry-over item.
const OPEN_TASKS_SHOWN: usize = 3;

/// Generate the opening agenda for `session_type`.
///
/// `seed` is the user's first message, used by check-ins to pick projects.
pub async fn agenda_for(
    session_type: SessionType,
    store: &dyn Store,
    scheduler: &AgendaScheduler,
    seed: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<AgendaItem>, StoreError> {
    let mut agenda = match session_type {
        SessionType::MorningMeeting => morning(store, scheduler, now).await?,
        SessionType::CheckIn => check_in(store, scheduler, seed.unwrap_or_default()).await?,
        SessionType::EveningReview => evening(store, scheduler, now.date_naive()).await?,
        SessionType::WeeklyReview => weekly(store, scheduler).await?,
        SessionType::Onboarding => onboarding(scheduler),
        SessionType::Strategic => Vec::new(),
    };
    agenda.truncate(MAX_ITEMS);
    debug!(session_type = %session_type, items = agenda.len(), "Agenda generated");
    Ok(agenda)
}

fn memory_ref(record: &MemoryRecord) -> Option<serde_json::Value> {
    Some(json!({ "memory_id": record.id }))
}

/// Oldest first, the order open items were raised in.
async fn oldest_first(store: &dyn Store, kind: RecordKind) -> Result<Vec<MemoryRecord>, StoreError> {
    let mut records = store.active_records(kind).await?;
    records.reverse();
    Ok(records)
}

pub async fn morning(
    store: &dyn Store,
    scheduler: &AgendaScheduler,
    now: DateTime<Utc>,
) -> Result<Vec<AgendaItem>, StoreError> {
    let mut agenda = Vec::new();
    // projects already raised by a follow-up item
    let mut covered: Vec<String> = Vec::new();

    for b in oldest_first(store, RecordKind::Blocker).await? {
        let question = match &b.project {
            Some(p) => format!("This blocker on {p} is still open. What's the status?"),
            None => "This blocker is still open. What's the status?".to_string(),
        };
        agenda.push(scheduler.create(
            ItemType::FollowUp,
            Priority::Critical,
            b.content.clone(),
            Some(question),
            memory_ref(&b),
        ));
        covered.extend(b.project);
    }

    for c in oldest_first(store, RecordKind::Commitment).await? {
        let question = match &c.person {
            Some(p) => format!("Committed to {p}: {}. Status?", c.content),
            None => format!("{}. Status?", c.content),
        };
        agenda.push(scheduler.create(
            ItemType::FollowUp,
            Priority::High,
            c.content.clone(),
            Some(question),
            memory_ref(&c),
        ));
        covered.extend(c.project);
    }

    for w in oldest_first(store, RecordKind::WaitingFor).await? {
        let question = format!(
            "Waiting on {}: {}. Any update?",
            w.person.as_deref().unwrap_or("someone"),
            w.content
        );
        agenda.push(scheduler.create(
            ItemType::FollowUp,
            Priority::High,
            w.content.clone(),
            Some(question),
            memory_ref(&w),
        ));
        covered.extend(w.project);
    }

    let tracked = store.tracked_projects().await?;
    if !tracked.is_empty() {
        agenda.push(scheduler.create(
            ItemType::Inform,
            Priority::Normal,
            format!("Active projects: {}", tracked.join(", ")),
            None,
            None,
        ));
    }

    let discoveries = store
        .records_since(
            &[RecordKind::Discovery],
            now - Duration::days(DISCOVERY_WINDOW_DAYS),
            DISCOVERY_LIMIT,
        )
        .await?;
    for d in discoveries {
        agenda.push(scheduler.create(
            ItemType::Research,
            Priority::Normal,
            d.content.clone(),
            Some("Worth pursuing, or skip?".into()),
            memory_ref(&d),
        ));
    }

    let stale_before = now - Duration::days(STALE_AFTER_DAYS);
    let mut stale: Vec<_> = store
        .project_activity()
        .await?
        .into_iter()
        .filter(|a| a.last_activity < stale_before)
        .collect();
    stale.sort_by_key(|a| a.last_activity);

    for activity in stale.into_iter().take(STALE_LIMIT) {
        let project = activity.project;
        let raised = covered.iter().any(|c| c.eq_ignore_ascii_case(&project))
            || agenda
                .iter()
                .any(|a| a.item_type == ItemType::FollowUp && a.content.contains(&project));
        if raised {
            continue;
        }
        agenda.push(scheduler.create(
            ItemType::Decide,
            Priority::Low,
            format!("{project} has been quiet. Still active?"),
            Some(format!(
                "No activity on {project} in {STALE_AFTER_DAYS}+ days. Still a priority, or shelve it?"
            )),
            None,
        ));
    }

    Ok(agenda)
}

/// Up to three context items for tracked projects the user mentioned.
pub async fn check_in(
    store: &dyn Store,
    scheduler: &AgendaScheduler,
    message: &str,
) -> Result<Vec<AgendaItem>, StoreError> {
    let lowered = message.to_lowercase();
    if lowered.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mentioned: Vec<String> = store
        .tracked_projects()
        .await?
        .into_iter()
        .filter(|p| lowered.contains(&p.to_lowercase()))
        .take(CHECK_IN_LIMIT)
        .collect();

    let mut agenda = Vec::new();
    for project in mentioned {
        let statuses = store.statuses_for(std::slice::from_ref(&project)).await?;
        let Some(latest) = statuses.first() else {
            continue;
        };
        agenda.push(scheduler.create(
            ItemType::Inform,
            Priority::Normal,
            format!("Latest on {project}: {}", latest.content),
            None,
            memory_ref(latest),
        ));
    }
    Ok(agenda)
}

pub async fn evening(
    store: &dyn Store,
    scheduler: &AgendaScheduler,
    today: NaiveDate,
) -> Result<Vec<AgendaItem>, StoreError> {
    let tasks = store.tasks_for(today).await?;
    let (done, open): (Vec<_>, Vec<_>) = tasks.iter().partition(|t| t.checked);
    let mut agenda = Vec::new();

    if !done.is_empty() {
        let question = if open.is_empty() {
            "Clean sweep! How did today feel?"
        } else {
            "Good progress. How did the day go?"
        };
        agenda.push(scheduler.create(
            ItemType::Reflect,
            Priority::Normal,
            format!("Completed {} of {} tasks today", done.len(), tasks.len()),
            Some(question.into()),
            None,
        ));
    }

    if !open.is_empty() {
        let names: Vec<&str> = open
            .iter()
            .take(OPEN_TASKS_SHOWN)
            .map(|t| t.text.as_str())
            .collect();
        agenda.push(scheduler.create(
            ItemType::FollowUp,
            Priority::Normal,
            format!("{} tasks still open: {}", open.len(), names.join(", ")),
            Some("Any of these to reschedule for tomorrow?".into()),
            None,
        ));
    }

    agenda.push(scheduler.create(
        ItemType::Reflect,
        Priority::Low,
        "Day wrap-up",
        Some("Anything happen today I should know about?".into()),
        None,
    ));
    Ok(agenda)
}

/// The fixed interview for a new user.
///
/// Each item carries a stable heartbeat key so an external gap detector can
/// tell which profile gaps the interview already covers.
pub fn onboarding(scheduler: &AgendaScheduler) -> Vec<AgendaItem> {
    const SCRIPT: [(ItemType, Priority, &str, &str, &str); 6] = [
        (
            ItemType::Inform,
            Priority::Critical,
            "Your name",
            "What do you wish me to call you?",
            "profile_user_name",
        ),
        (
            ItemType::Decide,
            Priority::Critical,
            "Name your assistant",
            "What should you call me?",
            "profile_ai_name",
        ),
        (
            ItemType::Decide,
            Priority::High,
            "Major projects",
            "What are some of your major projects right now?",
            "no_projects",
        ),
        (
            ItemType::FollowUp,
            Priority::Normal,
            "Immediate tasks and meetings",
            "Do you have any immediate tasks or meetings coming up?",
            "no_tasks_today",
        ),
        (
            ItemType::Plan,
            Priority::Normal,
            "Work style and preferences",
            "When do you like to plan your day? Morning, evening, or as-needed?",
            "profile_work_style",
        ),
        (
            ItemType::Reflect,
            Priority::Low,
            "Daily habits",
            "Are there any daily habits you are trying to build?",
            "no_routines",
        ),
    ];

    SCRIPT
        .iter()
        .map(|(item_type, priority, content, question, key)| {
            let mut item =
                scheduler.create(*item_type, *priority, *content, Some((*question).into()), None);
            item.heartbeat_id = Some((*key).into());
            item
        })
        .collect()
}

pub async fn weekly(
    store: &dyn Store,
    scheduler: &AgendaScheduler,
) -> Result<Vec<AgendaItem>, StoreError> {
    let mut agenda = vec![scheduler.create(
        ItemType::Reflect,
        Priority::Critical,
        "Weekly mind dump",
        Some(
            "Before we review the week, dump everything floating in your head: projects, \
             ideas, worries, commitments. I'll capture it all."
                .into(),
        ),
        None,
    )];

    for project in store.tracked_projects().await? {
        agenda.push(scheduler.create(
            ItemType::Decide,
            Priority::Normal,
            format!("Review: {project}"),
            Some(format!("Is {project} still active? What's the next action?")),
            None,
        ));
    }
    Ok(agenda)
}
