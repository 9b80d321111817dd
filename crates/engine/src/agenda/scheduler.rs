//! Agenda bookkeeping: creation, status changes, selection and summaries.

use huddle_core::agenda::{AgendaItem, ItemStatus, ItemType, Priority};
use huddle_core::extraction::AgendaUpdates;
use huddle_core::ids::IdGenerator;
use huddle_core::message::Role;
use huddle_core::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Messages included in the turn summary.
pub const RECENT_MESSAGES: usize = 6;

/// Longest message excerpt in the turn summary, in characters.
pub const EXCERPT_CHARS: usize = 200;

/// Resolved topics listed in a session summary.
const SUMMARY_TOPICS: usize = 3;

/// A deferred item handed to the next meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarriedItem {
    pub content: String,
    pub priority: Priority,
    /// Defers across meetings, this one included
    pub defer_count: u32,
    /// Deferred often enough to be worth raising as a pattern
    pub is_pattern: bool,
}

/// Owns agenda item creation and the rules for moving items along.
#[derive(Debug, Clone)]
pub struct AgendaScheduler {
    ids: Arc<IdGenerator>,
}

impl Default for AgendaScheduler {
    fn default() -> Self {
        Self::new(Arc::new(IdGenerator::items()))
    }
}

impl AgendaScheduler {
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        Self { ids }
    }

    /// A new pending item with a fresh id.
    pub fn create(
        &self,
        item_type: ItemType,
        priority: Priority,
        content: impl Into<String>,
        question: Option<String>,
        context: Option<serde_json::Value>,
    ) -> AgendaItem {
        AgendaItem {
            id: self.ids.next(),
            item_type,
            priority,
            content: content.into(),
            question,
            status: ItemStatus::Pending,
            resolution: None,
            context,
            heartbeat_id: None,
        }
    }

    /// Mark `id` resolved. Returns false when no item has that id.
    pub fn resolve(agenda: &mut [AgendaItem], id: &str, resolution: Option<String>) -> bool {
        let Some(item) = agenda.iter_mut().find(|a| a.id == id) else {
            return false;
        };
        item.status = ItemStatus::Resolved;
        item.resolution = resolution;
        true
    }

    /// Mark `id` deferred and escalate its priority one step.
    pub fn defer(agenda: &mut [AgendaItem], id: &str) -> bool {
        let Some(item) = agenda.iter_mut().find(|a| a.id == id) else {
            return false;
        };
        item.status = ItemStatus::Deferred;
        item.priority = item.priority.escalate();
        true
    }

    /// Apply model directives: resolves, then defers, then adds.
    ///
    /// Returns the number of items added.
    pub fn apply_updates(&self, agenda: &mut Vec<AgendaItem>, updates: &AgendaUpdates) -> usize {
        if updates.is_empty() {
            return 0;
        }

        for r in &updates.resolves {
            if !Self::resolve(agenda, &r.id, r.resolution.clone()) {
                debug!(id = %r.id, "Resolve for unknown agenda item ignored");
            }
        }
        for d in &updates.defers {
            if !Self::defer(agenda, &d.id) {
                debug!(id = %d.id, "Defer for unknown agenda item ignored");
            }
        }
        for a in &updates.adds {
            agenda.push(self.create(
                a.item_type.unwrap_or(ItemType::FollowUp),
                a.priority.unwrap_or(Priority::Normal),
                a.content.clone(),
                None,
                None,
            ));
        }

        updates.adds.len()
    }

    /// Highest-priority pending item; ties go to the earliest in the agenda.
    pub fn next_item(agenda: &[AgendaItem]) -> Option<&AgendaItem> {
        let mut pending: Vec<&AgendaItem> = agenda
            .iter()
            .filter(|a| a.status == ItemStatus::Pending)
            .collect();
        pending.sort_by_key(|a| a.priority.rank());
        pending.into_iter().next()
    }

    /// The volatile per-turn block: agenda state plus recent conversation.
    pub fn turn_summary(session: &Session) -> String {
        let mut parts: Vec<String> = Vec::new();
        let agenda = &session.agenda;

        if !agenda.is_empty() {
            parts.push("## Current Agenda".into());

            let active: Vec<String> = agenda
                .iter()
                .filter(|a| a.status == ItemStatus::Active)
                .map(|a| {
                    let mut line = item_line(a);
                    if let Some(q) = &a.question {
                        line.push_str(&format!("\n    Question: {q}"));
                    }
                    line
                })
                .collect();
            if !active.is_empty() {
                parts.push(format!("ACTIVE:\n{}", active.join("\n")));
            }

            let pending: Vec<String> = agenda
                .iter()
                .filter(|a| a.status == ItemStatus::Pending)
                .map(item_line)
                .collect();
            if !pending.is_empty() {
                parts.push(format!("PENDING:\n{}", pending.join("\n")));
            }

            let resolved = agenda
                .iter()
                .filter(|a| a.status == ItemStatus::Resolved)
                .count();
            if resolved > 0 {
                parts.push(format!("RESOLVED: {resolved} items"));
            }
        }

        if !session.messages.is_empty() {
            parts.push("## Recent Conversation".into());
            let skip = session.messages.len().saturating_sub(RECENT_MESSAGES);
            for msg in &session.messages[skip..] {
                let who = match msg.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                parts.push(format!("{who}: {}", excerpt(&msg.content)));
            }
        }

        parts.join("\n\n")
    }

    /// One-line recap written to the session when it closes.
    pub fn session_summary(session: &Session) -> String {
        let turns = session.user_turns();
        if turns == 0 {
            return "Session started".into();
        }

        let total = session.agenda.len();
        let resolved: Vec<&AgendaItem> = session
            .agenda
            .iter()
            .filter(|a| a.status == ItemStatus::Resolved)
            .collect();
        let pending = session
            .agenda
            .iter()
            .filter(|a| a.status == ItemStatus::Pending)
            .count();

        let mut summary = format!(
            "{turns} turns. agenda {}/{total} done. {pending} pending.",
            resolved.len()
        );

        let skip = resolved.len().saturating_sub(SUMMARY_TOPICS);
        let topics: Vec<&str> = resolved[skip..].iter().map(|a| a.content.as_str()).collect();
        if !topics.is_empty() {
            summary.push_str(&format!(" topics: {}", topics.join("; ")));
        }
        summary
    }

    /// Deferred items to raise again next time.
    ///
    /// `history` maps item content to defers recorded by earlier meetings.
    /// Items reaching `threshold` are flagged as a pattern.
    pub fn carry_over_deferred(
        agenda: &[AgendaItem],
        history: &HashMap<String, u32>,
        threshold: u32,
    ) -> Vec<CarriedItem> {
        agenda
            .iter()
            .filter(|a| a.status == ItemStatus::Deferred)
            .map(|a| {
                let defer_count = history.get(&a.content).copied().unwrap_or(0) + 1;
                CarriedItem {
                    content: a.content.clone(),
                    priority: a.priority,
                    defer_count,
                    is_pattern: defer_count >= threshold,
                }
            })
            .collect()
    }
}

fn item_line(item: &AgendaItem) -> String {
    format!(
        "  [{}] {} ({}): {}",
        item.id, item.item_type, item.priority, item.content
    )
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_core::extraction::{AddDirective, DeferDirective, ResolveDirective};
    use huddle_core::message::ChatMessage;
    use huddle_core::session::SessionType;

    fn scheduler() -> AgendaScheduler {
        AgendaScheduler::new(Arc::new(IdGenerator::items()))
    }

    fn item(s: &AgendaScheduler, priority: Priority, content: &str) -> AgendaItem {
        s.create(ItemType::FollowUp, priority, content, Some("?".into()), None)
    }

    #[test]
    fn ids_are_sequential_and_never_reused() {
        let s = scheduler();
        let a = item(&s, Priority::Low, "a");
        let b = item(&s, Priority::Low, "b");
        assert_eq!(a.id, "item-1");
        assert_eq!(b.id, "item-2");
        assert_eq!(a.status, ItemStatus::Pending);
    }

    #[test]
    fn shared_generator_spans_schedulers() {
        let ids = Arc::new(IdGenerator::items());
        let one = AgendaScheduler::new(ids.clone());
        let two = AgendaScheduler::new(ids);
        assert_ne!(item(&one, Priority::Low, "a").id, item(&two, Priority::Low, "b").id);
    }

    #[test]
    fn resolve_and_defer_ignore_unknown_ids() {
        let s = scheduler();
        let mut agenda = vec![item(&s, Priority::Normal, "a")];
        assert!(!AgendaScheduler::resolve(&mut agenda, "item-99", None));
        assert!(!AgendaScheduler::defer(&mut agenda, "item-99"));
        assert_eq!(agenda[0].status, ItemStatus::Pending);
        assert_eq!(agenda[0].priority, Priority::Normal);
    }

    #[test]
    fn defer_escalates_and_saturates() {
        let s = scheduler();
        let mut agenda = vec![item(&s, Priority::Critical, "a")];
        let id = agenda[0].id.clone();
        AgendaScheduler::defer(&mut agenda, &id);
        AgendaScheduler::defer(&mut agenda, &id);
        assert_eq!(agenda[0].priority, Priority::Critical);
        assert_eq!(agenda[0].status, ItemStatus::Deferred);

        let mut agenda = vec![item(&s, Priority::Low, "b")];
        let id = agenda[0].id.clone();
        AgendaScheduler::defer(&mut agenda, &id);
        assert_eq!(agenda[0].priority, Priority::Normal);
    }

    #[test]
    fn next_item_orders_by_priority_then_insertion() {
        let s = scheduler();
        let agenda = vec![
            item(&s, Priority::Low, "low"),
            item(&s, Priority::Critical, "critical"),
            item(&s, Priority::High, "high"),
        ];
        assert_eq!(AgendaScheduler::next_item(&agenda).unwrap().content, "critical");

        let ties = vec![
            item(&s, Priority::Normal, "first"),
            item(&s, Priority::Normal, "second"),
        ];
        assert_eq!(AgendaScheduler::next_item(&ties).unwrap().content, "first");
    }

    #[test]
    fn next_item_skips_closed_and_active_items() {
        let s = scheduler();
        let mut agenda = vec![
            item(&s, Priority::Critical, "resolved"),
            item(&s, Priority::Critical, "deferred"),
            item(&s, Priority::Critical, "dismissed"),
            item(&s, Priority::Critical, "active"),
            item(&s, Priority::Low, "pending"),
        ];
        agenda[0].status = ItemStatus::Resolved;
        agenda[1].status = ItemStatus::Deferred;
        agenda[2].status = ItemStatus::Dismissed;
        agenda[3].status = ItemStatus::Active;
        assert_eq!(AgendaScheduler::next_item(&agenda).unwrap().content, "pending");

        agenda[4].status = ItemStatus::Resolved;
        assert!(AgendaScheduler::next_item(&agenda).is_none());
    }

    #[test]
    fn updates_apply_in_order_with_defaults() {
        let s = scheduler();
        let mut agenda = vec![item(&s, Priority::Normal, "a"), item(&s, Priority::Low, "b")];
        let updates = AgendaUpdates {
            resolves: vec![ResolveDirective {
                id: "item-1".into(),
                resolution: Some("done".into()),
            }],
            defers: vec![
                DeferDirective { id: "item-2".into() },
                DeferDirective { id: "item-404".into() },
            ],
            adds: vec![AddDirective {
                item_type: None,
                priority: None,
                content: "new thing".into(),
            }],
        };

        assert_eq!(s.apply_updates(&mut agenda, &updates), 1);
        assert_eq!(agenda[0].status, ItemStatus::Resolved);
        assert_eq!(agenda[0].resolution.as_deref(), Some("done"));
        assert_eq!(agenda[1].status, ItemStatus::Deferred);
        assert_eq!(agenda[1].priority, Priority::Normal);

        let added = &agenda[2];
        assert_eq!(added.id, "item-3");
        assert_eq!(added.item_type, ItemType::FollowUp);
        assert_eq!(added.priority, Priority::Normal);
        assert_eq!(added.question, None);
    }

    #[test]
    fn resolve_then_defer_same_item_ends_deferred() {
        let s = scheduler();
        let mut agenda = vec![item(&s, Priority::High, "a")];
        let updates = AgendaUpdates {
            resolves: vec![ResolveDirective { id: "item-1".into(), resolution: None }],
            defers: vec![DeferDirective { id: "item-1".into() }],
            adds: vec![],
        };
        s.apply_updates(&mut agenda, &updates);
        assert_eq!(agenda[0].status, ItemStatus::Deferred);
        assert_eq!(agenda[0].priority, Priority::Critical);
    }

    #[test]
    fn empty_updates_are_a_no_op() {
        let s = scheduler();
        let mut agenda = vec![item(&s, Priority::High, "a")];
        let before = agenda.clone();
        assert_eq!(s.apply_updates(&mut agenda, &AgendaUpdates::default()), 0);
        assert_eq!(agenda, before);
    }

    #[test]
    fn turn_summary_lists_agenda_and_recent_messages() {
        let s = scheduler();
        let mut session = Session::new("session-1", SessionType::MorningMeeting);
        session.agenda = vec![
            item(&s, Priority::Critical, "API blocked"),
            item(&s, Priority::Normal, "Review roadmap"),
            item(&s, Priority::Low, "Old thing"),
        ];
        session.agenda[0].status = ItemStatus::Active;
        session.agenda[2].status = ItemStatus::Resolved;
        for i in 0..8 {
            session.messages.push(ChatMessage::user(format!("message {i}")));
        }
        session.messages.push(ChatMessage::assistant("x".repeat(250)));

        let summary = AgendaScheduler::turn_summary(&session);
        assert!(summary.starts_with("## Current Agenda"));
        assert!(summary.contains("ACTIVE:\n  [item-1] FOLLOW-UP (critical): API blocked\n    Question: ?"));
        assert!(summary.contains("PENDING:\n  [item-2] FOLLOW-UP (normal): Review roadmap"));
        assert!(summary.contains("RESOLVED: 1 items"));
        assert!(!summary.contains("message 2"));
        assert!(summary.contains("User: message 3"));
        assert!(summary.contains(&format!("Assistant: {}...", "x".repeat(200))));
    }

    #[test]
    fn turn_summary_is_empty_for_a_fresh_session() {
        let session = Session::new("session-1", SessionType::Strategic);
        assert_eq!(AgendaScheduler::turn_summary(&session), "");
    }

    #[test]
    fn session_summary_counts_and_lists_recent_topics() {
        let s = scheduler();
        let mut session = Session::new("session-1", SessionType::MorningMeeting);
        assert_eq!(AgendaScheduler::session_summary(&session), "Session started");

        session.agenda = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|c| item(&s, Priority::Normal, c))
            .collect();
        for i in 0..4 {
            session.agenda[i].status = ItemStatus::Resolved;
        }
        session.messages.push(ChatMessage::user("hi"));
        session.messages.push(ChatMessage::assistant("hello"));
        session.messages.push(ChatMessage::user("done"));

        assert_eq!(
            AgendaScheduler::session_summary(&session),
            "2 turns. agenda 4/5 done. 1 pending. topics: b; c; d"
        );
    }

    #[test]
    fn carry_over_flags_patterns_at_threshold() {
        let s = scheduler();
        let mut agenda = vec![
            item(&s, Priority::Normal, "taxes"),
            item(&s, Priority::Normal, "gym"),
            item(&s, Priority::Normal, "resolved"),
        ];
        AgendaScheduler::defer(&mut agenda, "item-1");
        AgendaScheduler::defer(&mut agenda, "item-2");
        agenda[2].status = ItemStatus::Resolved;

        let history = HashMap::from([("taxes".to_string(), 2)]);
        let carried = AgendaScheduler::carry_over_deferred(&agenda, &history, 3);

        assert_eq!(carried.len(), 2);
        assert_eq!(carried[0].content, "taxes");
        assert_eq!(carried[0].defer_count, 3);
        assert!(carried[0].is_pattern);
        assert_eq!(carried[0].priority, Priority::High);
        assert_eq!(carried[1].defer_count, 1);
        assert!(!carried[1].is_pattern);

        let strict = AgendaScheduler::carry_over_deferred(&agenda, &history, 1);
        assert!(strict.iter().all(|c| c.is_pattern));
    }
}
