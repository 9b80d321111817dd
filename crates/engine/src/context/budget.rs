//! Tiered context assembly under a token budget.
//!
//! Four tiers are loaded in fixed order and appended greedily while the
//! running estimate stays under a tier-specific share of the budget:
//!
//! | Tier | Content | Loaded while total < |
//! |------|---------|----------------------|
//! | 1 | open blockers, commitments, waiting-for | always |
//! | 2 | focus project statuses, focus people, decisions (7 days) | 100% |
//! | 3 | patterns, dependencies, insights (14 days, max 20) | 80% |
//! | 4 | other project statuses (max 10), untriaged ideas (max 5) | 60% |
//!
//! Ordering is by urgency only. A long Tier 2 never makes room for a
//! shorter Tier 3.

use chrono::{DateTime, Duration, Utc};
use huddle_config::ContextConfig;
use huddle_core::error::StoreError;
use huddle_core::store::{MemoryRecord, RecordKind, Store};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::token::estimate_tokens;

pub const DECISION_WINDOW_DAYS: i64 = 7;
pub const RELATED_WINDOW_DAYS: i64 = 14;
pub const RELATED_LIMIT: usize = 20;
pub const OTHER_STATUS_LIMIT: usize = 10;
pub const IDEA_LIMIT: usize = 5;

/// Share of the budget under which each tier may still load.
const TIER_THRESHOLDS: [(u8, f64); 3] = [(2, 1.0), (3, 0.8), (4, 0.6)];

/// One loaded tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBlock {
    pub tier: u8,
    pub text: String,
    pub token_estimate: usize,
}

/// Assembled context for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    /// Non-empty tiers joined by blank lines
    pub text: String,
    pub token_estimate: usize,
    /// Every tier that was loaded, empty ones included
    pub blocks: Vec<ContextBlock>,
}

impl BuiltContext {
    pub fn has_tier(&self, tier: u8) -> bool {
        self.blocks.iter().any(|b| b.tier == tier && !b.text.is_empty())
    }
}

/// Builds tiered context from a [`Store`].
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub max_tokens: usize,
    pub focus_projects: Vec<String>,
    pub focus_people: Vec<String>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl ContextBuilder {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            focus_projects: Vec::new(),
            focus_people: Vec::new(),
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            focus_projects: config.focus_projects.clone(),
            focus_people: config.focus_people.clone(),
        }
    }

    pub fn with_focus_projects(mut self, projects: Vec<String>) -> Self {
        self.focus_projects = projects;
        self
    }

    pub fn with_focus_people(mut self, people: Vec<String>) -> Self {
        self.focus_people = people;
        self
    }

    /// Build context as of now.
    pub async fn build(&self, store: &dyn Store) -> BuiltContext {
        self.build_at(store, Utc::now()).await
    }

    /// Build context with `now` as the reference time for recency windows.
    ///
    /// A failing tier read is logged and contributes nothing; the remaining
    /// tiers still load.
    pub async fn build_at(&self, store: &dyn Store, now: DateTime<Utc>) -> BuiltContext {
        let mut built = BuiltContext::default();

        let first = self.load_tier(1, store, now).await;
        self.push(&mut built, 1, first);

        for (tier, share) in TIER_THRESHOLDS {
            if (built.token_estimate as f64) >= self.max_tokens as f64 * share {
                debug!(tier, total = built.token_estimate, budget = self.max_tokens, "Tier shed");
                continue;
            }
            let text = self.load_tier(tier, store, now).await;
            self.push(&mut built, tier, text);
        }

        built.text = built
            .blocks
            .iter()
            .filter(|b| !b.text.is_empty())
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        built
    }

    fn push(&self, built: &mut BuiltContext, tier: u8, text: String) {
        let token_estimate = estimate_tokens(&text);
        built.token_estimate += token_estimate;
        built.blocks.push(ContextBlock {
            tier,
            text,
            token_estimate,
        });
    }

    async fn load_tier(&self, tier: u8, store: &dyn Store, now: DateTime<Utc>) -> String {
        let result = match tier {
            1 => tier_one(store).await,
            2 => self.tier_two(store, now).await,
            3 => tier_three(store, now).await,
            _ => self.tier_four(store).await,
        };
        result.unwrap_or_else(|e| {
            warn!(tier, error = %e, "Context tier unavailable");
            String::new()
        })
    }

    async fn tier_two(&self, store: &dyn Store, now: DateTime<Utc>) -> Result<String, StoreError> {
        let mut sections = Vec::new();

        if !self.focus_projects.is_empty() {
            let statuses = store.statuses_for(&self.focus_projects).await?;
            sections.push(section("FOCUS PROJECTS:", &statuses, tagged_by_project));
        }

        if !self.focus_people.is_empty() {
            let facts = store.facts_about(&self.focus_people).await?;
            sections.push(section("KEY PEOPLE:", &facts, |r| {
                format!("  [{}] {}", r.person.as_deref().unwrap_or_default(), r.content)
            }));
        }

        let since = now - Duration::days(DECISION_WINDOW_DAYS);
        let decisions = store.recent_decisions(since, usize::MAX).await?;
        sections.push(section("RECENT DECISIONS:", &decisions, |r| {
            format!("  {}", r.content)
        }));

        Ok(join_sections(sections))
    }

    async fn tier_four(&self, store: &dyn Store) -> Result<String, StoreError> {
        let statuses: Vec<MemoryRecord> = store
            .active_records(RecordKind::Status)
            .await?
            .into_iter()
            .filter(|r| {
                !r.project.as_deref().is_some_and(|p| {
                    self.focus_projects.iter().any(|f| f.eq_ignore_ascii_case(p))
                })
            })
            .take(OTHER_STATUS_LIMIT)
            .collect();

        let mut ideas = store.active_records(RecordKind::Idea).await?;
        ideas.truncate(IDEA_LIMIT);

        Ok(join_sections(vec![
            section("OTHER PROJECTS:", &statuses, tagged_by_project),
            section("IDEAS (untriaged):", &ideas, bullet),
        ]))
    }
}

async fn tier_one(store: &dyn Store) -> Result<String, StoreError> {
    let blockers = store.blockers().await?;
    let commitments = store.commitments().await?;
    let waiting = store.waiting_for().await?;

    Ok(join_sections(vec![
        section("BLOCKERS:", &blockers, bullet),
        section("COMMITMENTS:", &commitments, bullet),
        section("WAITING FOR:", &waiting, bullet),
    ]))
}

async fn tier_three(store: &dyn Store, now: DateTime<Utc>) -> Result<String, StoreError> {
    let since = now - Duration::days(RELATED_WINDOW_DAYS);
    let related = store
        .records_since(
            &[RecordKind::Pattern, RecordKind::Dependency, RecordKind::Insight],
            since,
            RELATED_LIMIT,
        )
        .await?;

    Ok(section("RELATED CONTEXT:", &related, |r| {
        format!("  [{}] {}", r.kind, r.content)
    }))
}

fn bullet(r: &MemoryRecord) -> String {
    format!("  - {}", r.content)
}

fn tagged_by_project(r: &MemoryRecord) -> String {
    format!("  [{}] {}", r.project.as_deref().unwrap_or_default(), r.content)
}

/// `HEADER\n<line>\n<line>`, or empty when there are no records.
fn section(header: &str, records: &[MemoryRecord], line: impl Fn(&MemoryRecord) -> String) -> String {
    if records.is_empty() {
        return String::new();
    }
    let body = records.iter().map(line).collect::<Vec<_>>().join("\n");
    format!("{header}\n{body}")
}

fn join_sections(sections: Vec<String>) -> String {
    sections
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
