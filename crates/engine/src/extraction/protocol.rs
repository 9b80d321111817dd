//! The `<meeting_state>` protocol block.
//!
//! Tag and attribute names live here once. The parser matches on them and
//! [`format_instructions`] renders the model-facing description from them,
//! so the two cannot drift apart.

pub const BLOCK: &str = "meeting_state";
pub const EXTRACTIONS: &str = "extractions";
pub const AGENDA_UPDATES: &str = "agenda_updates";

pub const TASK: &str = "task";
pub const DECISION: &str = "decision";
pub const COMMITMENT: &str = "commitment";
pub const WAITING_FOR: &str = "waiting_for";
pub const PROFILE: &str = "profile";

pub const RESOLVE: &str = "resolve";
pub const DEFER: &str = "defer";
pub const ADD: &str = "add";
pub const NEXT_ITEM: &str = "next_item";

pub const ATTR_DEADLINE: &str = "deadline";
pub const ATTR_PROJECT: &str = "project";
pub const ATTR_TO: &str = "to";
pub const ATTR_FROM: &str = "from";
pub const ATTR_DUE: &str = "due";
pub const ATTR_FIELD: &str = "field";
pub const ATTR_ID: &str = "id";
pub const ATTR_RESOLUTION: &str = "resolution";
pub const ATTR_TYPE: &str = "type";
pub const ATTR_PRIORITY: &str = "priority";
pub const ATTR_CONTENT: &str = "content";

/// Profile fields the onboarding interview asks the model to emit.
pub const PROFILE_FIELDS: [&str; 7] = [
    "user_name",
    "ai_name",
    "preferred_name",
    "timezone",
    "role",
    "planning_time",
    "work_style",
];

pub fn open_tag(name: &str) -> String {
    format!("<{name}>")
}

pub fn close_tag(name: &str) -> String {
    format!("</{name}>")
}

fn element(name: &str, attrs: &[&str], body: &str) -> String {
    let attrs: String = attrs.iter().map(|a| format!(" {a}=\"\"")).collect();
    format!("    <{name}{attrs}>{body}</{name}>")
}

fn empty_element(name: &str, attrs: &[&str]) -> String {
    let attrs: String = attrs.iter().map(|a| format!(" {a}=\"\"")).collect();
    format!("    <{name}{attrs}/>")
}

/// The extraction-format section sent to the model.
///
/// `with_profiles` adds `<profile>` lines for the onboarding interview.
pub fn format_instructions(with_profiles: bool) -> String {
    let mut lines = vec![
        "## Extraction Format".to_string(),
        format!(
            "After your conversational response, append a {} block (the system strips this before display):",
            open_tag(BLOCK)
        ),
        open_tag(BLOCK),
        format!("  {}", open_tag(EXTRACTIONS)),
    ];

    if with_profiles {
        for field in PROFILE_FIELDS {
            lines.push(format!("    <{PROFILE} {ATTR_FIELD}=\"{field}\">value</{PROFILE}>"));
        }
    }

    lines.extend([
        element(TASK, &[ATTR_DEADLINE, ATTR_PROJECT], "description"),
        element(DECISION, &[ATTR_PROJECT], "what was decided"),
        element(COMMITMENT, &[ATTR_TO, ATTR_DEADLINE], "what was promised"),
        element(WAITING_FOR, &[ATTR_FROM, ATTR_DUE], "what you're waiting for"),
        format!("  {}", close_tag(EXTRACTIONS)),
        format!("  {}", open_tag(AGENDA_UPDATES)),
        empty_element(RESOLVE, &[ATTR_ID, ATTR_RESOLUTION]),
        empty_element(DEFER, &[ATTR_ID]),
        empty_element(ADD, &[ATTR_TYPE, ATTR_PRIORITY, ATTR_CONTENT]),
        format!("  {}", close_tag(AGENDA_UPDATES)),
        format!("  {}item-id-or-empty{}", open_tag(NEXT_ITEM), close_tag(NEXT_ITEM)),
        close_tag(BLOCK),
        String::new(),
        "Deadlines must be calendar dates written as YYYY-MM-DD.".to_string(),
        "Use agenda item ids exactly as listed. Only include tags for things actually said."
            .to_string(),
    ]);

    if with_profiles {
        lines.push(format!(
            "Only emit <{PROFILE}> tags when you actually learn new information."
        ));
    }

    lines.join("\n")
}
