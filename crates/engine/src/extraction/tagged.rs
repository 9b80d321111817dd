//! Tag-scanning parser for the `<meeting_state>` block.
//!
//! Scanning is deliberately forgiving: anything it does not recognize is
//! skipped, and a broken block is still removed from the display text.

use huddle_core::agenda::{ItemType, Priority};
use huddle_core::extraction::*;
use regex_lite::Regex;
use std::collections::HashMap;
use tracing::{debug, trace};

use super::ReplyParser;
use super::protocol::*;

/// The default [`ReplyParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedParser;

impl ReplyParser for TaggedParser {
    fn parse(&self, reply: &str) -> ExtractionResult {
        parse_meeting_state(reply)
    }

    fn format_instructions(&self, with_profiles: bool) -> String {
        format_instructions(with_profiles)
    }
}

/// Split a reply into display text and structured output.
pub fn parse_meeting_state(reply: &str) -> ExtractionResult {
    let open = open_tag(BLOCK);
    let close = close_tag(BLOCK);

    let Some(start) = reply.find(&open) else {
        return ExtractionResult::plain(reply);
    };
    let inner_start = start + open.len();

    let Some(inner_len) = reply[inner_start..].find(&close) else {
        debug!("Unterminated protocol block stripped");
        return ExtractionResult::plain(reply[..start].trim());
    };

    let inner = &reply[inner_start..inner_start + inner_len];
    let after = &reply[inner_start + inner_len + close.len()..];

    let result = ExtractionResult {
        display_text: format!("{}{}", &reply[..start], after).trim().to_string(),
        extractions: parse_extractions(inner),
        agenda_updates: parse_agenda_updates(inner),
        next_item: parse_next_item(inner),
    };

    trace!(
        extractions = result.extractions.len(),
        has_updates = !result.agenda_updates.is_empty(),
        "Protocol block parsed"
    );
    result
}

fn parse_extractions(xml: &str) -> Extractions {
    Extractions {
        tasks: elements(xml, TASK)
            .into_iter()
            .map(|(mut attrs, text)| ExtractedTask {
                text,
                deadline: attrs.remove(ATTR_DEADLINE),
                project: attrs.remove(ATTR_PROJECT),
            })
            .collect(),
        decisions: elements(xml, DECISION)
            .into_iter()
            .map(|(mut attrs, content)| Decision {
                content,
                project: attrs.remove(ATTR_PROJECT),
            })
            .collect(),
        commitments: elements(xml, COMMITMENT)
            .into_iter()
            .map(|(mut attrs, content)| Commitment {
                content,
                to: attrs.remove(ATTR_TO),
                deadline: attrs.remove(ATTR_DEADLINE),
            })
            .collect(),
        waiting_for: elements(xml, WAITING_FOR)
            .into_iter()
            .map(|(mut attrs, content)| WaitingFor {
                content,
                from: attrs.remove(ATTR_FROM),
                due: attrs.remove(ATTR_DUE),
            })
            .collect(),
        profiles: elements(xml, PROFILE)
            .into_iter()
            .filter_map(|(mut attrs, value)| {
                Some(ProfileField {
                    field: attrs.remove(ATTR_FIELD)?,
                    value,
                })
            })
            .collect(),
    }
}

fn parse_agenda_updates(xml: &str) -> AgendaUpdates {
    AgendaUpdates {
        resolves: empty_elements(xml, RESOLVE)
            .into_iter()
            .filter_map(|mut attrs| {
                Some(ResolveDirective {
                    id: attrs.remove(ATTR_ID)?,
                    resolution: attrs.remove(ATTR_RESOLUTION),
                })
            })
            .collect(),
        defers: empty_elements(xml, DEFER)
            .into_iter()
            .filter_map(|mut attrs| Some(DeferDirective { id: attrs.remove(ATTR_ID)? }))
            .collect(),
        adds: empty_elements(xml, ADD)
            .into_iter()
            .filter_map(|mut attrs| {
                Some(AddDirective {
                    item_type: attrs.get(ATTR_TYPE).and_then(|t| ItemType::parse(t)),
                    priority: attrs.get(ATTR_PRIORITY).and_then(|p| Priority::parse(p)),
                    content: attrs.remove(ATTR_CONTENT)?,
                })
            })
            .collect(),
    }
}

fn parse_next_item(xml: &str) -> Option<String> {
    let open = regex_lite::escape(&open_tag(NEXT_ITEM));
    let close = regex_lite::escape(&close_tag(NEXT_ITEM));
    let re = Regex::new(&format!("(?s){open}(.*?){close}")).ok()?;
    re.captures(xml)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `<tag attrs>body</tag>` occurrences with a non-empty body.
fn elements(xml: &str, tag: &str) -> Vec<(HashMap<String, String>, String)> {
    let Ok(re) = Regex::new(&format!(r"(?s)<{tag}(\s[^>]*)?>(.*?)</{tag}>")) else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .filter_map(|c| {
            let body = c[2].trim();
            if body.is_empty() {
                return None;
            }
            let attrs = c.get(1).map(|m| attributes(m.as_str())).unwrap_or_default();
            Some((attrs, body.to_string()))
        })
        .collect()
}

/// Attribute maps of `<tag attrs/>` (or `<tag attrs>`) occurrences.
fn empty_elements(xml: &str, tag: &str) -> Vec<HashMap<String, String>> {
    let Ok(re) = Regex::new(&format!(r"<{tag}(\s[^>]*?)?/?>")) else {
        return Vec::new();
    };
    re.captures_iter(xml)
        .map(|c| c.get(1).map(|m| attributes(m.as_str())).unwrap_or_default())
        .collect()
}

/// `name="value"` pairs; empty values are treated as absent.
fn attributes(raw: &str) -> HashMap<String, String> {
    let Ok(re) = Regex::new(r#"(\w+)="([^"]*)""#) else {
        return HashMap::new();
    };
    re.captures_iter(raw)
        .filter_map(|c| {
            let value = c[2].trim();
            (!value.is_empty()).then(|| (c[1].to_string(), value.to_string()))
        })
        .collect()
}
