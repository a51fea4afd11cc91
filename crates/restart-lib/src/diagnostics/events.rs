//! Warning event selection and rendering

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Event, Node};

use super::format;

/// Field selector for warning events in a namespace
pub const WARNING_EVENTS: &str = "type!=Normal";

/// Field selector for node-scoped warning events
pub const NODE_WARNING_EVENTS: &str = "involvedObject.kind=Node,type!=Normal";

/// Namespace node events are recorded in
pub const NODE_EVENTS_NAMESPACE: &str = "default";

pub const NO_POD_EVENTS: &str = "• No Warning Pod Events\n";

/// Last time the event was observed, falling back to the series event time
pub fn last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
}

fn involved_name(event: &Event) -> &str {
    event.involved_object.name.as_deref().unwrap_or_default()
}

/// Events whose involved object is `object`, oldest first
///
/// Ties on the timestamp are broken by involved-object name.
pub fn select<'a>(events: &'a [Event], object: &str) -> Vec<&'a Event> {
    let mut selected: Vec<&Event> = events
        .iter()
        .filter(|e| involved_name(e) == object)
        .collect();
    selected.sort_by(|a, b| {
        last_seen(a)
            .cmp(&last_seen(b))
            .then_with(|| involved_name(a).cmp(involved_name(b)))
    });
    selected
}

/// One `<last seen>, <reason>, <message>` line per event
pub fn render_lines(events: &[&Event]) -> String {
    let mut out = String::new();
    for event in events {
        let seen = last_seen(event).map(|t| t.to_string()).unwrap_or_default();
        out.push_str(&format!(
            "{seen}, {}, {}\n",
            event.reason.as_deref().unwrap_or_default(),
            event.message.as_deref().unwrap_or_default()
        ));
    }
    out
}

/// Pod events block, or the "no events" placeholder
pub fn render_pod_events(events: &[Event], pod_name: &str) -> String {
    let lines = render_lines(&select(events, pod_name));
    if lines.is_empty() {
        NO_POD_EVENTS.to_string()
    } else {
        format!("• Pod Events\n```\n{lines}```\n")
    }
}

/// Node status row followed by the node's events
pub fn render_node_block(node: &Node, events: &[Event], now: DateTime<Utc>) -> String {
    let name = node.metadata.name.as_deref().unwrap_or_default();
    let mut out = format::node_table(node, now);
    out.push_str(&render_lines(&select(events, name)));
    format!("• Node Status and Events\n```\n{out}```\n")
}
