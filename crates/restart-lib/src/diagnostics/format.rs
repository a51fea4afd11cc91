//! Pure text formatting for pods, containers and nodes
//!
//! No decisions are made here: callers pass already-derived values and get
//! back aligned text blocks ready to be embedded in a Slack message.

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::{Container, ContainerState, ContainerStatus, Node};
use tabled::builder::Builder;
use tabled::settings::{Padding, Style};

const LEVEL_1: &str = "  ";
const LEVEL_2: &str = "    ";

/// Render rows as left-aligned columns separated by two spaces
///
/// Output ends with a newline; trailing whitespace is trimmed from each line.
pub fn aligned<I, R>(rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut builder = Builder::default();
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    table.with(Style::empty()).with(Padding::new(0, 2, 0, 0));

    let mut out = String::new();
    for line in table.to_string().lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// kubectl-style abbreviated duration ("45s", "3m12s", "5h", "12d")
pub fn human_duration(d: Duration) -> String {
    let seconds = d.num_seconds();
    if seconds < -1 {
        return "<invalid>".to_string();
    } else if seconds < 0 {
        return "0s".to_string();
    } else if seconds < 60 * 2 {
        return format!("{seconds}s");
    }

    let minutes = d.num_minutes();
    if minutes < 10 {
        let s = seconds % 60;
        return if s == 0 {
            format!("{minutes}m")
        } else {
            format!("{minutes}m{s}s")
        };
    } else if minutes < 60 * 3 {
        return format!("{minutes}m");
    }

    let hours = d.num_hours();
    if hours < 8 {
        let m = minutes % 60;
        if m == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h{m}m")
        }
    } else if hours < 48 {
        format!("{hours}h")
    } else if hours < 24 * 8 {
        let h = hours % 24;
        if h == 0 {
            format!("{}d", hours / 24)
        } else {
            format!("{}d{h}h", hours / 24)
        }
    } else if hours < 24 * 365 * 2 {
        format!("{}d", hours / 24)
    } else if hours < 24 * 365 * 8 {
        let days = (hours / 24) % 365;
        if days == 0 {
            format!("{}y", hours / 24 / 365)
        } else {
            format!("{}y{days}d", hours / 24 / 365)
        }
    } else {
        format!("{}y", hours / 24 / 365)
    }
}

/// Elapsed time since `timestamp`, or `<unknown>`
pub fn since(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match timestamp {
        Some(ts) => human_duration(now - ts),
        None => "<unknown>".to_string(),
    }
}

/// RFC 1123 with numeric zone, as printed by `kubectl describe`
pub fn rfc1123z(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%a, %d %b %Y %H:%M:%S %z").to_string())
        .unwrap_or_default()
}

pub fn print_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// `kubectl get pod` style row
pub fn pod_table(name: &str, ready: &str, status: &str, restarts: &str, age: &str) -> String {
    aligned([
        row(["NAME", "READY", "STATUS", "RESTARTS", "AGE"]),
        row([name, ready, status, restarts, age]),
    ])
}

/// `kubectl get node` style row with readiness and schedulability
pub fn node_table(node: &Node, now: DateTime<Utc>) -> String {
    let mut status: Vec<String> = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|c| {
            if c.status == "True" {
                vec![c.type_.clone()]
            } else {
                vec![format!("Not{}", c.type_)]
            }
        })
        .unwrap_or_else(|| vec!["Unknown".to_string()]);

    if node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
    {
        status.push("SchedulingDisabled".to_string());
    }

    let version = node
        .status
        .as_ref()
        .and_then(|s| s.node_info.as_ref())
        .map(|info| info.kubelet_version.as_str())
        .unwrap_or_default();

    aligned([
        row(["NAME", "STATUS", "AGE", "VERSION"]),
        vec![
            node.metadata.name.clone().unwrap_or_default(),
            status.join(","),
            since(node.metadata.creation_timestamp.as_ref().map(|t| t.0), now),
            version.to_string(),
        ],
    ])
}

/// `kubectl describe` style block for one container's current and last state
pub fn describe_container_state(status: &ContainerStatus) -> String {
    let mut rows = vec![
        vec![format!("{}:", status.name), String::new()],
        vec![format!("{LEVEL_1}Ready:"), print_bool(status.ready).to_string()],
        vec![format!("{LEVEL_1}Restart Count:"), status.restart_count.to_string()],
    ];
    describe_state("State", status.state.as_ref(), &mut rows);
    if let Some(last) = status.last_state.as_ref().filter(|s| s.terminated.is_some()) {
        describe_state("Last State", Some(last), &mut rows);
    }
    aligned(rows)
}

fn describe_state(label: &str, state: Option<&ContainerState>, rows: &mut Vec<Vec<String>>) {
    let heading = format!("{LEVEL_1}{label}:");
    let state = state.cloned().unwrap_or_default();

    if let Some(running) = state.running {
        rows.push(vec![heading, "Running".to_string()]);
        rows.push(vec![
            format!("{LEVEL_2}Started:"),
            rfc1123z(running.started_at.map(|t| t.0)),
        ]);
    } else if let Some(waiting) = state.waiting {
        rows.push(vec![heading, "Waiting".to_string()]);
        if let Some(reason) = waiting.reason.filter(|r| !r.is_empty()) {
            rows.push(vec![format!("{LEVEL_2}Reason:"), reason]);
        }
    } else if let Some(terminated) = state.terminated {
        rows.push(vec![heading, "Terminated".to_string()]);
        if let Some(reason) = terminated.reason.filter(|r| !r.is_empty()) {
            rows.push(vec![format!("{LEVEL_2}Reason:"), reason]);
        }
        if let Some(message) = terminated.message.filter(|m| !m.is_empty()) {
            rows.push(vec![format!("{LEVEL_2}Message:"), message]);
        }
        rows.push(vec![format!("{LEVEL_2}Exit Code:"), terminated.exit_code.to_string()]);
        if let Some(signal) = terminated.signal.filter(|s| *s > 0) {
            rows.push(vec![format!("{LEVEL_2}Signal:"), signal.to_string()]);
        }
        rows.push(vec![
            format!("{LEVEL_2}Started:"),
            rfc1123z(terminated.started_at.map(|t| t.0)),
        ]);
        rows.push(vec![
            format!("{LEVEL_2}Finished:"),
            rfc1123z(terminated.finished_at.map(|t| t.0)),
        ]);
    } else {
        rows.push(vec![heading, "Waiting".to_string()]);
    }
}

/// Limits and requests of a container, resource names in lexical order
pub fn container_resources(container: &Container) -> String {
    let Some(resources) = container.resources.as_ref() else {
        return String::new();
    };

    let mut rows = Vec::new();
    for (label, list) in [("Limits", &resources.limits), ("Requests", &resources.requests)] {
        let Some(list) = list.as_ref().filter(|l| !l.is_empty()) else {
            continue;
        };
        rows.push(vec![format!("{LEVEL_1}{label}:"), String::new()]);
        // BTreeMap iterates in lexical key order
        for (name, quantity) in list {
            rows.push(vec![format!("{LEVEL_2}{name}:"), quantity.0.clone()]);
        }
    }

    if rows.is_empty() {
        String::new()
    } else {
        aligned(rows)
    }
}

fn row<const N: usize>(cells: [&str; N]) -> Vec<String> {
    cells.iter().map(|c| c.to_string()).collect()
}
