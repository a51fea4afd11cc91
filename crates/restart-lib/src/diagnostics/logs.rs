//! Previous-container log block

/// Lines requested from the previous container instance
pub const TAIL_LINES: i64 = 50;

pub const NO_LOGS: &str = "• No Logs Before Restart\n";

const HEADER: &str = "• Pod Logs Before Restart\n```\n";
const FOOTER: &str = "```\n";

/// Longest suffix of `text` that fits in `max` bytes
///
/// Starts on a line boundary when the cut lands mid-line and a later line
/// exists; otherwise starts on the nearest char boundary.
pub fn tail_within(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    if start > 0 && text.as_bytes()[start - 1] != b'\n' {
        if let Some(offset) = text[start..].find('\n') {
            let line_start = start + offset + 1;
            if line_start < text.len() {
                start = line_start;
            }
        }
    }
    &text[start..]
}

/// Render the log block within `budget` bytes
///
/// Empty logs render the placeholder. The earliest lines are discarded when
/// the block would not fit. Returns an empty string when not even the block
/// framing fits.
pub fn render_log_block(logs: &str, budget: usize) -> String {
    if logs.is_empty() {
        return if NO_LOGS.len() <= budget {
            NO_LOGS.to_string()
        } else {
            String::new()
        };
    }

    // Reserve one byte for a closing newline before the fence
    let overhead = HEADER.len() + FOOTER.len() + 1;
    let Some(room) = budget.checked_sub(overhead).filter(|r| *r > 0) else {
        return String::new();
    };

    let tail = tail_within(logs, room);
    let mut out = String::with_capacity(tail.len() + overhead);
    out.push_str(HEADER);
    out.push_str(tail);
    if !tail.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(FOOTER);
    out
}

/// Last line with visible content, used to match ignored error messages
pub fn last_non_empty_line(logs: &str) -> Option<&str> {
    logs.lines().rev().find(|line| !line.trim().is_empty())
}
