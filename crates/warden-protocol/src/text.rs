//! Bounded-string helpers used when building events.

use crate::error::{WardenError, WardenResult};

const ELLIPSIS: &str = "...";

/// Truncate `value` to at most `max_chars` characters, marking the cut with
/// `...`. The cut always lands on a char boundary.
pub fn bounded_preview(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_owned();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = value.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Reject `value` when it is empty or longer than `max_chars` characters.
pub fn require_bounded(field: &str, value: &str, max_chars: usize) -> WardenResult<()> {
    if value.is_empty() {
        return Err(WardenError::InvalidEvent(format!("{field} must not be empty")));
    }
    let len = value.chars().count();
    if len > max_chars {
        return Err(WardenError::InvalidEvent(format!(
            "{field} is {len} chars, limit is {max_chars}"
        )));
    }
    Ok(())
}
