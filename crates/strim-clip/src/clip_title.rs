//! Deterministic clip title construction.
//!
//! A published clip title is `"{source title} by {requester} {date}-{id}"`.
//! The date/id suffix is never truncated; when the whole string exceeds the
//! tenant's maximum length the source title is shortened first, then the
//! requester name is dropped, and as a last resort a minimal id-derived title
//! is returned so the result is always non-empty and length-respecting.

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn char_prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Builds the clip title under `max_length` characters.
pub fn build_clip_title(
    source_title: &str,
    requester_name: &str,
    date: &str,
    clip_id: &str,
    max_length: usize,
) -> String {
    let max_length = max_length.max(1);
    let source_title = source_title.trim();
    let requester_name = requester_name.trim();
    let suffix = format!(" {date}-{clip_id}");

    let full = if requester_name.is_empty() {
        format!("{source_title}{suffix}")
    } else {
        format!("{source_title} by {requester_name}{suffix}")
    };
    if char_len(&full) <= max_length {
        return full;
    }

    let Some(body_budget) = max_length.checked_sub(char_len(&suffix)) else {
        return char_prefix(clip_id, max_length);
    };

    // Step one: shorten the source title, keep the requester intact.
    if !requester_name.is_empty() {
        let requester_part = format!(" by {requester_name}");
        if let Some(title_budget) = body_budget.checked_sub(char_len(&requester_part)) {
            if title_budget >= 1 && char_len(source_title) > title_budget {
                let short_title = char_prefix(source_title, title_budget);
                return format!("{short_title}{requester_part}{suffix}");
            }
        }
    }

    // Step two: drop the requester, shorten the title alone.
    if body_budget >= 1 {
        let short_title = if source_title.is_empty() {
            char_prefix(clip_id, body_budget)
        } else {
            char_prefix(source_title, body_budget)
        };
        return format!("{short_title}{suffix}");
    }

    // Suffix alone no longer fits; fall back to a minimal id-derived title.
    char_prefix(clip_id, max_length)
}
