//! Session title derivation.
//!
//! After a session's first successful generation the orchestrator names the
//! session from the prompt that produced it.

/// Longest title produced, in characters, excluding the ellipsis.
pub const MAX_TITLE_CHARS: usize = 60;

/// Derive a short session title from a prompt.
///
/// Whitespace runs collapse to single spaces. Prompts longer than
/// [`MAX_TITLE_CHARS`] are cut at the last word boundary that fits and
/// suffixed with `…`. Returns `None` for a prompt with no visible text.
pub fn title_from_prompt(prompt: &str) -> Option<String> {
    let collapsed = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return Some(collapsed);
    }

    let cut = collapsed
        .char_indices()
        .nth(MAX_TITLE_CHARS)
        .map(|(index, _)| index)
        .unwrap_or(collapsed.len());
    let head = &collapsed[..cut];

    // Prefer a word boundary, unless the first word alone overflows.
    let ends_on_boundary = collapsed[cut..].starts_with(' ');
    let head = match head.rfind(' ') {
        Some(space) if space > 0 && !ends_on_boundary => &head[..space],
        _ => head,
    };
    let head = head.trim_end_matches(|c: char| c.is_ascii_punctuation() || c == ' ');

    Some(format!("{head}…"))
}
