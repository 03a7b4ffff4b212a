//! Text helpers for reading agent transcripts.

/// Every balanced top-level `{...}` span in `text`, in order.
///
/// Braces inside JSON strings are respected, so a title like `"fix {x}"`
/// does not split an object.
pub fn extract_json_objects(text: &str) -> Vec<&str> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    objects.push(&text[s..=i]);
                }
            }
            _ => {}
        }
    }

    objects
}

/// The first balanced JSON object in `text`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_json_objects(text).into_iter().next()
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", head)
}
