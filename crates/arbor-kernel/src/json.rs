//! Tolerant JSON extraction from LLM output.
//!
//! Every JSON-speaking component accepts three shapes of model output: a raw
//! JSON body, a body wrapped in a ```json fence, or a body embedded in prose
//! where the first balanced `{…}` / `[…]` span is taken.

use serde_json::Value;

/// Strip a ```json … ``` (or bare ``` … ```) fence if present.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}

/// Extract the first balanced span starting with `open` and ending with
/// `close`, respecting JSON string literals and escapes.
fn balanced_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode the first JSON object found in `text` (raw, fenced, or embedded).
pub fn extract_object(text: &str) -> Option<Value> {
    decode_first(text, '{', '}', Value::is_object)
}

/// Decode the first JSON array found in `text` (raw, fenced, or embedded).
pub fn extract_array(text: &str) -> Option<Value> {
    decode_first(text, '[', ']', Value::is_array)
}

fn decode_first(text: &str, open: char, close: char, is_shape: fn(&Value) -> bool) -> Option<Value> {
    let unfenced = strip_fences(text);
    if let Ok(v) = serde_json::from_str::<Value>(unfenced) {
        if is_shape(&v) {
            return Some(v);
        }
    }
    let span = balanced_span(unfenced, open, close)?;
    serde_json::from_str(span).ok().filter(is_shape)
}
