//! Parsing of model responses into stage outputs.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

fn fence_re() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("valid fence regex")
    })
}

/// Extract a string field from the JSON object embedded in `content`.
///
/// The object may be surrounded by prose or a code fence. Returns `None` when
/// no object parses or the field is missing or not a string.
pub fn extract_json_field(content: &str, field: &str) -> Option<String> {
    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end < start {
        return None;
    }

    match serde_json::from_str::<Value>(&content[start..=end]) {
        Ok(Value::Object(map)) => map.get(field).and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// The named JSON field if present, otherwise the whole response trimmed.
pub fn field_or_raw(content: &str, field: &str) -> String {
    match extract_json_field(content, field) {
        Some(value) => value.trim().to_string(),
        None => content.trim().to_string(),
    }
}

/// Unwrap Markdown code fences around a proof.
///
/// Prefers a block tagged `lean`/`lean4`, then the first fenced block. Text
/// without fences is returned trimmed.
pub fn strip_code_fences(text: &str) -> String {
    let blocks: Vec<(&str, &str)> = fence_re()
        .captures_iter(text)
        .filter_map(|cap| Some((cap.get(1)?.as_str(), cap.get(2)?.as_str())))
        .collect();

    let chosen = blocks
        .iter()
        .find(|(lang, _)| lang.eq_ignore_ascii_case("lean") || lang.eq_ignore_ascii_case("lean4"))
        .or_else(|| blocks.first());

    match chosen {
        Some((_, body)) => body.trim().to_string(),
        None => text.trim().to_string(),
    }
}
