//! Tolerant decoding of model output.
//!
//! Epistemic foundation:
//! - B_i: Models usually answer with the requested JSON, but wrap it in code
//!   fences, prose, or encode numbers as strings
//! - K_i: Nothing here panics on malformed input; callers get `None` or a
//!   `RankError::Parse` and apply their stage fallback

use crate::models::{RankError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("valid fence pattern"));

static LEADING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+(?:\.\d+)?)").expect("valid number pattern"));

/// Keys under which models tend to put the per-item list.
const LIST_KEYS: &[&str] = &[
    "results",
    "evaluations",
    "documents",
    "articles",
    "items",
    "scores",
];

/// Return the body of the first fenced code block, or the input unchanged.
pub fn strip_code_fences(text: &str) -> &str {
    FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

/// Outermost `open`..`close` span of a string, if any.
fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (start < end).then(|| &text[start..=end])
}

/// Extract the outermost JSON object from a string, or the outermost array
/// when there is no object.
pub fn extract_json(text: &str) -> Option<&str> {
    outer_span(text, '{', '}').or_else(|| outer_span(text, '[', ']'))
}

/// Decode a model response into a JSON value.
///
/// The outermost object span is tried before the outermost array span, so
/// bracketed prose ahead of the object ("articles [1-3]: {...}") is skipped.
pub fn parse_json(text: &str) -> Result<Value> {
    let body = strip_code_fences(text);

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        return Ok(value);
    }

    let candidates = [outer_span(body, '{', '}'), outer_span(body, '[', ']')];
    let mut last_error = None;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) => Err(RankError::Parse(format!(
            "Invalid JSON in response ({e}): {}",
            preview(text)
        ))),
        None => Err(RankError::Parse(format!(
            "No JSON found in response: {}",
            preview(text)
        ))),
    }
}

/// The list of per-item entries in a batch response.
///
/// Accepts a bare array, an object holding an array under a known key, a
/// single object with an `id`, or failing those the first array field.
pub fn result_items(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.iter().collect();
                }
            }
            if map.contains_key("id") {
                return vec![value];
            }
            map.values()
                .find_map(|v| v.as_array())
                .map(|items| items.iter().collect())
                .unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

/// Read a score encoded as a number or a string ("16", "16/20", "7.5 pts").
pub fn score_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => LEADING_NUMBER_RE
            .captures(s)
            .and_then(|c| c[1].parse::<f64>().ok()),
        Value::Object(map) => map.get("score").and_then(score_value),
        _ => None,
    }
}

/// First score found under any of `keys`.
pub fn score_field(item: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| item.get(*k).and_then(score_value))
}

/// Read an identifier encoded as an integer or a string.
pub fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(|v| v.to_string())
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| (f as i64).to_string())),
        Value::String(s) => {
            let trimmed = s.trim().trim_start_matches('#');
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// Local 1-based batch index of an item, if it has a usable one.
pub fn local_index(item: &Value) -> Option<usize> {
    let raw = ["id", "index", "idx"]
        .iter()
        .find_map(|k| item.get(*k).and_then(id_value))?;
    raw.parse::<usize>().ok()
}

/// First non-empty string found under any of `keys`.
pub fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match item.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn preview(text: &str) -> String {
    const MAX: usize = 200;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(MAX).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_fences() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(strip_code_fences(text), "{\"a\": 1}");
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = r#"Result: {"results": [{"id": 1}]} done"#;
        assert_eq!(extract_json(text), Some(r#"{"results": [{"id": 1}]}"#));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_json_recovers_wrapped_object() {
        let value = parse_json("Sure! ```\n{\"score\": 7}\n```").unwrap();
        assert_eq!(value["score"], 7);

        let value = parse_json("The answer is {\"score\": \"8\"} ok").unwrap();
        assert_eq!(score_value(&value["score"]), Some(8.0));
    }

    #[test]
    fn test_parse_json_skips_bracketed_prose_before_object() {
        let value =
            parse_json(r#"Scores for articles [1-3]: {"results": [{"id": 1, "score": 9}]}"#)
                .unwrap();
        let items = result_items(&value);
        assert_eq!(items.len(), 1);
        assert_eq!(score_field(items[0], &["score"]), Some(9.0));

        let value = parse_json(r#"Ranked list: [{"id": 2, "score": 4}] (see notes)"#).unwrap();
        assert_eq!(result_items(&value).len(), 1);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(matches!(parse_json("I cannot help"), Err(RankError::Parse(_))));
        assert!(matches!(parse_json("{ broken"), Err(RankError::Parse(_))));
    }

    #[test]
    fn test_result_items_shapes() {
        let wrapped = json!({"results": [{"id": 1}, {"id": 2}]});
        assert_eq!(result_items(&wrapped).len(), 2);

        let bare = json!([{"id": 1}]);
        assert_eq!(result_items(&bare).len(), 1);

        let other_key = json!({"ratings": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(result_items(&other_key).len(), 3);

        let single = json!({"id": 4, "score": 2});
        assert_eq!(result_items(&single).len(), 1);

        let single_with_list = json!({"id": 1, "score": 2, "tags": ["x"]});
        let items = result_items(&single_with_list);
        assert_eq!(items.len(), 1);
        assert_eq!(local_index(items[0]), Some(1));

        assert!(result_items(&json!("text")).is_empty());
    }

    #[test]
    fn test_score_encodings() {
        assert_eq!(score_value(&json!(16)), Some(16.0));
        assert_eq!(score_value(&json!("16")), Some(16.0));
        assert_eq!(score_value(&json!("16/20")), Some(16.0));
        assert_eq!(score_value(&json!(" 7.5 points")), Some(7.5));
        assert_eq!(score_value(&json!({"score": 3})), Some(3.0));
        assert_eq!(score_value(&json!("high")), None);
        assert_eq!(score_value(&json!(null)), None);
    }

    #[test]
    fn test_local_index_encodings() {
        assert_eq!(local_index(&json!({"id": 3})), Some(3));
        assert_eq!(local_index(&json!({"id": "3"})), Some(3));
        assert_eq!(local_index(&json!({"id": "#2"})), Some(2));
        assert_eq!(local_index(&json!({"index": 5.0})), Some(5));
        assert_eq!(local_index(&json!({"id": "abc"})), None);
        assert_eq!(local_index(&json!({"score": 1})), None);
    }
}
