//! Tool-result truncation.
//!
//! Oversized tool results are cut to the configured character budget with
//! a machine-readable note appended stating the original size and item
//! count, so the model reasons over the sample instead of re-requesting
//! the full payload.

use serde_json::Value;

/// Truncate a tool result to `char_limit` characters.
///
/// Results within budget pass through unchanged. Oversized results become
/// a string: a prefix of the serialized payload plus the truncation note.
pub fn truncate_tool_result(result: &Value, char_limit: usize) -> Value {
    let serialized = match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if serialized.len() <= char_limit {
        return result.clone();
    }

    let item_count = count_items(result);
    let cut = floor_char_boundary(&serialized, char_limit);
    let prefix = &serialized[..cut];
    Value::String(format!(
        "{prefix}\n[truncated: original {} chars, {} items; reason over this sample \
         rather than re-requesting the full payload]",
        serialized.len(),
        item_count,
    ))
}

/// Item count for the truncation note: array length, object entry count,
/// or the deepest array length found under a top-level object field.
fn count_items(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map
            .values()
            .filter_map(|v| v.as_array().map(Vec::len))
            .max()
            .unwrap_or(map.len()),
        _ => 0,
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn small_result_passes_through_unchanged() {
        let result = json!({"count": 3, "items": ["a", "b"]});
        assert_eq!(truncate_tool_result(&result, 1000), result);
    }

    #[test]
    fn oversized_result_is_cut_with_note() {
        let big: Vec<String> = (0..200).map(|i| format!("row number {i}")).collect();
        let result = json!({"rows": big});
        let truncated = truncate_tool_result(&result, 500);
        let s = truncated.as_str().unwrap();
        assert!(s.len() < result.to_string().len());
        assert!(s.contains("[truncated: original"));
        assert!(s.contains("200 items"));
        assert!(s.contains("rather than re-requesting"));
    }

    #[test]
    fn note_reports_original_char_count() {
        let payload = "x".repeat(2000);
        let result = json!(payload);
        let truncated = truncate_tool_result(&result, 100);
        let s = truncated.as_str().unwrap();
        assert!(s.contains("original 2000 chars"));
    }

    #[test]
    fn array_item_count_is_array_length() {
        let result = json!([1, 2, 3, 4, 5]);
        let truncated = truncate_tool_result(&result, 3);
        assert!(truncated.as_str().unwrap().contains("5 items"));
    }

    #[test]
    fn cut_respects_char_boundaries() {
        let payload = "é".repeat(300);
        let result = json!(payload);
        // Must not panic on a multi-byte boundary
        let truncated = truncate_tool_result(&result, 101);
        assert!(truncated.as_str().unwrap().contains("[truncated"));
    }
}
