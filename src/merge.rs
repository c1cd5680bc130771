//! Deep merge for turn data.
//!
//! Objects merge key by key, arrays concatenate, anything else is
//! replaced by the incoming value. Turn chains rely on the array rule:
//! merging `{A: [x]}` then `{A: [y]}` must leave `{A: [x, y]}`.

use serde_json::Value;

/// Merges `source` into `target` in place.
pub fn merge_deep(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target), Value::Object(source)) => {
            for (key, incoming) in source {
                match target.get_mut(&key) {
                    Some(existing) => merge_field(existing, incoming),
                    None => {
                        target.insert(key, incoming);
                    }
                }
            }
        }
        (target, source) => *target = source,
    }
}

fn merge_field(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Array(existing), Value::Array(incoming)) => existing.extend(incoming),
        (existing, incoming) if existing.is_object() && incoming.is_object() => {
            merge_deep(existing, incoming)
        }
        (existing, incoming) => *existing = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn arrays_concatenate_across_merges() {
        let mut data = json!({});
        merge_deep(&mut data, json!({ "A": ["x"] }));
        merge_deep(&mut data, json!({ "A": ["y"] }));
        assert_eq!(data, json!({ "A": ["x", "y"] }));
    }

    #[test]
    fn repeated_identical_merge_keeps_first_write() {
        let mut data = json!({});
        let turn = json!({ "Bob": [{ "name": "Bob", "value": "a cat" }] });
        merge_deep(&mut data, turn.clone());
        merge_deep(&mut data, turn);
        assert_eq!(data["Bob"].as_array().unwrap().len(), 2);
        assert_eq!(data["Bob"][0]["value"], "a cat");
    }

    #[test]
    fn objects_merge_recursively() {
        let mut data = json!({ "meta": { "a": 1, "nested": { "x": [1] } } });
        merge_deep(&mut data, json!({ "meta": { "b": 2, "nested": { "x": [2], "y": true } } }));
        assert_eq!(
            data,
            json!({ "meta": { "a": 1, "b": 2, "nested": { "x": [1, 2], "y": true } } })
        );
    }

    #[test]
    fn scalars_and_mismatched_shapes_overwrite() {
        let mut data = json!({ "a": 1, "b": [1], "c": { "k": 1 } });
        merge_deep(&mut data, json!({ "a": 2, "b": "text", "c": [3] }));
        assert_eq!(data, json!({ "a": 2, "b": "text", "c": [3] }));
    }

    #[test]
    fn non_object_target_is_replaced() {
        let mut data = Value::Null;
        merge_deep(&mut data, json!({ "A": [] }));
        assert_eq!(data, json!({ "A": [] }));
    }
}
