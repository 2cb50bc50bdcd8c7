// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 AirState Contributors

//! Pure algorithms behind the `deep_merge` and `atomic_ops` scripts. Kept
//! free of any KV/bus dependency so they can be unit tested directly.

use airstate_types::Document;
use bytes::Bytes;
use serde_json::{Map, Value};

/// Serializes a Replace input the way the script does: strings pass
/// through as raw bytes, everything else is JSON-encoded.
pub fn serialize_replace_value(value: &Document) -> Bytes {
    match value.as_str() {
        Some(s) => Bytes::from(s.to_owned()),
        None => Bytes::from(serde_json::to_vec(value).expect("Value always serializes")),
    }
}

/// `deep_merge` script semantics. `current` is the raw bytes stored under
/// the key, if any; `None` or empty means absent.
pub fn deep_merge(current: Option<&[u8]>, input: &Document) -> Document {
    let current = match current {
        None => return input.clone(),
        Some(bytes) if bytes.is_empty() => return input.clone(),
        Some(bytes) => bytes,
    };

    let Ok(stored) = serde_json::from_slice::<Value>(current) else {
        return input.clone();
    };

    match (stored, input) {
        (Value::Object(stored_obj), Value::Object(input_obj)) => {
            Value::Object(recursive_merge(stored_obj, input_obj))
        }
        _ => input.clone(),
    }
}

fn recursive_merge(mut base: Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    for (key, overlay_value) in overlay {
        match (base.get(key), overlay_value) {
            (Some(Value::Object(base_obj)), Value::Object(overlay_obj)) => {
                let merged = recursive_merge(base_obj.clone(), overlay_obj);
                base.insert(key.clone(), Value::Object(merged));
            }
            _ => {
                base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
    base
}

/// Why an `atomic_ops` call did not apply, split the way the HTTP-visible
/// failure taxonomy is split: [`AtomicOpFailure::Shape`] is an
/// input-shape error (no operator present, or an operator's own argument
/// has the wrong shape); [`AtomicOpFailure::Conflict`] is a type mismatch
/// against the *current* document, which can only be discovered once the
/// document is in hand.
#[derive(Debug, Clone, PartialEq)]
pub enum AtomicOpFailure {
    Shape(String),
    Conflict(String),
}

const OPERATORS_IN_ORDER: [&str; 5] = ["$set", "$unset", "$inc", "$concat", "$push"];

/// Validates operator *shapes* without looking at the current document:
/// at least one recognized operator present, `$set`/`$inc`/`$concat`/`$push`
/// are objects, `$unset` is an array of strings.
pub fn validate_atomic_ops_shape(ops: &Document) -> Result<(), AtomicOpFailure> {
    let Some(ops_obj) = ops.as_object() else {
        return Err(AtomicOpFailure::Shape("atomic-ops body must be a JSON object".into()));
    };

    if !OPERATORS_IN_ORDER.iter().any(|op| ops_obj.contains_key(*op)) {
        return Err(AtomicOpFailure::Shape(
            "at least one of $set, $unset, $inc, $concat, $push must be supplied".into(),
        ));
    }

    if let Some(v) = ops_obj.get("$set") {
        if !v.is_object() {
            return Err(AtomicOpFailure::Shape("$set argument must be an object of path -> value".into()));
        }
    }
    if let Some(v) = ops_obj.get("$unset") {
        let Some(arr) = v.as_array() else {
            return Err(AtomicOpFailure::Shape("$unset argument must be an array of paths".into()));
        };
        if !arr.iter().all(Value::is_string) {
            return Err(AtomicOpFailure::Shape("$unset argument must be an array of string paths".into()));
        }
    }
    if let Some(v) = ops_obj.get("$inc") {
        let Some(inc_obj) = v.as_object() else {
            return Err(AtomicOpFailure::Shape("$inc argument must be an object of path -> number".into()));
        };
        if !inc_obj.values().all(Value::is_number) {
            return Err(AtomicOpFailure::Shape("$inc argument values must be numbers".into()));
        }
    }
    if let Some(v) = ops_obj.get("$concat") {
        if !v.is_object() {
            return Err(AtomicOpFailure::Shape("$concat argument must be an object of path -> value".into()));
        }
    }
    if let Some(v) = ops_obj.get("$push") {
        if !v.is_object() {
            return Err(AtomicOpFailure::Shape("$push argument must be an object of path -> value".into()));
        }
    }

    Ok(())
}

/// Applies `$set → $unset → $inc → $concat → $push` against `current` in
/// that fixed order. `current` is treated as an empty object if the key was
/// absent; the caller is responsible for that substitution before calling
/// in.
pub fn apply_atomic_ops(current: &Document, ops: &Document) -> Result<Document, AtomicOpFailure> {
    validate_atomic_ops_shape(ops)?;
    let ops_obj = ops.as_object().expect("validated above");
    let mut doc = current.clone();
    if !doc.is_object() {
        doc = Value::Object(Map::new());
    }

    if let Some(Value::Object(set_obj)) = ops_obj.get("$set") {
        for (path, value) in set_obj {
            set_path(&mut doc, path, value.clone())?;
        }
    }

    if let Some(Value::Array(paths)) = ops_obj.get("$unset") {
        for path in paths {
            let path = path.as_str().expect("validated above");
            unset_path(&mut doc, path);
        }
    }

    if let Some(Value::Object(inc_obj)) = ops_obj.get("$inc") {
        for (path, delta) in inc_obj {
            apply_inc(&mut doc, path, delta)?;
        }
    }

    if let Some(Value::Object(concat_obj)) = ops_obj.get("$concat") {
        for (path, value) in concat_obj {
            apply_concat(&mut doc, path, value)?;
        }
    }

    if let Some(Value::Object(push_obj)) = ops_obj.get("$push") {
        for (path, value) in push_obj {
            apply_push(&mut doc, path, value)?;
        }
    }

    Ok(doc)
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').collect()
}

/// Assigns `value` at `path`, creating missing intermediate objects and
/// overwriting any intermediate segment that isn't already one (a scalar in
/// the way of a deeper `$set` is silently replaced, not treated as a
/// conflict).
fn set_path(doc: &mut Value, path: &str, value: Value) -> Result<(), AtomicOpFailure> {
    let segments = split_path(path);
    let mut cursor = doc;
    for segment in &segments[..segments.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let obj = cursor.as_object_mut().expect("just made an object");
        if !obj.get(*segment).is_some_and(Value::is_object) {
            obj.insert((*segment).to_string(), Value::Object(Map::new()));
        }
        cursor = obj.get_mut(*segment).expect("just inserted");
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    let leaf = *segments.last().expect("path has at least one segment");
    cursor.as_object_mut().expect("just made an object").insert(leaf.to_string(), value);
    Ok(())
}

/// Removes the leaf field at `path`. Never auto-creates; a missing
/// intermediate or leaf is a no-op.
fn unset_path(doc: &mut Value, path: &str) {
    let segments = split_path(path);
    let mut cursor = &mut *doc;
    for segment in &segments[..segments.len() - 1] {
        match cursor.get_mut(*segment) {
            Some(next) if next.is_object() => cursor = next,
            _ => return,
        }
    }
    let leaf = *segments.last().expect("path has at least one segment");
    if let Some(obj) = cursor.as_object_mut() {
        obj.remove(leaf);
    }
}

fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = doc;
    for segment in split_path(path) {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

fn apply_inc(doc: &mut Value, path: &str, delta: &Value) -> Result<(), AtomicOpFailure> {
    let delta = delta.as_f64().expect("validated as number above");
    let new_value = match get_path(doc, path) {
        None => delta,
        Some(Value::Number(n)) => n.as_f64().expect("json number") + delta,
        Some(other) => {
            return Err(AtomicOpFailure::Conflict(format!(
                "cannot $inc field '{path}': current value is not a number (found {})",
                type_name(other)
            )));
        }
    };
    set_path(doc, path, json_number(new_value))
}

fn apply_concat(doc: &mut Value, path: &str, value: &Value) -> Result<(), AtomicOpFailure> {
    match get_path(doc, path) {
        None => set_path(doc, path, value.clone()),
        Some(Value::String(existing)) => {
            let Some(addition) = value.as_str() else {
                return Err(AtomicOpFailure::Conflict(format!(
                    "cannot $concat to field '{path}': current value is a string but new value is {}",
                    type_name(value)
                )));
            };
            set_path(doc, path, Value::String(format!("{existing}{addition}")))
        }
        Some(Value::Array(existing)) => {
            let Some(addition) = value.as_array() else {
                return Err(AtomicOpFailure::Conflict(format!(
                    "cannot $concat to field '{path}': current value is an array but new value is {}",
                    type_name(value)
                )));
            };
            let mut merged = existing.clone();
            merged.extend(addition.iter().cloned());
            set_path(doc, path, Value::Array(merged))
        }
        Some(other) => Err(AtomicOpFailure::Conflict(format!(
            "cannot $concat to field '{path}': current value is {} which cannot be concatenated",
            type_name(other)
        ))),
    }
}

fn apply_push(doc: &mut Value, path: &str, value: &Value) -> Result<(), AtomicOpFailure> {
    match get_path(doc, path) {
        None => set_path(doc, path, Value::Array(vec![value.clone()])),
        Some(Value::Array(existing)) => {
            let mut merged = existing.clone();
            merged.push(value.clone());
            set_path(doc, path, Value::Array(merged))
        }
        Some(_) => Err(AtomicOpFailure::Conflict(format!(
            "Cannot $push to field '{path}': current value is not an array"
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Mirrors how a JSON encoder normally renders a whole-valued float (no
/// trailing `.0`), which is what a `$inc` result should look like on the
/// wire even though the arithmetic itself is done in `f64`.
fn json_number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_preserves_siblings() {
        let current = serde_json::to_vec(&json!({"a":{"b":1,"c":2}})).unwrap();
        let input = json!({"a":{"b":9,"d":4}});
        let merged = deep_merge(Some(&current), &input);
        assert_eq!(merged, json!({"a":{"b":9,"c":2,"d":4}}));
    }

    #[test]
    fn deep_merge_falls_back_to_replace_on_non_object_input() {
        let current = serde_json::to_vec(&json!({"a":1})).unwrap();
        let input = json!([1, 2, 3]);
        assert_eq!(deep_merge(Some(&current), &input), input);
    }

    #[test]
    fn deep_merge_falls_back_on_corrupt_storage() {
        let input = json!({"a":1});
        assert_eq!(deep_merge(Some(b"not json"), &input), input);
    }

    #[test]
    fn deep_merge_stores_verbatim_when_absent() {
        let input = json!({"a":1});
        assert_eq!(deep_merge(None, &input), input);
    }

    #[test]
    fn atomic_ops_applies_in_fixed_order() {
        let current = json!({"n":1,"s":"hi","xs":[1]});
        let ops = json!({"$set":{"n":10},"$inc":{"n":5},"$concat":{"s":" there"},"$push":{"xs":2}});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"n":15,"s":"hi there","xs":[1,2]}));
    }

    #[test]
    fn atomic_ops_push_type_conflict() {
        let current = json!({"xs":"not-array"});
        let ops = json!({"$push":{"xs":1}});
        let err = apply_atomic_ops(&current, &ops).unwrap_err();
        assert_eq!(
            err,
            AtomicOpFailure::Conflict("Cannot $push to field 'xs': current value is not an array".into())
        );
    }

    #[test]
    fn atomic_ops_requires_at_least_one_operator() {
        let current = json!({});
        let ops = json!({});
        assert_eq!(
            apply_atomic_ops(&current, &ops).unwrap_err(),
            AtomicOpFailure::Shape(
                "at least one of $set, $unset, $inc, $concat, $push must be supplied".into()
            )
        );
    }

    #[test]
    fn atomic_ops_set_autocreates_intermediate_objects() {
        let current = json!({});
        let ops = json!({"$set":{"a.b.c": 1}});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"a":{"b":{"c":1}}}));
    }

    #[test]
    fn atomic_ops_set_overwrites_a_scalar_intermediate_with_an_object() {
        let current = json!({"a": 5});
        let ops = json!({"$set":{"a.b": 1}});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"a":{"b":1}}));
    }

    #[test]
    fn atomic_ops_unset_is_noop_when_missing() {
        let current = json!({"a":1});
        let ops = json!({"$unset":["missing.path"]});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"a":1}));
    }

    #[test]
    fn atomic_ops_inc_absent_defaults_to_zero() {
        let current = json!({});
        let ops = json!({"$inc":{"n": 3}});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"n":3}));
    }

    #[test]
    fn atomic_ops_inc_against_non_number_is_conflict() {
        let current = json!({"n":"nope"});
        let ops = json!({"$inc":{"n": 3}});
        let err = apply_atomic_ops(&current, &ops).unwrap_err();
        assert!(matches!(err, AtomicOpFailure::Conflict(_)));
    }

    #[test]
    fn atomic_ops_concat_absent_sets_value() {
        let current = json!({});
        let ops = json!({"$concat":{"s": "hi"}});
        let result = apply_atomic_ops(&current, &ops).unwrap();
        assert_eq!(result, json!({"s":"hi"}));
    }
}
