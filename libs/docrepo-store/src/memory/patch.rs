//! JSON-pointer patch application.

use serde_json::{Number, Value};

use docrepo_core::PatchOperation;

use crate::{Result, StoreError};

const IMMUTABLE_FIELDS: [&str; 2] = ["id", "partitionKey"];

pub(crate) fn apply_all(doc: &mut Value, operations: &[PatchOperation]) -> Result<()> {
    if operations.is_empty() {
        return Err(StoreError::BadRequest("patch requires at least one operation".into()));
    }
    for op in operations {
        apply(doc, op)?;
    }
    Ok(())
}

fn apply(doc: &mut Value, op: &PatchOperation) -> Result<()> {
    let path = op.path();
    let (parent_path, key) = split_pointer(path)?;
    if parent_path.is_empty() && IMMUTABLE_FIELDS.contains(&key.as_str()) {
        return Err(StoreError::BadRequest(format!("'{path}' cannot be patched")));
    }

    let parent = doc
        .pointer_mut(parent_path)
        .ok_or_else(|| bad_path(path))?;

    match op {
        PatchOperation::Add { value, .. } => insert(parent, &key, value.clone(), true, path),
        PatchOperation::Set { value, .. } => insert(parent, &key, value.clone(), false, path),
        PatchOperation::Replace { value, .. } => {
            let slot = child_mut(parent, &key).ok_or_else(|| bad_path(path))?;
            *slot = value.clone();
            Ok(())
        }
        PatchOperation::Remove { .. } => remove(parent, &key, path),
        PatchOperation::Increment { value, .. } => increment(parent, &key, value, path),
    }
}

fn bad_path(path: &str) -> StoreError {
    StoreError::BadRequest(format!("patch path '{path}' does not exist"))
}

/// Split `/a/b/c` into (`/a/b`, `c`), unescaping the last segment.
fn split_pointer(path: &str) -> Result<(&str, String)> {
    if !path.starts_with('/') || path.len() < 2 {
        return Err(StoreError::BadRequest(format!("invalid patch path '{path}'")));
    }
    let idx = path.rfind('/').unwrap_or(0);
    let key = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..idx], key))
}

fn child_mut<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    match parent {
        Value::Object(map) => map.get_mut(key),
        Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get_mut(i)),
        _ => None,
    }
}

fn insert(parent: &mut Value, key: &str, value: Value, shift: bool, path: &str) -> Result<()> {
    match parent {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
            Ok(())
        }
        Value::Array(arr) => {
            if key == "-" {
                arr.push(value);
                return Ok(());
            }
            let idx: usize = key.parse().map_err(|_| bad_path(path))?;
            if shift && idx <= arr.len() {
                arr.insert(idx, value);
                Ok(())
            } else if !shift && idx < arr.len() {
                arr[idx] = value;
                Ok(())
            } else {
                Err(bad_path(path))
            }
        }
        _ => Err(bad_path(path)),
    }
}

fn remove(parent: &mut Value, key: &str, path: &str) -> Result<()> {
    let removed = match parent {
        Value::Object(map) => map.remove(key).is_some(),
        Value::Array(arr) => match key.parse::<usize>() {
            Ok(idx) if idx < arr.len() => {
                arr.remove(idx);
                true
            }
            _ => false,
        },
        _ => false,
    };
    if removed {
        Ok(())
    } else {
        Err(bad_path(path))
    }
}

fn increment(parent: &mut Value, key: &str, by: &Number, path: &str) -> Result<()> {
    let Some(slot) = child_mut(parent, key) else {
        return insert(parent, key, Value::Number(by.clone()), false, path);
    };
    let Value::Number(current) = slot else {
        return Err(StoreError::BadRequest(format!("'{path}' is not a number")));
    };
    let next = match (current.as_i64(), by.as_i64()) {
        (Some(a), Some(b)) => a.checked_add(b).map(Number::from),
        _ => match (current.as_f64(), by.as_f64()) {
            (Some(a), Some(b)) => Number::from_f64(a + b),
            _ => None,
        },
    };
    let next = next.ok_or_else(|| StoreError::BadRequest(format!("increment overflow at '{path}'")))?;
    *slot = Value::Number(next);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_replace_remove_increment() {
        let mut doc = json!({"id": "1", "partitionKey": "A", "n": 1, "tags": ["a"], "x": true});
        apply_all(
            &mut doc,
            &[
                PatchOperation::set("/status", "open"),
                PatchOperation::replace("/x", false),
                PatchOperation::add("/tags/0", "z"),
                PatchOperation::add("/tags/-", "end"),
                PatchOperation::increment("/n", 4),
                PatchOperation::increment("/fresh", 2),
                PatchOperation::remove("/tags/1"),
            ],
        )
        .unwrap();
        assert_eq!(
            doc,
            json!({"id": "1", "partitionKey": "A", "n": 5, "fresh": 2, "tags": ["z", "end"], "x": false, "status": "open"})
        );
    }

    #[test]
    fn replace_missing_field_is_rejected() {
        let mut doc = json!({"id": "1"});
        let err = apply_all(&mut doc, &[PatchOperation::replace("/nope", 1)]).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn identity_fields_are_immutable() {
        let mut doc = json!({"id": "1", "partitionKey": "A"});
        assert!(apply_all(&mut doc, &[PatchOperation::set("/id", "2")]).is_err());
        assert!(apply_all(&mut doc, &[PatchOperation::remove("/partitionKey")]).is_err());
    }

    #[test]
    fn escaped_pointer_segments() {
        let mut doc = json!({"id": "1", "a/b": 0});
        apply_all(&mut doc, &[PatchOperation::increment("/a~1b", 3)]).unwrap();
        assert_eq!(doc["a/b"], 3);
    }
}
