//! JSON Patch (RFC 6902) documents and resolution of PATCH items into full
//! records.

use aspect_models::{ChangeKind, LatestAspect};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ItemError;
use crate::item::{PatchItem, UpsertItem};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("malformed patch document: {0}")]
    Malformed(String),

    #[error("invalid JSON pointer `{0}`")]
    InvalidPointer(String),

    #[error("path `{0}` does not exist")]
    PathNotFound(String),

    #[error("invalid array index at `{0}`")]
    InvalidIndex(String),

    #[error("test failed at `{0}`")]
    TestFailed(String),

    #[error("cannot move `{from}` into its own child `{path}`")]
    MoveIntoChild { from: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// Ordered list of patch operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPatch(pub Vec<PatchOperation>);

impl JsonPatch {
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        serde_json::from_value(value)
            .map_err(|e| PatchError::Malformed(e.to_string()))
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies every operation in order to a copy of `base`.
    pub fn apply(&self, base: &Value) -> Result<Value, PatchError> {
        let mut doc = base.clone();
        for op in &self.0 {
            apply_operation(&mut doc, op)?;
        }
        Ok(doc)
    }
}

fn apply_operation(
    doc: &mut Value,
    op: &PatchOperation,
) -> Result<(), PatchError> {
    match op {
        PatchOperation::Add { path, value } => add(doc, path, value.clone()),
        PatchOperation::Remove { path } => remove(doc, path).map(drop),
        PatchOperation::Replace { path, value } => {
            *lookup_mut(doc, path)? = value.clone();
            Ok(())
        }
        PatchOperation::Move { from, path } => {
            if from == path {
                return lookup(doc, from).map(drop);
            }
            if path.starts_with(&format!("{from}/")) {
                return Err(PatchError::MoveIntoChild {
                    from: from.clone(),
                    path: path.clone(),
                });
            }
            let value = remove(doc, from)?;
            add(doc, path, value)
        }
        PatchOperation::Copy { from, path } => {
            let value = lookup(doc, from)?.clone();
            add(doc, path, value)
        }
        PatchOperation::Test { path, value } => {
            if lookup(doc, path)? == value {
                Ok(())
            } else {
                Err(PatchError::TestFailed(path.clone()))
            }
        }
    }
}

fn check_pointer(path: &str) -> Result<(), PatchError> {
    if path.is_empty() || path.starts_with('/') {
        Ok(())
    } else {
        Err(PatchError::InvalidPointer(path.to_string()))
    }
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Result<&'a Value, PatchError> {
    check_pointer(path)?;
    doc.pointer(path)
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))
}

fn lookup_mut<'a>(
    doc: &'a mut Value,
    path: &str,
) -> Result<&'a mut Value, PatchError> {
    check_pointer(path)?;
    doc.pointer_mut(path)
        .ok_or_else(|| PatchError::PathNotFound(path.to_string()))
}

/// Splits a non-root pointer into its parent pointer and unescaped last
/// reference token.
fn split_pointer(path: &str) -> Result<(&str, String), PatchError> {
    check_pointer(path)?;
    let Some(idx) = path.rfind('/') else {
        return Err(PatchError::InvalidPointer(path.to_string()));
    };
    let token = path[idx + 1..].replace("~1", "/").replace("~0", "~");
    Ok((&path[..idx], token))
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn parse_index(token: &str, path: &str) -> Result<usize, PatchError> {
    let leading_zero = token.len() > 1 && token.starts_with('0');
    if token.is_empty()
        || leading_zero
        || !token.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(PatchError::InvalidIndex(path.to_string()));
    }
    token
        .parse()
        .map_err(|_| PatchError::InvalidIndex(path.to_string()))
}

fn add(doc: &mut Value, path: &str, value: Value) -> Result<(), PatchError> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) = split_pointer(path)?;
    match lookup_mut(doc, parent)? {
        Value::Object(fields) => {
            fields.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let idx = parse_index(&token, path)?;
            if idx > items.len() {
                return Err(PatchError::InvalidIndex(path.to_string()));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

fn remove(doc: &mut Value, path: &str) -> Result<Value, PatchError> {
    if path.is_empty() {
        return Err(PatchError::InvalidPointer(path.to_string()));
    }
    let (parent, token) = split_pointer(path)?;
    match lookup_mut(doc, parent)? {
        Value::Object(fields) => fields
            .remove(&token)
            .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
        Value::Array(items) => {
            let idx = parse_index(&token, path)?;
            if idx >= items.len() {
                return Err(PatchError::InvalidIndex(path.to_string()));
            }
            Ok(items.remove(idx))
        }
        _ => Err(PatchError::PathNotFound(path.to_string())),
    }
}

/// Builds a patch that turns `old` into `new`. Objects are compared field by
/// field, anything else is replaced whole.
pub fn diff(old: &Value, new: &Value) -> JsonPatch {
    let mut ops = Vec::new();
    diff_into(&mut ops, String::new(), old, new);
    JsonPatch(ops)
}

fn diff_into(
    ops: &mut Vec<PatchOperation>,
    path: String,
    old: &Value,
    new: &Value,
) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for (key, value) in before {
                let child = format!("{path}/{}", escape_token(key));
                match after.get(key) {
                    Some(next) => diff_into(ops, child, value, next),
                    None => ops.push(PatchOperation::Remove { path: child }),
                }
            }
            for (key, value) in after {
                if !before.contains_key(key) {
                    ops.push(PatchOperation::Add {
                        path: format!("{path}/{}", escape_token(key)),
                        value: value.clone(),
                    });
                }
            }
        }
        _ => ops.push(PatchOperation::Replace {
            path,
            value: new.clone(),
        }),
    }
}

/// Resolves a PATCH item against the current stored value, or the aspect's
/// default record when nothing is stored. The result goes through the same
/// construction path as a native upsert and carries change kind UPSERT.
pub fn resolve_patch(
    item: PatchItem,
    current: Option<&LatestAspect>,
) -> Result<UpsertItem, ItemError> {
    let (header, patch) = item.into_parts();
    let base = match current {
        Some(latest) => &latest.value,
        None => &header.aspect_spec().default_value,
    };
    let record = patch.apply(base)?;
    UpsertItem::from_header(header, ChangeKind::Upsert, record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(ops: Value) -> JsonPatch {
        JsonPatch::from_value(ops).unwrap()
    }

    #[test]
    fn applies_operations_in_order() {
        let base = json!({ "owners": [{ "id": "a" }], "removed": false });
        let out = patch(json!([
            { "op": "add", "path": "/owners/-", "value": { "id": "b" } },
            { "op": "replace", "path": "/removed", "value": true },
            { "op": "copy", "from": "/owners/0", "path": "/primary" },
            { "op": "move", "from": "/primary", "path": "/lead" },
            { "op": "test", "path": "/lead/id", "value": "a" },
            { "op": "remove", "path": "/owners/0" }
        ]))
        .apply(&base)
        .unwrap();
        assert_eq!(
            out,
            json!({ "owners": [{ "id": "b" }], "removed": true,
                    "lead": { "id": "a" } })
        );
        assert_eq!(base["removed"], json!(false));
    }

    #[test]
    fn escaped_tokens_address_keys() {
        let out = patch(json!([
            { "op": "add", "path": "/tags/a~1b", "value": 1 },
            { "op": "add", "path": "/tags/c~0d", "value": 2 }
        ]))
        .apply(&json!({ "tags": {} }))
        .unwrap();
        assert_eq!(out, json!({ "tags": { "a/b": 1, "c~d": 2 } }));
    }

    #[test]
    fn failures_are_typed() {
        let base = json!({ "list": [1, 2] });
        let cases = [
            (json!([{ "op": "remove", "path": "/missing" }]), "not exist"),
            (json!([{ "op": "add", "path": "/list/5", "value": 0 }]), "index"),
            (json!([{ "op": "add", "path": "/list/01", "value": 0 }]), "index"),
            (json!([{ "op": "test", "path": "/list/0", "value": 9 }]), "test"),
            (
                json!([{ "op": "replace", "path": "list", "value": 0 }]),
                "pointer",
            ),
            (
                json!([{ "op": "move", "from": "/list", "path": "/list/0" }]),
                "child",
            ),
        ];
        for (ops, needle) in cases {
            let err = patch(ops).apply(&base).unwrap_err();
            assert!(err.to_string().contains(needle), "{err}");
        }
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let err = JsonPatch::from_value(json!([{ "op": "merge", "path": "/" }]))
            .unwrap_err();
        assert!(matches!(err, PatchError::Malformed(_)));
        assert!(JsonPatch::from_value(json!({ "op": "add" })).is_err());
    }

    #[test]
    fn diff_round_trips() {
        let old = json!({
            "name": "orders",
            "tags": ["pii"],
            "owner": { "id": "a", "type": "DATAOWNER" },
            "dropped": 1
        });
        let new = json!({
            "name": "orders",
            "tags": ["pii", "gold"],
            "owner": { "id": "b", "type": "DATAOWNER" },
            "a/b": true
        });
        let ops = diff(&old, &new);
        assert_eq!(ops.apply(&old).unwrap(), new);
        assert!(diff(&new, &new).is_empty());
        let replaced = diff(&json!(1), &json!([1])).apply(&json!(1)).unwrap();
        assert_eq!(replaced, json!([1]));
    }
}
