//! Keeping server-owned JSON fields across typed round trips.
//!
//! Deserializing server JSON into a Rust type drops every field the type does
//! not declare. Serializing the type again ("lossy JSON") and sending it back
//! would erase those fields on the server. [`JsonReconciler`] records the
//! difference between the lossy JSON and the original as a [`Patch`] and
//! later replays it on top of the (possibly modified) typed value.
//!
//! Replay applies the operations one by one in capture order. An operation
//! whose path no longer exists is skipped and logged; the others still
//! apply. No dependency analysis is done between operations.
//!
//! Captured `remove` and `replace` operations are guarded by a `test` of the
//! value the typed side produced at capture time. If the value was changed
//! since, the guard fails and the change is kept.
//!
//! # Examples
//!
//! ```
//! use restkeep::Reconciled;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Item {
//!     name: String,
//! }
//!
//! # fn example() -> Result<(), restkeep::Error> {
//! let original = r#"{"name":"bolt","revision":12,"owner":{"id":7}}"#;
//! let mut item = Reconciled::<Item>::from_json(original)?;
//! item.name = "nut".to_string();
//!
//! let updated: serde_json::Value = serde_json::from_str(&item.to_json()?).unwrap();
//! assert_eq!(updated, serde_json::json!({ "name": "nut", "revision": 12, "owner": { "id": 7 } }));
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::{Deref, DerefMut};

/// One structural edit, in JSON Patch form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    /// Succeeds only if the value at `path` equals `value`.
    Test { path: String, value: Value },
}

impl PatchOperation {
    /// The JSON Pointer this operation targets.
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Test { path, .. } => path,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PatchOperation::Add { .. } => "add",
            PatchOperation::Remove { .. } => "remove",
            PatchOperation::Replace { .. } => "replace",
            PatchOperation::Test { .. } => "test",
        }
    }

    /// Applies this operation to `document` in place.
    ///
    /// On error `document` is left unchanged.
    pub fn apply(&self, document: &mut Value) -> std::result::Result<(), PatchError> {
        let path = self.path();
        let mut tokens = parse_pointer(path)?;
        if let PatchOperation::Test { value, .. } = self {
            let current = resolve_mut(document, &tokens, path)?;
            return if *current == *value {
                Ok(())
            } else {
                Err(PatchError::TestFailed(path.to_string()))
            };
        }
        let Some(last) = tokens.pop() else {
            return match self {
                PatchOperation::Add { value, .. } | PatchOperation::Replace { value, .. } => {
                    *document = value.clone();
                    Ok(())
                }
                PatchOperation::Remove { .. } | PatchOperation::Test { .. } => {
                    Err(PatchError::InvalidPointer(path.to_string()))
                }
            };
        };

        let parent = resolve_mut(document, &tokens, path)?;
        match (self, parent) {
            (PatchOperation::Add { value, .. }, Value::Object(map)) => {
                map.insert(last, value.clone());
                Ok(())
            }
            (PatchOperation::Add { value, .. }, Value::Array(items)) => {
                if last == "-" {
                    items.push(value.clone());
                    return Ok(());
                }
                let index = parse_index(&last, path)?;
                if index > items.len() {
                    return Err(PatchError::IndexOutOfBounds {
                        path: path.to_string(),
                        index,
                        len: items.len(),
                    });
                }
                items.insert(index, value.clone());
                Ok(())
            }
            (PatchOperation::Remove { .. }, Value::Object(map)) => map
                .remove(&last)
                .map(|_| ())
                .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
            (PatchOperation::Remove { .. }, Value::Array(items)) => {
                let index = existing_index(&last, items.len(), path)?;
                items.remove(index);
                Ok(())
            }
            (PatchOperation::Replace { value, .. }, Value::Object(map)) => {
                let slot = map
                    .get_mut(&last)
                    .ok_or_else(|| PatchError::PathNotFound(path.to_string()))?;
                *slot = value.clone();
                Ok(())
            }
            (PatchOperation::Replace { value, .. }, Value::Array(items)) => {
                let index = existing_index(&last, items.len(), path)?;
                items[index] = value.clone();
                Ok(())
            }
            (_, _) => Err(PatchError::NotAContainer(path.to_string())),
        }
    }
}

/// Why a patch operation could not be applied.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("invalid JSON pointer `{0}`")]
    InvalidPointer(String),
    #[error("path `{0}` does not exist")]
    PathNotFound(String),
    #[error("index {index} out of bounds at `{path}` (length {len})")]
    IndexOutOfBounds {
        path: String,
        index: usize,
        len: usize,
    },
    #[error("cannot address into a scalar at `{0}`")]
    NotAContainer(String),
    #[error("value at `{0}` changed since capture")]
    TestFailed(String),
}

fn parse_pointer(pointer: &str) -> std::result::Result<Vec<String>, PatchError> {
    if pointer.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = pointer.strip_prefix('/') else {
        return Err(PatchError::InvalidPointer(pointer.to_string()));
    };
    Ok(rest
        .split('/')
        .map(|token| token.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn parse_index(token: &str, path: &str) -> std::result::Result<usize, PatchError> {
    let well_formed = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !well_formed {
        return Err(PatchError::PathNotFound(path.to_string()));
    }
    token
        .parse()
        .map_err(|_| PatchError::PathNotFound(path.to_string()))
}

fn existing_index(token: &str, len: usize, path: &str) -> std::result::Result<usize, PatchError> {
    let index = parse_index(token, path)?;
    if index >= len {
        return Err(PatchError::IndexOutOfBounds {
            path: path.to_string(),
            index,
            len,
        });
    }
    Ok(index)
}

fn resolve_mut<'a>(
    document: &'a mut Value,
    tokens: &[String],
    path: &str,
) -> std::result::Result<&'a mut Value, PatchError> {
    tokens
        .iter()
        .try_fold(document, |target, token| match target {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| PatchError::PathNotFound(path.to_string())),
            Value::Array(items) => {
                let index = existing_index(token, items.len(), path)?;
                Ok(&mut items[index])
            }
            _ => Err(PatchError::NotAContainer(path.to_string())),
        })
}

/// An ordered list of independent patch operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch(Vec<PatchOperation>);

impl Patch {
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self(operations)
    }

    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchOperation> {
        self.0.iter()
    }

    /// Applies every operation, all or nothing.
    ///
    /// On error `document` is left unchanged.
    pub fn apply(&self, document: &mut Value) -> std::result::Result<(), PatchError> {
        let mut working = document.clone();
        for operation in &self.0 {
            operation.apply(&mut working)?;
        }
        *document = working;
        Ok(())
    }

    /// Splits the patch into replay steps, in order.
    ///
    /// Each step is one operation together with the `test` operations right
    /// before it, paired with the position of that operation. A step applies
    /// all or nothing.
    pub fn steps(&self) -> Vec<(usize, Patch)> {
        let mut steps = Vec::new();
        let mut guards = Vec::new();
        for (index, operation) in self.0.iter().enumerate() {
            guards.push(operation.clone());
            if !matches!(operation, PatchOperation::Test { .. }) {
                steps.push((index, Patch(std::mem::take(&mut guards))));
            }
        }
        if !guards.is_empty() {
            steps.push((self.0.len() - 1, Patch(guards)));
        }
        steps
    }
}

impl IntoIterator for Patch {
    type Item = PatchOperation;
    type IntoIter = std::vec::IntoIter<PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Patch {
    type Item = &'a PatchOperation;
    type IntoIter = std::slice::Iter<'a, PatchOperation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Computes the operations that turn `from` into `to`.
///
/// Objects are compared key by key: keys only in `from` are removed, keys only
/// in `to` are added, shared keys are compared recursively. Arrays are
/// compared by index: the shared prefix recursively, surplus elements removed
/// from the end, missing ones appended. Anything else that differs is replaced.
pub fn diff(from: &Value, to: &Value) -> Patch {
    let mut operations = Vec::new();
    diff_into("", from, to, false, &mut operations);
    Patch(operations)
}

/// Like [`diff`], with every `remove` and `replace` preceded by a `test` of
/// the value it expects to find in `from`.
pub fn guarded_diff(from: &Value, to: &Value) -> Patch {
    let mut operations = Vec::new();
    diff_into("", from, to, true, &mut operations);
    Patch(operations)
}

fn push_guard(guarded: bool, path: &str, expected: &Value, operations: &mut Vec<PatchOperation>) {
    if guarded {
        operations.push(PatchOperation::Test {
            path: path.to_string(),
            value: expected.clone(),
        });
    }
}

fn diff_into(
    path: &str,
    from: &Value,
    to: &Value,
    guarded: bool,
    operations: &mut Vec<PatchOperation>,
) {
    if from == to {
        return;
    }
    match (from, to) {
        (Value::Object(source), Value::Object(target)) => {
            for (key, source_value) in source {
                let child = format!("{}/{}", path, escape_token(key));
                match target.get(key) {
                    Some(target_value) => {
                        diff_into(&child, source_value, target_value, guarded, operations)
                    }
                    None => {
                        push_guard(guarded, &child, source_value, operations);
                        operations.push(PatchOperation::Remove { path: child });
                    }
                }
            }
            for (key, target_value) in target {
                if !source.contains_key(key) {
                    operations.push(PatchOperation::Add {
                        path: format!("{}/{}", path, escape_token(key)),
                        value: target_value.clone(),
                    });
                }
            }
        }
        (Value::Array(source), Value::Array(target)) => {
            let shared = source.len().min(target.len());
            for index in 0..shared {
                diff_into(
                    &format!("{}/{}", path, index),
                    &source[index],
                    &target[index],
                    guarded,
                    operations,
                );
            }
            for index in (shared..source.len()).rev() {
                let child = format!("{}/{}", path, index);
                push_guard(guarded, &child, &source[index], operations);
                operations.push(PatchOperation::Remove { path: child });
            }
            for (index, value) in target.iter().enumerate().skip(shared) {
                operations.push(PatchOperation::Add {
                    path: format!("{}/{}", path, index),
                    value: value.clone(),
                });
            }
        }
        _ => {
            push_guard(guarded, path, from, operations);
            operations.push(PatchOperation::Replace {
                path: path.to_string(),
                value: to.clone(),
            });
        }
    }
}

/// A patch operation that could not be replayed.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedOperation {
    /// Position of the operation in the captured patch.
    pub index: usize,
    pub operation: PatchOperation,
    pub error: PatchError,
}

/// The result of a replay: the reconciled document and what was skipped.
#[derive(Debug, Clone)]
pub struct Replay {
    pub json: String,
    pub skipped: Vec<SkippedOperation>,
}

/// Captures and replays the fields a typed value loses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonReconciler {
    patch: Patch,
}

impl JsonReconciler {
    /// Records what `typed` loses compared to `original_json`.
    ///
    /// # Errors
    ///
    /// Fails if `typed` cannot be serialized or `original_json` is not JSON.
    pub fn compute_patch<T>(typed: &T, original_json: &str) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let lossy = to_tree(typed)?;
        let original: Value = serde_json::from_str(original_json)
            .map_err(|e| Error::Reconciliation(format!("Original JSON is invalid: {}", e)))?;
        let patch = guarded_diff(&lossy, &original);
        tracing::debug!(operations = patch.len(), "Captured reconciliation patch");
        Ok(Self { patch })
    }

    pub fn from_patch(patch: Patch) -> Self {
        Self { patch }
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    /// Serializes `typed` and replays the captured patch on top of it.
    ///
    /// # Errors
    ///
    /// Fails only if `typed` cannot be serialized; operations that no longer
    /// apply are skipped.
    pub fn apply_patch<T>(&self, typed: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        self.apply_patch_with_report(typed).map(|replay| replay.json)
    }

    /// Like [`apply_patch`](Self::apply_patch), also reporting skipped operations.
    pub fn apply_patch_with_report<T>(&self, typed: &T) -> Result<Replay>
    where
        T: Serialize + ?Sized,
    {
        let (document, skipped) = self.reconcile_value(to_tree(typed)?);
        let json = serde_json::to_string(&document)
            .map_err(|e| Error::SerializationFailed(e.to_string()))?;
        Ok(Replay { json, skipped })
    }

    /// Replays the patch on an already-serialized tree.
    pub fn reconcile_value(&self, mut document: Value) -> (Value, Vec<SkippedOperation>) {
        let mut skipped = Vec::new();
        for (index, step) in self.patch.steps() {
            if let Err(error) = step.apply(&mut document) {
                let operation = self.patch.0[index].clone();
                if let PatchError::TestFailed(_) = error {
                    tracing::debug!(
                        op = operation.name(),
                        path = operation.path(),
                        "Keeping value changed since capture"
                    );
                } else {
                    tracing::warn!(
                        op = operation.name(),
                        path = operation.path(),
                        error = %error,
                        "Skipping reconciliation operation"
                    );
                }
                skipped.push(SkippedOperation {
                    index,
                    operation,
                    error,
                });
            }
        }
        (document, skipped)
    }
}

fn to_tree<T: Serialize + ?Sized>(typed: &T) -> Result<Value> {
    serde_json::to_value(typed).map_err(|e| Error::SerializationFailed(e.to_string()))
}

/// A typed value that remembers the server JSON it came from.
///
/// Dereferences to the inner value; [`to_json`](Self::to_json) produces the
/// JSON to send back, with undeclared server fields restored.
#[derive(Debug, Clone)]
pub struct Reconciled<T> {
    value: T,
    reconciler: JsonReconciler,
}

impl<T> Reconciled<T>
where
    T: Serialize,
{
    /// Wraps `value`, capturing what it lost from `original_json`.
    pub fn new(value: T, original_json: &str) -> Result<Self> {
        let reconciler = JsonReconciler::compute_patch(&value, original_json)?;
        Ok(Self { value, reconciler })
    }

    /// Deserializes `json` into `T` and captures the lost fields.
    pub fn from_json(json: &str) -> Result<Self>
    where
        T: DeserializeOwned,
    {
        let value = serde_json::from_str(json)
            .map_err(|e| Error::Reconciliation(format!("JSON does not match the type: {}", e)))?;
        Self::new(value, json)
    }

    pub fn to_json(&self) -> Result<String> {
        self.reconciler.apply_patch(&self.value)
    }

    pub fn to_json_with_report(&self) -> Result<Replay> {
        self.reconciler.apply_patch_with_report(&self.value)
    }

    pub fn reconciler(&self) -> &JsonReconciler {
        &self.reconciler
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Reconciled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Reconciled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
