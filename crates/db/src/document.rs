//! Documents, query filters and update modifiers.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{StoreError, StoreResult};

/// A stored JSON object.
pub type Document = Map<String, Value>;

/// Primary key field present on every stored document.
pub const ID_FIELD: &str = "_id";

/// Renders an `_id` value as the key used for locking and duplicate checks.
pub(crate) fn id_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(Value),
    Gt(Value),
}

/// Conjunction of field predicates.
///
/// A document matches when every predicate holds. A predicate on a field the
/// document does not have never holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Predicate)>,
}

impl Filter {
    /// Filter matching every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching the document with the given `_id`.
    pub fn by_id(id: impl Into<Value>) -> Self {
        Self::new().eq(ID_FIELD, id)
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push((field.into(), Predicate::Eq(value.into())));
        self
    }

    /// Numbers compare numerically, strings lexicographically. Values of any
    /// other type, or of mismatched types, never compare greater.
    pub fn gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses
            .push((field.into(), Predicate::Gt(value.into())));
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|(field, predicate)| {
            let Some(actual) = document.get(field) else {
                return false;
            };
            match predicate {
                Predicate::Eq(expected) => actual == expected,
                Predicate::Gt(bound) => compare(actual, bound) == Some(Ordering::Greater),
            }
        })
    }

    /// Query-language rendering used in command events.
    pub fn to_value(&self) -> Value {
        let mut rendered = Map::new();
        for (field, predicate) in &self.clauses {
            let (operator, operand) = match predicate {
                Predicate::Eq(v) => ("$eq", v),
                Predicate::Gt(v) => ("$gt", v),
            };
            let entry = rendered
                .entry(field.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                ops.insert(operator.to_string(), operand.clone());
            }
        }
        Value::Object(rendered)
    }
}

fn compare(actual: &Value, bound: &Value) -> Option<Ordering> {
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Modifier {
    Inc(i64),
    Set(Value),
    Push(Value),
}

impl Modifier {
    fn operator(&self) -> &'static str {
        match self {
            Modifier::Inc(_) => "$inc",
            Modifier::Set(_) => "$set",
            Modifier::Push(_) => "$push",
        }
    }
}

/// Ordered list of field modifiers applied by `update_one`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    modifiers: Vec<(String, Modifier)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `delta` to an integer field; a missing field counts as zero.
    pub fn inc(mut self, field: impl Into<String>, delta: i64) -> Self {
        self.modifiers.push((field.into(), Modifier::Inc(delta)));
        self
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.modifiers
            .push((field.into(), Modifier::Set(value.into())));
        self
    }

    /// Appends to an array field, creating it when missing.
    pub fn push(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.modifiers
            .push((field.into(), Modifier::Push(value.into())));
        self
    }

    /// Applies every modifier in order and reports whether the document changed.
    ///
    /// Callers apply to a copy: on error the target may be partially modified.
    pub(crate) fn apply(&self, document: &mut Document) -> StoreResult<bool> {
        let mut modified = false;
        for (field, modifier) in &self.modifiers {
            if field == ID_FIELD {
                return Err(StoreError::InvalidUpdate {
                    field: field.clone(),
                    operator: modifier.operator(),
                });
            }
            let invalid = || StoreError::InvalidUpdate {
                field: field.clone(),
                operator: modifier.operator(),
            };
            match modifier {
                Modifier::Inc(delta) => {
                    let current = match document.get(field) {
                        None => None,
                        Some(value) => Some(value.as_i64().ok_or_else(invalid)?),
                    };
                    let next = current
                        .unwrap_or(0)
                        .checked_add(*delta)
                        .ok_or_else(invalid)?;
                    if current != Some(next) {
                        document.insert(field.clone(), Value::from(next));
                        modified = true;
                    }
                }
                Modifier::Set(value) => {
                    if document.get(field) != Some(value) {
                        document.insert(field.clone(), value.clone());
                        modified = true;
                    }
                }
                Modifier::Push(value) => {
                    let target = document
                        .entry(field.clone())
                        .or_insert_with(|| Value::Array(Vec::new()));
                    match target {
                        Value::Array(items) => {
                            items.push(value.clone());
                            modified = true;
                        }
                        _ => return Err(invalid()),
                    }
                }
            }
        }
        Ok(modified)
    }

    pub fn to_value(&self) -> Value {
        let mut rendered = Map::new();
        for (field, modifier) in &self.modifiers {
            let operand = match modifier {
                Modifier::Inc(delta) => json!(delta),
                Modifier::Set(value) | Modifier::Push(value) => value.clone(),
            };
            let entry = rendered
                .entry(modifier.operator().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(fields) = entry {
                fields.insert(field.clone(), operand);
            }
        }
        Value::Object(rendered)
    }
}

/// Outcome of `update_one`.
///
/// `modified_count` is zero whenever the filter excluded every document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}
