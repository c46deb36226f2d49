//! # Field Resolver
//!
//! Turns raw row bindings into projected field values. Every rule is pure and
//! null-safe: a missing alias, a missing attribute or an undecodable value
//! resolves to [`FieldValue::Null`] instead of failing the view.

use crate::catalog::{AttrRef, FieldSpec, KeyPath, Rule, TextSource};
use crate::store::RawRow;
use crate::{FieldValue, ViewRecord, fold_case};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Why a decode rule produced no value. Never leaves this module.
#[derive(Debug, Error)]
enum DecodeError {
    #[error("attribute is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("decoded value is not an object or array")]
    NotComposite,

    #[error("key path '{0}' does not exist")]
    MissingPath(String),
}

/// Projects one raw row into a record, one value per declared field.
pub fn resolve_row(fields: &[FieldSpec], row: &RawRow) -> ViewRecord {
    ViewRecord {
        values: fields
            .iter()
            .map(|field| resolve_rule(&field.rule, row))
            .collect(),
    }
}

/// Resolves a single rule against a row.
pub fn resolve_rule(rule: &Rule, row: &RawRow) -> FieldValue {
    match rule {
        Rule::Passthrough(attr) => passthrough(attr, row),
        Rule::Decode { source, path } => decode(source, path, row),
        Rule::Coalesce(candidates) => candidates
            .iter()
            .map(|candidate| resolve_rule(candidate, row))
            .find(|value| !value.is_absent())
            .unwrap_or(FieldValue::Null),
        Rule::TextSet { sources, exclude } => text_set(sources, exclude.as_deref(), row),
        Rule::Label { alias, candidates } => row
            .node(alias)
            .and_then(|node| candidates.discriminate(&node.labels))
            .map(|label| FieldValue::Scalar(Value::String(label.to_string())))
            .unwrap_or(FieldValue::Null),
    }
}

fn passthrough(attr: &AttrRef, row: &RawRow) -> FieldValue {
    row.attribute(&attr.alias, &attr.attribute)
        .cloned()
        .map(FieldValue::from)
        .unwrap_or(FieldValue::Null)
}

fn decode(source: &AttrRef, path: &KeyPath, row: &RawRow) -> FieldValue {
    let Some(raw) = row.attribute(&source.alias, &source.attribute) else {
        return FieldValue::Null;
    };

    match decode_value(raw, path) {
        Ok(value) => FieldValue::from(value),
        Err(e) => {
            debug!(
                "Could not decode {}.{} at '{}': {}",
                source.alias, source.attribute, path, e
            );
            FieldValue::Null
        }
    }
}

/// Accepts either a JSON-encoded string or an already structured value.
fn decode_value(raw: &Value, path: &KeyPath) -> Result<Value, DecodeError> {
    let parsed;
    let root = match raw {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text)?;
            &parsed
        }
        other => other,
    };
    if !(root.is_object() || root.is_array()) {
        return Err(DecodeError::NotComposite);
    }

    let mut current = root;
    for segment in path.segments() {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| DecodeError::MissingPath(path.to_string()))?;
    }
    Ok(current.clone())
}

fn text_set(sources: &[TextSource], exclude: Option<&str>, row: &RawRow) -> FieldValue {
    let mut values = Vec::new();
    for source in sources {
        match source {
            TextSource::Attribute(attr) => match row.attribute(&attr.alias, &attr.attribute) {
                Some(Value::String(text)) => values.push(text.as_str()),
                Some(Value::Array(items)) => {
                    values.extend(items.iter().filter_map(Value::as_str));
                }
                _ => {}
            },
            TextSource::Literal(literals) => values.extend(literals.iter().map(String::as_str)),
        }
    }

    let exclude = exclude.map(fold_case);
    let set: BTreeSet<String> = values
        .into_iter()
        .map(fold_case)
        .filter(|value| exclude.as_deref() != Some(value.as_str()))
        .collect();
    FieldValue::TextSet(set)
}
