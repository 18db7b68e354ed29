//! Attribute editing on descriptors
//!
//! Keys are dot-separated paths into the descriptor's serialized view
//! (`params.api_url`, `extra_params.auto_params.run`); a `§` inside a
//! segment stands for a literal dot. Edits keep the semantic type of the
//! value they replace.

use super::descriptor::Descriptor;
use serde_json::{Number, Value};
use thiserror::Error;

/// Sections of a descriptor that may be written
const WRITABLE_ROOTS: &[&str] = &["params", "extra_params"];

/// Errors from reading or editing an attribute
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("Command {0} not found")]
    UnknownCommand(String),

    #[error("Attribute {0} not found")]
    UnknownAttribute(String),

    #[error("Attribute {key} expects {expected}, got '{value}'")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("Registry unavailable: {0}")]
    Registry(String),
}

/// Split a dotted key into its segments
pub fn key_path(dotted: &str) -> Vec<String> {
    dotted.split('.').map(|s| s.replace('§', ".")).collect()
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(root, |node, segment| node.as_object_mut()?.get_mut(segment))
}

fn view(descriptor: &Descriptor) -> Result<Value, AttributeError> {
    serde_json::to_value(descriptor).map_err(|e| AttributeError::Registry(e.to_string()))
}

/// Read the value at `dotted` from any section of the descriptor
pub fn read_attribute(descriptor: &Descriptor, dotted: &str) -> Result<Value, AttributeError> {
    let view = view(descriptor)?;
    lookup(&view, &key_path(dotted))
        .cloned()
        .ok_or_else(|| AttributeError::UnknownAttribute(dotted.to_string()))
}

/// Replace the value at `dotted` with `raw`, parsed to the existing type
///
/// On error the descriptor is left untouched. Returns the stored value.
pub fn write_attribute(
    descriptor: &mut Descriptor,
    dotted: &str,
    raw: &str,
) -> Result<Value, AttributeError> {
    let path = key_path(dotted);
    let writable = path
        .first()
        .map(|root| WRITABLE_ROOTS.contains(&root.as_str()))
        .unwrap_or(false);
    if !writable || path.len() < 2 {
        return Err(AttributeError::UnknownAttribute(dotted.to_string()));
    }

    let mut view = view(descriptor)?;
    let slot = lookup_mut(&mut view, &path)
        .ok_or_else(|| AttributeError::UnknownAttribute(dotted.to_string()))?;
    let value = coerce(slot, raw, dotted)?;
    *slot = value.clone();

    // Typed fields (num_process, run, ...) get a second check here
    let updated: Descriptor =
        serde_json::from_value(view).map_err(|_| AttributeError::TypeMismatch {
            key: dotted.to_string(),
            expected: "a value accepted by this field",
            value: raw.to_string(),
        })?;
    *descriptor = updated;
    Ok(value)
}

/// Parse `raw` into the same semantic type as `existing`
pub fn coerce(existing: &Value, raw: &str, key: &str) -> Result<Value, AttributeError> {
    let mismatch = |expected: &'static str| AttributeError::TypeMismatch {
        key: key.to_string(),
        expected,
        value: raw.to_string(),
    };

    match existing {
        Value::Bool(_) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch("a boolean (true or false)")),
        },
        Value::Number(n) if n.is_f64() => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch("a floating-point number")),
        Value::Number(_) => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch("an integer")),
        Value::String(_) => Ok(Value::String(raw.to_string())),
        _ => Err(mismatch("a scalar attribute")),
    }
}

/// A parsed `cmd.key=value[|-s]` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditRequest {
    pub command: String,
    pub key: String,
    pub value: Option<String>,
    /// Only show the current value
    pub show: bool,
}

/// Parse the attribute-edit mini-language
///
/// Returns `None` when the text has no `command.key` part, or when an edit
/// (not a show) carries no `=value`.
pub fn parse_edit(message: &str) -> Option<EditRequest> {
    let message = message.trim();
    let (body, show) = match message.strip_suffix("|-s") {
        Some(body) => (body, true),
        None => (message, false),
    };

    let (path, value) = match body.split_once('=') {
        Some((path, value)) => (path.trim(), Some(value.to_string())),
        None if show => (body.trim(), None),
        None => return None,
    };

    let (command, key) = path.split_once('.')?;
    if command.is_empty() || key.is_empty() {
        return None;
    }

    Some(EditRequest {
        command: command.to_string(),
        key: key.to_string(),
        value,
        show,
    })
}
