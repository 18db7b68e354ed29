//! Parameter resolution
//!
//! Builds the argument set of one invocation from, in increasing priority:
//! the call context, the command's static params with borrowed shared
//! params, and its free extra params. The result is filtered down to what
//! the target declares.

use super::descriptor::{ChatTurn, Params};
use super::registry::CommandTable;
use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Per-call information supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallContext {
    pub cmd_name: String,
    /// Payload after the command prefix
    pub message: String,
    pub message_type: String,
    pub sender_id: i64,
    pub target_id: i64,
    pub message_id: i64,
}

impl CallContext {
    /// Context of a scheduler or drain invocation: empty payload, no sender
    pub fn unattended(cmd_name: &str, message_type: &str, target_id: i64) -> Self {
        Self {
            cmd_name: cmd_name.to_string(),
            message: String::new(),
            message_type: message_type.to_string(),
            sender_id: 0,
            target_id,
            message_id: 0,
        }
    }

    fn entries(&self) -> [(&'static str, Value); 6] {
        [
            ("message", Value::from(self.message.clone())),
            ("message_type", Value::from(self.message_type.clone())),
            ("cmd_name", Value::from(self.cmd_name.clone())),
            ("sender_id", Value::from(self.sender_id)),
            ("target_id", Value::from(self.target_id)),
            ("message_id", Value::from(self.message_id)),
        ]
    }
}

/// Errors that skip an invocation before the body runs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("Command '{0}' is not registered")]
    UnknownCommand(String),

    #[error("Command '{borrower}' borrows '{param}' from '{owner}', which does not have it")]
    SharedParamMissing {
        borrower: String,
        owner: String,
        param: String,
    },
}

/// The resolved arguments handed to a command body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamBag(IndexMap<String, Value>);

impl ParamBag {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Required string argument
    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("missing string parameter '{}'", name))
    }

    pub fn str_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).and_then(Value::as_str).unwrap_or(default)
    }

    /// Required integer argument; numeric strings are accepted
    pub fn i64(&self, name: &str) -> Result<i64> {
        match self.get(name) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| anyhow!("parameter '{}' is out of range", name)),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .with_context(|| format!("parameter '{}' is not an integer", name)),
            _ => Err(anyhow!("missing integer parameter '{}'", name)),
        }
    }

    pub fn i64_or(&self, name: &str, default: i64) -> i64 {
        if self.contains(name) {
            self.i64(name).unwrap_or(default)
        } else {
            default
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.get(name).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Deserialize an argument into a typed value
    pub fn parse<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("missing parameter '{}'", name))?;
        serde_json::from_value(value).with_context(|| format!("parameter '{}' is malformed", name))
    }

    /// Optional list of conversation turns
    pub fn turns(&self, name: &str) -> Result<Vec<ChatTurn>> {
        if self.contains(name) {
            self.parse(name)
        } else {
            Ok(Vec::new())
        }
    }
}

impl FromIterator<(String, Value)> for ParamBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Merge static params, shared params and free extras of `ctx.cmd_name`
pub fn merged_params(table: &CommandTable, cmd_name: &str) -> Result<Params, ResolveError> {
    let descriptor = table
        .get(cmd_name)
        .ok_or_else(|| ResolveError::UnknownCommand(cmd_name.to_string()))?;

    let mut merged = descriptor.params.clone();

    for (owner, names) in &descriptor.extra_params.shared_params {
        for name in names {
            let value = table
                .get(owner)
                .and_then(|d| d.params.get(name))
                .ok_or_else(|| ResolveError::SharedParamMissing {
                    borrower: cmd_name.to_string(),
                    owner: owner.clone(),
                    param: name.clone(),
                })?;
            merged.insert(name.clone(), value.clone());
        }
    }

    for (name, value) in &descriptor.extra_params.extra {
        merged.insert(name.clone(), value.clone());
    }

    Ok(merged)
}

/// Build the argument bag for one invocation
///
/// Configured params win over context names of the same name; the result
/// holds exactly the declared names that have a value.
pub fn resolve(
    table: &CommandTable,
    ctx: &CallContext,
    declared: &[&str],
) -> Result<ParamBag, ResolveError> {
    let merged = merged_params(table, &ctx.cmd_name)?;

    let mut all: IndexMap<String, Value> = ctx
        .entries()
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    all.extend(merged);

    Ok(all
        .into_iter()
        .filter(|(name, _)| declared.contains(&name.as_str()))
        .collect())
}
