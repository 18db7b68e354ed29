//! Command factory - resolves configured targets against the catalog

use super::descriptor::{CommandConfig, ExtraParams, Params};
use super::handlers;
use super::resolver::ParamBag;
use crate::bot::BotHandle;
use anyhow::Result;
use async_trait::async_trait;
use onebot_shared::Reply;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// What a command body hands back
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    /// A value sent with the command's default reply kind
    Bare(String),
    /// A reply whose parts carry their own kinds
    Typed(Reply),
}

impl CommandOutput {
    pub fn bare(value: impl Into<String>) -> Self {
        CommandOutput::Bare(value.into())
    }

    pub fn typed(value: impl Into<String>, kind: impl Into<String>) -> Self {
        CommandOutput::Typed(Reply::new(value, kind))
    }

    /// Build the reply, using `default_kind` for bare values
    pub fn into_reply(self, default_kind: &str) -> Reply {
        match self {
            CommandOutput::Bare(value) => Reply::new(value, default_kind),
            CommandOutput::Typed(reply) => reply,
        }
    }
}

/// A capability a configured command can target
#[async_trait]
pub trait Command: Send + Sync {
    /// Parameter names this command accepts from the resolved bag
    fn declared_params(&self) -> &'static [&'static str];

    /// Run the command body
    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>>;
}

/// Errors raised while resolving a configured target
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Command '{command}' targets unknown capability '{target}'")]
    UnknownTarget { command: String, target: String },
}

/// A configured command resolved against the catalog
pub struct Resolved {
    pub params: Params,
    pub extra_params: ExtraParams,
}

/// Static map of target identifiers to command implementations
#[derive(Clone, Default)]
pub struct Catalog {
    entries: HashMap<String, Arc<dyn Command>>,
}

impl Catalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog of every built-in command
    pub fn builtin() -> Self {
        handlers::builtin()
            .into_iter()
            .fold(Self::new(), |catalog, (id, command)| catalog.with(id, command))
    }

    /// Add or replace an entry
    pub fn with(mut self, id: &str, command: Arc<dyn Command>) -> Self {
        self.entries.insert(id.to_string(), command);
        self
    }

    pub fn get(&self, target: &str) -> Option<Arc<dyn Command>> {
        self.entries.get(target).cloned()
    }

    /// Resolve the configured target of command `name`
    ///
    /// Configured names the target does not declare are warned about; they
    /// would be filtered out at call time.
    pub fn resolve(&self, name: &str, config: &CommandConfig) -> Result<Resolved, ResolutionError> {
        let command = self
            .get(&config.target)
            .ok_or_else(|| ResolutionError::UnknownTarget {
                command: name.to_string(),
                target: config.target.clone(),
            })?;

        let declared = command.declared_params();
        let configured = config.params.keys().chain(config.extra_params.extra.keys());
        for key in configured {
            // `type` is the reply kind, not an argument
            if key != "type" && !declared.contains(&key.as_str()) {
                warn!(
                    "Command '{}' configures '{}' which target '{}' does not accept",
                    name, key, config.target
                );
            }
        }

        Ok(Resolved {
            params: config.params.clone(),
            extra_params: config.extra_params.clone(),
        })
    }
}
