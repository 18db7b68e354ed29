//! Command registry
//!
//! This module handles:
//! - Building the command table from configuration at startup
//! - Lock-free reads (`get`, `snapshot`) that may precede an in-flight write
//! - Read-modify-write under the single registry-wide lock (`with_lock`)
//! - Attribute edits that keep the stored value's type
//!
//! The table lives in the main process. Worker processes hold a `Registry`
//! of the remote flavour, which forwards every operation to their session
//! over the worker pipe.

use super::attribute::{self, AttributeError};
use super::descriptor::{CommandKind, Descriptor};
use super::factory::{Catalog, ResolutionError};
use crate::config::BotConfig;
use crate::worker::RemoteRegistry;
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

/// Command name -> descriptor, in registration order
pub type CommandTable = IndexMap<String, Descriptor>;

/// Errors raised while building the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("Command '{name}' is defined in both {first} and {second}")]
    DuplicateCommand {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("Auto command '{0}' has no extra_params.auto_params")]
    MissingAutoParams(String),
}

/// Entries written or removed inside one locked section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    pub upserts: Vec<(String, Descriptor)>,
    pub removed: Vec<String>,
}

impl TableChanges {
    /// Diff two versions of the table
    pub fn between(before: &CommandTable, after: &CommandTable) -> Self {
        let upserts = after
            .iter()
            .filter(|(name, descriptor)| before.get(*name) != Some(*descriptor))
            .map(|(name, descriptor)| (name.clone(), descriptor.clone()))
            .collect();
        let removed = before
            .keys()
            .filter(|name| !after.contains_key(*name))
            .cloned()
            .collect();
        Self { upserts, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removed.is_empty()
    }

    pub fn apply_to(self, table: &mut CommandTable) {
        for name in &self.removed {
            table.shift_remove(name);
        }
        for (name, descriptor) in self.upserts {
            table.insert(name, descriptor);
        }
    }
}

/// The table itself, owned by the main process
#[derive(Debug, Default)]
pub struct SharedTable {
    table: RwLock<CommandTable>,
    /// Registry-wide read-modify-write lock
    lock: Arc<Mutex<()>>,
}

impl SharedTable {
    pub fn new(table: CommandTable) -> Self {
        Self {
            table: RwLock::new(table),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Descriptor> {
        self.table.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> CommandTable {
        self.table.read().await.clone()
    }

    /// Take the registry-wide lock; it is released when the guard drops
    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }

    /// Apply changes made elsewhere; the caller holds the lock
    pub async fn apply(&self, changes: TableChanges) {
        changes.apply_to(&mut *self.table.write().await);
    }

    async fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut CommandTable) -> R,
    {
        let _guard = self.acquire().await;
        let mut table = self.table.write().await;
        f(&mut table)
    }
}

#[derive(Clone)]
enum Backend {
    Shared(Arc<SharedTable>),
    Remote(Arc<RemoteRegistry>),
}

/// Handle to the command registry, local or forwarded
#[derive(Clone)]
pub struct Registry {
    backend: Backend,
}

impl Registry {
    /// Registry over a table owned by this process
    pub fn shared(table: CommandTable) -> Self {
        Self {
            backend: Backend::Shared(Arc::new(SharedTable::new(table))),
        }
    }

    /// Registry forwarded to the main process over the worker pipe
    pub fn remote(link: Arc<RemoteRegistry>) -> Self {
        Self {
            backend: Backend::Remote(link),
        }
    }

    /// Resolve and register every configured command
    ///
    /// Any unknown target or duplicate name aborts the whole build.
    pub fn from_config(config: &BotConfig, catalog: &Catalog) -> Result<Self, RegistryError> {
        let mut table = CommandTable::new();
        let mut kinds: IndexMap<String, CommandKind> = IndexMap::new();

        for kind in CommandKind::ALL {
            for (name, command_config) in config.commands(kind) {
                if let Some(first) = kinds.get(name) {
                    return Err(RegistryError::DuplicateCommand {
                        name: name.clone(),
                        first: first.table_name(),
                        second: kind.table_name(),
                    });
                }

                let resolved = catalog.resolve(name, command_config)?;
                if kind == CommandKind::Auto && resolved.extra_params.auto_params.is_none() {
                    return Err(RegistryError::MissingAutoParams(name.clone()));
                }

                let descriptor = Descriptor::new(
                    kind,
                    command_config.target.clone(),
                    resolved.params,
                    resolved.extra_params,
                );
                info!("Registered {:?} command '{}' -> {}", kind, name, descriptor.target);
                kinds.insert(name.clone(), kind);
                table.insert(name.clone(), descriptor);
            }
        }

        Ok(Self::shared(table))
    }

    /// The locally owned table, if this is the main process
    pub fn shared_table(&self) -> Option<Arc<SharedTable>> {
        match &self.backend {
            Backend::Shared(shared) => Some(shared.clone()),
            Backend::Remote(_) => None,
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Descriptor>> {
        match &self.backend {
            Backend::Shared(shared) => Ok(shared.get(name).await),
            Backend::Remote(remote) => remote.get(name).await,
        }
    }

    pub async fn snapshot(&self) -> Result<CommandTable> {
        match &self.backend {
            Backend::Shared(shared) => Ok(shared.snapshot().await),
            Backend::Remote(remote) => remote.snapshot().await,
        }
    }

    pub async fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.get(name).await?.is_some())
    }

    /// Run `f` on the table while holding the registry-wide lock
    ///
    /// The lock is released on every exit path; a worker that dies while
    /// holding it has it released by its session when the pipe closes.
    pub async fn with_lock<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut CommandTable) -> R + Send,
        R: Send,
    {
        match &self.backend {
            Backend::Shared(shared) => Ok(shared.with_lock(f).await),
            Backend::Remote(remote) => {
                let mut table = remote.lock().await?;
                let before = table.clone();
                let result = f(&mut table);
                remote.unlock(TableChanges::between(&before, &table)).await?;
                Ok(result)
            }
        }
    }

    /// Edit one attribute of a command, keeping its type
    pub async fn set_attribute(
        &self,
        command: &str,
        dotted_key: &str,
        value: &str,
    ) -> Result<Value, AttributeError> {
        self.with_lock(|table| match table.get_mut(command) {
            Some(descriptor) => attribute::write_attribute(descriptor, dotted_key, value),
            None => Err(AttributeError::UnknownCommand(command.to_string())),
        })
        .await
        .map_err(|e| AttributeError::Registry(format!("{:#}", e)))?
    }

    /// Read one attribute of a command from any section
    pub async fn show_attribute(&self, command: &str, dotted_key: &str) -> Result<Value, AttributeError> {
        let descriptor = self
            .get(command)
            .await
            .map_err(|e| AttributeError::Registry(format!("{:#}", e)))?
            .ok_or_else(|| AttributeError::UnknownCommand(command.to_string()))?;
        attribute::read_attribute(&descriptor, dotted_key)
    }
}
