//! Worker launching and the pool of live workers

use super::protocol::{WorkerJob, WorkerTask};
use super::session;
use crate::command::SharedTable;
use crate::config::BotSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::debug;

/// Starts isolated command executions
///
/// `launch` returns once the execution is started and never waits for it,
/// so it may be called while the registry lock is held.
pub trait Launcher: Send + Sync {
    fn launch(&self, task: WorkerTask) -> Result<()>;
}

/// Operator control over live workers
#[async_trait]
pub trait WorkerControl: Send + Sync {
    /// Kill every other live worker; returns how many were signalled
    async fn kill_workers(&self) -> Result<usize>;
}

struct WorkerEntry {
    cmd_name: String,
    kill: Arc<Notify>,
}

/// Live worker processes, keyed by worker id
#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<HashMap<u64, WorkerEntry>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new worker; returns its id and kill signal
    pub fn register(&self, cmd_name: &str) -> (u64, Arc<Notify>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let kill = Arc::new(Notify::new());
        if let Ok(mut workers) = self.workers.lock() {
            workers.insert(
                id,
                WorkerEntry {
                    cmd_name: cmd_name.to_string(),
                    kill: kill.clone(),
                },
            );
        }
        (id, kill)
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut workers) = self.workers.lock() {
            workers.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Signal every worker except `except` to be killed
    pub fn kill_all_except(&self, except: Option<u64>) -> usize {
        let Ok(workers) = self.workers.lock() else {
            return 0;
        };
        let mut killed = 0;
        for (id, entry) in workers.iter() {
            if Some(*id) == except {
                continue;
            }
            debug!("Killing worker {} ({})", id, entry.cmd_name);
            entry.kill.notify_one();
            killed += 1;
        }
        killed
    }
}

/// Runs each task in a fresh process of this binary
pub struct ProcessLauncher {
    exe: PathBuf,
    debug: bool,
    settings: BotSettings,
    registry: Arc<SharedTable>,
    pool: Arc<WorkerPool>,
}

impl ProcessLauncher {
    /// Launcher re-executing the current binary with the `worker` subcommand
    pub fn new(settings: BotSettings, registry: Arc<SharedTable>, debug: bool) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self {
            exe,
            debug,
            settings,
            registry,
            pool: Arc::new(WorkerPool::new()),
        })
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, task: WorkerTask) -> Result<()> {
        let mut command = tokio::process::Command::new(&self.exe);
        command.arg("worker");
        if self.debug {
            command.arg("--debug");
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let child = command
            .spawn()
            .with_context(|| format!("Failed to start worker for '{}'", task.cmd_name()))?;

        let (worker_id, kill) = self.pool.register(task.cmd_name());
        debug!(
            "Started worker {} (pid {:?}) for '{}', {} live",
            worker_id,
            child.id(),
            task.cmd_name(),
            self.pool.len()
        );

        let job = WorkerJob {
            worker_id,
            settings: self.settings.clone(),
            task,
        };
        tokio::spawn(session::serve(
            child,
            job,
            self.registry.clone(),
            self.pool.clone(),
            kill,
        ));
        Ok(())
    }
}

#[async_trait]
impl WorkerControl for ProcessLauncher {
    async fn kill_workers(&self) -> Result<usize> {
        Ok(self.pool.kill_all_except(None))
    }
}
