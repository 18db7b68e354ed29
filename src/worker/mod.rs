//! Isolated command workers
//!
//! This module handles:
//! - Launching workers as processes of this binary (`worker` subcommand)
//! - The parent-side session serving each worker's registry requests
//! - The worker-side entry point and its forwarded registry
//!
//! stdout of a worker carries the registry channel; its logs go to stderr.

mod launcher;
mod protocol;
mod remote;
mod session;

pub use launcher::{Launcher, ProcessLauncher, WorkerControl};
pub use protocol::WorkerTask;
pub use remote::RemoteRegistry;

use protocol::WorkerJob;

use crate::bot::BotHandle;
use crate::command::{Catalog, CommandExecutor, Registry};
use crate::transport::HttpTransport;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Entry point of a worker process
///
/// Reads the job from stdin, runs it with a registry forwarded to the main
/// process, and returns when the task is done.
pub async fn run_worker() -> Result<()> {
    let remote = Arc::new(RemoteRegistry::new(tokio::io::stdin(), tokio::io::stdout()));
    let job: WorkerJob = remote
        .receive()
        .await?
        .context("Main process closed the pipe before sending a job")?;
    debug!("Worker {} running '{}'", job.worker_id, job.task.cmd_name());

    let transport = Arc::new(HttpTransport::new(&job.settings.http_api_url)?);
    let bot = BotHandle::new(
        job.settings,
        Registry::remote(remote.clone()),
        Arc::new(Catalog::builtin()),
        transport,
        remote,
    )?;

    CommandExecutor::new(bot).run_task(job.task).await;
    Ok(())
}
