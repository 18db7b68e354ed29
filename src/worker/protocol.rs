//! Messages exchanged over a worker's stdio pipes
//!
//! The orchestrator writes one `WorkerJob` frame, then answers
//! `RegistryRequest` frames with `RegistryResponse` frames until the worker
//! closes its stdout. Frames use the shared length-prefixed codec.

use crate::command::{CallContext, CommandTable, Descriptor, TableChanges};
use crate::config::BotSettings;
use anyhow::{Context, Result};
use onebot_shared::codec::{self, FrameDecoder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// What a worker process is started to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerTask {
    /// Run a command for an inbound message and send its reply
    Manual { context: CallContext },
    /// One scheduled run of an Auto command
    Auto { cmd_name: String },
}

impl WorkerTask {
    pub fn cmd_name(&self) -> &str {
        match self {
            WorkerTask::Manual { context } => &context.cmd_name,
            WorkerTask::Auto { cmd_name } => cmd_name,
        }
    }
}

/// First frame a worker receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub worker_id: u64,
    pub settings: BotSettings,
    pub task: WorkerTask,
}

/// Registry operations a worker forwards to its session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryRequest {
    Get { name: String },
    Snapshot,
    /// Take the registry-wide lock and return the table as seen under it
    Lock,
    /// Apply the changes made under the lock and release it
    Unlock { changes: TableChanges },
    /// Kill every other live worker
    KillWorkers,
}

/// Session answers, one per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryResponse {
    Descriptor(Option<Descriptor>),
    Table(CommandTable),
    Unlocked,
    Killed(usize),
    Error(String),
}

/// Read the next frame; `Ok(None)` once the peer closed the pipe
pub async fn read_frame<R, T>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut buf = [0u8; 8192];
    loop {
        if let Some(message) = decoder.decode_next()? {
            return Ok(Some(message));
        }
        let n = reader.read(&mut buf).await.context("Failed to read worker pipe")?;
        if n == 0 {
            return Ok(None);
        }
        decoder.extend(&buf[..n]);
    }
}

/// Write one frame and flush it
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = codec::encode(message)?;
    writer
        .write_all(&frame)
        .await
        .context("Failed to write worker pipe")?;
    writer.flush().await.context("Failed to flush worker pipe")?;
    Ok(())
}
