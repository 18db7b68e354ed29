//! Worker-side link to the main process registry

use super::launcher::WorkerControl;
use super::protocol::{read_frame, write_frame, RegistryRequest, RegistryResponse};
use crate::command::{CommandTable, Descriptor, TableChanges};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use onebot_shared::codec::FrameDecoder;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

type Reader = Box<dyn AsyncRead + Send + Unpin>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

struct Channel {
    reader: Reader,
    writer: Writer,
    decoder: FrameDecoder,
}

/// Registry operations forwarded over the worker's pipes
///
/// Requests are serialized: each one waits for its response before the
/// next is written.
pub struct RemoteRegistry {
    channel: Mutex<Channel>,
}

impl RemoteRegistry {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            channel: Mutex::new(Channel {
                reader: Box::new(reader),
                writer: Box::new(writer),
                decoder: FrameDecoder::new(),
            }),
        }
    }

    /// Read one unsolicited frame (the job)
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let mut channel = self.channel.lock().await;
        let Channel { reader, decoder, .. } = &mut *channel;
        read_frame(reader, decoder).await
    }

    async fn call(&self, request: RegistryRequest) -> Result<RegistryResponse> {
        let mut channel = self.channel.lock().await;
        let Channel {
            reader,
            writer,
            decoder,
        } = &mut *channel;
        write_frame(writer, &request).await?;
        let response = read_frame(reader, decoder)
            .await?
            .ok_or_else(|| anyhow!("Main process closed the registry channel"))?;
        match response {
            RegistryResponse::Error(message) => bail!("Registry request failed: {}", message),
            response => Ok(response),
        }
    }

    pub async fn get(&self, name: &str) -> Result<Option<Descriptor>> {
        match self
            .call(RegistryRequest::Get {
                name: name.to_string(),
            })
            .await?
        {
            RegistryResponse::Descriptor(descriptor) => Ok(descriptor),
            other => bail!("Unexpected registry response {:?}", other),
        }
    }

    pub async fn snapshot(&self) -> Result<CommandTable> {
        match self.call(RegistryRequest::Snapshot).await? {
            RegistryResponse::Table(table) => Ok(table),
            other => bail!("Unexpected registry response {:?}", other),
        }
    }

    /// Take the registry-wide lock; returns the table as seen under it
    pub async fn lock(&self) -> Result<CommandTable> {
        match self.call(RegistryRequest::Lock).await.context("Failed to take registry lock")? {
            RegistryResponse::Table(table) => Ok(table),
            other => bail!("Unexpected registry response {:?}", other),
        }
    }

    /// Upload changes and release the lock
    pub async fn unlock(&self, changes: TableChanges) -> Result<()> {
        match self
            .call(RegistryRequest::Unlock { changes })
            .await
            .context("Failed to release registry lock")?
        {
            RegistryResponse::Unlocked => Ok(()),
            other => bail!("Unexpected registry response {:?}", other),
        }
    }
}

#[async_trait]
impl WorkerControl for RemoteRegistry {
    async fn kill_workers(&self) -> Result<usize> {
        match self.call(RegistryRequest::KillWorkers).await? {
            RegistryResponse::Killed(count) => Ok(count),
            other => bail!("Unexpected registry response {:?}", other),
        }
    }
}
