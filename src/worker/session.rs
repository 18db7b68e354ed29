//! Parent-side session serving one worker's registry requests
//!
//! The session owns the worker's pipes for its whole life. It holds the
//! registry-wide lock on the worker's behalf between `Lock` and `Unlock`,
//! and drops it when the worker's stdout closes, whatever the reason.

use super::launcher::WorkerPool;
use super::protocol::{read_frame, write_frame, RegistryRequest, RegistryResponse, WorkerJob};
use crate::command::SharedTable;
use anyhow::{Context, Result};
use onebot_shared::codec::FrameDecoder;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{Notify, OwnedMutexGuard};
use tracing::{debug, error, warn};

/// Serve a spawned worker until it exits
pub async fn serve(
    mut child: Child,
    job: WorkerJob,
    registry: Arc<SharedTable>,
    pool: Arc<WorkerPool>,
    kill: Arc<Notify>,
) {
    let worker_id = job.worker_id;
    let cmd_name = job.task.cmd_name().to_string();

    match (child.stdin.take(), child.stdout.take()) {
        (Some(mut stdin), Some(mut stdout)) => {
            let served = tokio::select! {
                result = run(&mut stdin, &mut stdout, &job, &registry, &pool) => Some(result),
                _ = kill.notified() => None,
            };
            match served {
                Some(Ok(())) => {}
                Some(Err(e)) => warn!("Session of worker {} ({}) failed: {:#}", worker_id, cmd_name, e),
                None => {
                    warn!("Killing worker {} ({})", worker_id, cmd_name);
                    if let Err(e) = child.start_kill() {
                        error!("Failed to kill worker {}: {}", worker_id, e);
                    }
                }
            }
        }
        _ => {
            error!("Worker {} ({}) started without pipes", worker_id, cmd_name);
            let _ = child.start_kill();
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => debug!("Worker {} ({}) exited", worker_id, cmd_name),
        Ok(status) => warn!("Worker {} ({}) exited with {}", worker_id, cmd_name, status),
        Err(e) => error!("Failed to reap worker {}: {}", worker_id, e),
    }
    pool.remove(worker_id);
}

/// Send the job, then answer requests until the worker closes its stdout
///
/// Any lock still held when this returns (or is cancelled) is released with
/// the guard.
pub async fn run<W, R>(
    writer: &mut W,
    reader: &mut R,
    job: &WorkerJob,
    registry: &SharedTable,
    pool: &WorkerPool,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    write_frame(writer, job).await.context("Failed to send job")?;

    let mut decoder = FrameDecoder::new();
    let mut held: Option<OwnedMutexGuard<()>> = None;

    while let Some(request) = read_frame::<_, RegistryRequest>(reader, &mut decoder).await? {
        let response = match request {
            RegistryRequest::Get { name } => RegistryResponse::Descriptor(registry.get(&name).await),
            RegistryRequest::Snapshot => RegistryResponse::Table(registry.snapshot().await),
            RegistryRequest::Lock => {
                // A worker holds at most one lock; re-locking refreshes the view
                if held.is_none() {
                    held = Some(registry.acquire().await);
                }
                RegistryResponse::Table(registry.snapshot().await)
            }
            RegistryRequest::Unlock { changes } => match held.take() {
                Some(guard) => {
                    if !changes.is_empty() {
                        registry.apply(changes).await;
                    }
                    drop(guard);
                    RegistryResponse::Unlocked
                }
                None => RegistryResponse::Error("registry lock is not held".into()),
            },
            RegistryRequest::KillWorkers => {
                RegistryResponse::Killed(pool.kill_all_except(Some(job.worker_id)))
            }
        };
        write_frame(writer, &response).await?;
    }

    if held.is_some() {
        warn!(
            "Worker {} ({}) went away holding the registry lock, releasing it",
            job.worker_id,
            job.task.cmd_name()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::descriptor::ExtraParams;
    use crate::command::{CommandKind, CommandTable, Descriptor, TableChanges};
    use crate::config::BotSettings;
    use crate::worker::WorkerTask;
    use serde_json::json;
    use std::time::Duration;

    fn job() -> WorkerJob {
        WorkerJob {
            worker_id: 9,
            settings: BotSettings {
                admin_id: 1,
                http_post_host: "127.0.0.1".into(),
                http_post_port: 5701,
                http_api_url: "http://127.0.0.1:5700".into(),
                notice: String::new(),
                retry_count: 1,
            },
            task: WorkerTask::Auto {
                cmd_name: "ping".into(),
            },
        }
    }

    fn table() -> Arc<SharedTable> {
        let descriptor = Descriptor::new(
            CommandKind::Manual,
            "echo".into(),
            Default::default(),
            ExtraParams::default(),
        );
        Arc::new(SharedTable::new(CommandTable::from([("ping".to_string(), descriptor)])))
    }

    #[tokio::test]
    async fn test_lock_released_when_worker_dies() {
        let registry = table();
        let pool = WorkerPool::new();
        let (mut parent_out, mut worker_in) = tokio::io::duplex(1 << 16);
        let (mut worker_out, mut parent_in) = tokio::io::duplex(1 << 16);

        let session_registry = registry.clone();
        let session = tokio::spawn(async move {
            run(&mut parent_out, &mut parent_in, &job(), &session_registry, &pool).await
        });

        let mut decoder = FrameDecoder::new();
        let received: Option<WorkerJob> = read_frame(&mut worker_in, &mut decoder).await.unwrap();
        assert_eq!(received.unwrap().worker_id, 9);

        write_frame(&mut worker_out, &RegistryRequest::Lock).await.unwrap();
        let locked: Option<RegistryResponse> = read_frame(&mut worker_in, &mut decoder).await.unwrap();
        assert!(matches!(locked, Some(RegistryResponse::Table(_))));

        // Lock is held for the worker
        assert!(tokio::time::timeout(Duration::from_millis(50), registry.acquire())
            .await
            .is_err());

        // Worker crashes
        drop(worker_out);
        session.await.unwrap().unwrap();

        let guard = tokio::time::timeout(Duration::from_secs(1), registry.acquire()).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_unlock_applies_changes() {
        let registry = table();
        let pool = WorkerPool::new();
        let (mut parent_out, mut worker_in) = tokio::io::duplex(1 << 16);
        let (mut worker_out, mut parent_in) = tokio::io::duplex(1 << 16);

        let session_registry = registry.clone();
        let session = tokio::spawn(async move {
            run(&mut parent_out, &mut parent_in, &job(), &session_registry, &pool).await
        });

        let mut decoder = FrameDecoder::new();
        let _: Option<WorkerJob> = read_frame(&mut worker_in, &mut decoder).await.unwrap();

        write_frame(&mut worker_out, &RegistryRequest::Lock).await.unwrap();
        let locked: Option<RegistryResponse> = read_frame(&mut worker_in, &mut decoder).await.unwrap();
        let Some(RegistryResponse::Table(before)) = locked else {
            panic!("expected table");
        };
        let mut after = before.clone();
        after["ping"].params.insert("message".into(), json!("changed"));

        write_frame(
            &mut worker_out,
            &RegistryRequest::Unlock {
                changes: TableChanges::between(&before, &after),
            },
        )
        .await
        .unwrap();
        let unlocked: Option<RegistryResponse> = read_frame(&mut worker_in, &mut decoder).await.unwrap();
        assert_eq!(unlocked, Some(RegistryResponse::Unlocked));

        // Unlock without a lock is refused, not fatal
        write_frame(
            &mut worker_out,
            &RegistryRequest::Unlock {
                changes: TableChanges::default(),
            },
        )
        .await
        .unwrap();
        let refused: Option<RegistryResponse> = read_frame(&mut worker_in, &mut decoder).await.unwrap();
        assert!(matches!(refused, Some(RegistryResponse::Error(_))));

        drop(worker_out);
        session.await.unwrap().unwrap();

        let ping = registry.get("ping").await.unwrap();
        assert_eq!(ping.params["message"], json!("changed"));
    }
}
