//! File cache commands and helpers

use crate::bot::BotHandle;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Keeps only the most recently modified files of a directory
pub struct CleanFileCache;

#[async_trait]
impl Command for CleanFileCache {
    fn declared_params(&self) -> &'static [&'static str] {
        &["retained", "save_dir"]
    }

    async fn invoke(&self, _bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let retained = args.i64_or("retained", 0).max(0) as usize;
        let save_dir = PathBuf::from(args.str("save_dir")?);

        if !save_dir.is_dir() {
            return Ok(Some(CommandOutput::bare(format!(
                "Cache directory {} does not exist",
                save_dir.display()
            ))));
        }

        let removed = retain_newest(&save_dir, retained).await?;
        info!("Removed {} cached files from {}", removed, save_dir.display());
        Ok(Some(CommandOutput::bare(format!("Retained {} files", retained))))
    }
}

/// Delete all but the `retained` newest files in `dir`; returns how many went
async fn retain_newest(dir: &Path, retained: usize) -> Result<usize> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            files.push((metadata.modified()?, entry.path()));
        }
    }

    files.sort_by_key(|(modified, _)| *modified);
    let excess = files.len().saturating_sub(retained);
    for (_, path) in files.iter().take(excess) {
        debug!("Removing {}", path.display());
        tokio::fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(excess)
}

/// Store generated image bytes as `<prefix>_<timestamp>_<n>.png` in `save_dir`
///
/// Returns the absolute path of the written file.
pub async fn save_image(bytes: &[u8], save_dir: &Path, prefix: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(save_dir)
        .await
        .with_context(|| format!("Failed to create {}", save_dir.display()))?;

    let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    let path = save_dir.join(format!("{}_{}_{:06}.png", prefix, stamp, suffix));

    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
    Ok(path)
}
