//! Bot configuration
//!
//! This module handles:
//! - Locating the YAML file (falling back to the newest one in `configs/`)
//! - Parsing it into typed settings plus the three command tables
//! - Writing the registry back out as an equivalent document

use crate::command::{CommandConfig, CommandKind, CommandTable};
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use onebot_shared::limits;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Configured commands of one table, in file order
pub type CommandTableConfig = IndexMap<String, CommandConfig>;

fn default_retry_count() -> u32 {
    limits::DEFAULT_RETRY_COUNT
}

/// The configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(rename = "AdminID")]
    pub admin_id: i64,
    #[serde(rename = "HttpPostHost")]
    pub http_post_host: String,
    #[serde(rename = "HttpPostPort")]
    pub http_post_port: u16,
    #[serde(rename = "HttpAPIURL")]
    pub http_api_url: String,
    #[serde(rename = "Notice", default)]
    pub notice: String,
    #[serde(rename = "RetryCount", default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(rename = "ManualCommands", default)]
    pub manual_commands: CommandTableConfig,
    #[serde(rename = "AutoCommands", default)]
    pub auto_commands: CommandTableConfig,
    #[serde(rename = "PostCommands", default)]
    pub post_commands: CommandTableConfig,
    /// Keys this version does not know; warned about at load, never saved
    #[serde(flatten)]
    pub unrecognized: IndexMap<String, Value>,
}

/// Process-wide settings, everything but the command tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSettings {
    pub admin_id: i64,
    pub http_post_host: String,
    pub http_post_port: u16,
    pub http_api_url: String,
    pub notice: String,
    pub retry_count: u32,
}

impl BotConfig {
    pub fn settings(&self) -> BotSettings {
        BotSettings {
            admin_id: self.admin_id,
            http_post_host: self.http_post_host.clone(),
            http_post_port: self.http_post_port,
            http_api_url: self.http_api_url.clone(),
            notice: self.notice.clone(),
            retry_count: self.retry_count,
        }
    }

    pub fn commands(&self, kind: CommandKind) -> &CommandTableConfig {
        match kind {
            CommandKind::Manual => &self.manual_commands,
            CommandKind::Auto => &self.auto_commands,
            CommandKind::Post => &self.post_commands,
        }
    }

    fn commands_mut(&mut self, kind: CommandKind) -> &mut CommandTableConfig {
        match kind {
            CommandKind::Manual => &mut self.manual_commands,
            CommandKind::Auto => &mut self.auto_commands,
            CommandKind::Post => &mut self.post_commands,
        }
    }

    /// Rebuild a document from settings and the live registry table
    ///
    /// Runtime state (living params, chat history) is not written.
    pub fn from_parts(settings: &BotSettings, table: &CommandTable) -> Self {
        let mut config = Self {
            admin_id: settings.admin_id,
            http_post_host: settings.http_post_host.clone(),
            http_post_port: settings.http_post_port,
            http_api_url: settings.http_api_url.clone(),
            notice: settings.notice.clone(),
            retry_count: settings.retry_count,
            manual_commands: CommandTableConfig::new(),
            auto_commands: CommandTableConfig::new(),
            post_commands: CommandTableConfig::new(),
            unrecognized: IndexMap::new(),
        };
        for (name, descriptor) in table {
            config
                .commands_mut(descriptor.kind)
                .insert(name.clone(), descriptor.to_config());
        }
        config
    }

    /// Socket address of the webhook listener
    pub fn webhook_addr(&self) -> String {
        format!("{}:{}", self.http_post_host, self.http_post_port)
    }
}

/// Resolve the config path, falling back to the newest `*.yaml` in `fallback_dir`
pub fn locate(path: &Path, fallback_dir: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }

    let newest = std::fs::read_dir(fallback_dir)
        .with_context(|| format!("Config {} not found and {} is unreadable", path.display(), fallback_dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().map(|ext| ext == "yaml").unwrap_or(false))
        .filter_map(|p| {
            let modified = p.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, p)| p);

    match newest {
        Some(found) => {
            warn!("Config {} not found, using {}", path.display(), found.display());
            Ok(found)
        }
        None => bail!(
            "Config {} not found and no *.yaml in {}",
            path.display(),
            fallback_dir.display()
        ),
    }
}

/// Parse a configuration document
pub fn parse(text: &str) -> Result<BotConfig> {
    let config: BotConfig = serde_yaml::from_str(text).context("Invalid configuration document")?;
    for key in config.unrecognized.keys() {
        warn!("Unknown configuration key '{}'", key);
    }
    Ok(config)
}

/// Load the configuration from disk
pub fn load(path: &Path) -> Result<BotConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config = parse(&text)?;
    info!("Loaded config {}", path.display());
    Ok(config)
}

/// Write `config` to `<dir>/<prefix>.yaml`
///
/// An existing file is first renamed to `<prefix>_<YYYY-mm-dd_HH-MM-SS>.yaml`.
pub fn save(config: &BotConfig, dir: &Path, prefix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let target = dir.join(format!("{}.yaml", prefix));
    if target.exists() {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let backup = dir.join(format!("{}_{}.yaml", prefix, stamp));
        std::fs::rename(&target, &backup)
            .with_context(|| format!("Failed to back up {}", target.display()))?;
    }

    let text = serde_yaml::to_string(config).context("Failed to serialize config")?;
    std::fs::write(&target, text)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(target)
}
