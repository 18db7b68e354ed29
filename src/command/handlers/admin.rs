//! Operator commands: cache, config snapshot, workers, attributes, shell

use crate::bot::BotHandle;
use crate::command::attribute::parse_edit;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use crate::config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

/// Asks the transport to clear its cache
pub struct CleanCache;

#[async_trait]
impl Command for CleanCache {
    fn declared_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, bot: &BotHandle, _args: ParamBag) -> Result<Option<CommandOutput>> {
        let text = if bot.clean_cache().await {
            "Cache cleaned"
        } else {
            "Failed to clean cache"
        };
        Ok(Some(CommandOutput::bare(text)))
    }
}

/// Writes the live registry back out as a configuration document
pub struct SaveConfig;

#[async_trait]
impl Command for SaveConfig {
    fn declared_params(&self) -> &'static [&'static str] {
        &["save_dir", "prefix"]
    }

    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let save_dir = args.str_or("save_dir", "./configs");
        let prefix = args.str_or("prefix", "last");

        let document = bot.get_config().await?;
        let path = config::save(&document, Path::new(save_dir), prefix)?;
        info!("Config saved to {}", path.display());
        Ok(Some(CommandOutput::bare(format!("Config saved to {}", path.display()))))
    }
}

/// Kills every other live worker process
pub struct KillWorkers;

#[async_trait]
impl Command for KillWorkers {
    fn declared_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, bot: &BotHandle, _args: ParamBag) -> Result<Option<CommandOutput>> {
        let killed = bot.kill_workers().await?;
        Ok(Some(CommandOutput::bare(format!("Killed {} worker processes", killed))))
    }
}

const EDIT_USAGE: &str = "Usage: <command>.<key>=<value>, or <command>.<key>|-s to show";

/// Shows or edits one attribute of a registered command
pub struct ChangeAttribute;

#[async_trait]
impl Command for ChangeAttribute {
    fn declared_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let Some(request) = parse_edit(args.str("message")?) else {
            return Ok(Some(CommandOutput::bare(EDIT_USAGE)));
        };

        let text = match request.value {
            Some(value) if !request.show => {
                match bot
                    .registry()
                    .set_attribute(&request.command, &request.key, &value)
                    .await
                {
                    Ok(stored) => {
                        info!(
                            "Attribute {} of command {} changed to {}",
                            request.key, request.command, stored
                        );
                        format!(
                            "Attribute {} of command {} changed to {}",
                            request.key, request.command, stored
                        )
                    }
                    Err(e) => {
                        warn!("Attribute edit rejected: {}", e);
                        e.to_string()
                    }
                }
            }
            _ => match bot.registry().show_attribute(&request.command, &request.key).await {
                Ok(current) => format!(
                    "Attribute {} of command {} is {}",
                    request.key, request.command, current
                ),
                Err(e) => e.to_string(),
            },
        };
        Ok(Some(CommandOutput::bare(text)))
    }
}

/// Runs the payload in a shell; admin only
pub struct Terminal;

#[async_trait]
impl Command for Terminal {
    fn declared_params(&self) -> &'static [&'static str] {
        &["message", "sender_id"]
    }

    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let sender_id = args.i64("sender_id")?;
        if !bot.is_admin(sender_id) {
            warn!("Rejected terminal command from {}", sender_id);
            return Ok(Some(CommandOutput::bare("Permission denied, admin only")));
        }

        let script = args.str("message")?;
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .output()
            .await
            .context("Failed to start shell")?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Some(CommandOutput::bare(text.trim_matches('\n'))))
    }
}
