//! Identity command

use crate::bot::BotHandle;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use anyhow::Result;
use async_trait::async_trait;

/// Replies with its payload
pub struct Echo;

#[async_trait]
impl Command for Echo {
    fn declared_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn invoke(&self, _bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        Ok(Some(CommandOutput::bare(args.str("message")?)))
    }
}
