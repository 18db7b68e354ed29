//! Command executor - resolves, invokes and interprets one command call
//!
//! Every path that runs a command body (manual dispatch in a worker, auto
//! runs, the shutdown drain) goes through `handle_command`, which is also
//! the failure boundary: errors and panics from the body are logged here
//! and never propagate.

use super::factory::CommandOutput;
use super::resolver::{self, CallContext, ResolveError};
use crate::bot::BotHandle;
use crate::scheduler::release_worker;
use crate::worker::WorkerTask;
use futures::FutureExt;
use onebot_shared::{now_ms, Reply};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, warn};

/// Runs commands against one orchestrator context
#[derive(Clone)]
pub struct CommandExecutor {
    bot: BotHandle,
}

impl CommandExecutor {
    /// Create a new command executor
    pub fn new(bot: BotHandle) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &BotHandle {
        &self.bot
    }

    /// Run the task a worker was started for
    pub async fn run_task(&self, task: WorkerTask) -> Option<Reply> {
        match task {
            WorkerTask::Manual { context } => self.handle_command(&context, true).await,
            WorkerTask::Auto { cmd_name } => self.handle_auto_command(&cmd_name).await,
        }
    }

    /// Resolve parameters, invoke the command and build its reply
    ///
    /// The reply is sent to `ctx.target_id` when `send_reply` is set.
    pub async fn handle_command(&self, ctx: &CallContext, send_reply: bool) -> Option<Reply> {
        let start_time = now_ms();

        let table = match self.bot.registry().snapshot().await {
            Ok(table) => table,
            Err(e) => {
                error!("Failed to read registry for '{}': {:#}", ctx.cmd_name, e);
                return None;
            }
        };
        let Some(descriptor) = table.get(&ctx.cmd_name) else {
            warn!("{}", ResolveError::UnknownCommand(ctx.cmd_name.clone()));
            return None;
        };
        let Some(command) = self.bot.catalog().get(&descriptor.target) else {
            error!(
                "Command '{}' targets '{}' which is not in the catalog",
                ctx.cmd_name, descriptor.target
            );
            return None;
        };
        let default_kind = descriptor.extra_params.reply_kind().to_string();

        let args = match resolver::resolve(&table, ctx, command.declared_params()) {
            Ok(args) => args,
            Err(e) => {
                warn!("Skipping '{}': {}", ctx.cmd_name, e);
                return None;
            }
        };
        drop(table);

        let outcome = AssertUnwindSafe(command.invoke(&self.bot, args))
            .catch_unwind()
            .await;

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Exception in command '{}': {:?}", ctx.cmd_name, e);
                return None;
            }
            Err(payload) => {
                error!(
                    "Command '{}' panicked: {}",
                    ctx.cmd_name,
                    panic_message(payload.as_ref())
                );
                return None;
            }
        };

        let reply = output.map(|output: CommandOutput| output.into_reply(&default_kind));
        debug!(
            "Command '{}' finished in {} ms",
            ctx.cmd_name,
            now_ms().saturating_sub(start_time)
        );

        if send_reply {
            if let Some(reply) = reply.as_ref().filter(|r| !r.is_empty()) {
                self.bot
                    .send_message(reply, &ctx.message_type, ctx.target_id)
                    .await;
            }
        }

        reply
    }

    /// Body of one scheduled run of an Auto command
    ///
    /// Runs without sending, gives back its worker slot under the registry
    /// lock, then sends the reply if the command's policy asks for it.
    pub async fn handle_auto_command(&self, cmd_name: &str) -> Option<Reply> {
        let auto = match self.bot.registry().get(cmd_name).await {
            Ok(descriptor) => descriptor.and_then(|d| d.extra_params.auto_params),
            Err(e) => {
                error!("Failed to read auto command '{}': {:#}", cmd_name, e);
                None
            }
        };
        let (message_type, target_id, send) = auto
            .as_ref()
            .map(|a| (a.message_type.clone(), a.target_id, a.send))
            .unwrap_or_default();

        let ctx = CallContext::unattended(cmd_name, &message_type, target_id);
        let reply = self.handle_command(&ctx, false).await;

        let released = self
            .bot
            .registry()
            .with_lock(|table| {
                let descriptor = table.get_mut(cmd_name)?;
                let cap = descriptor.auto_params().map(|a| a.num_process).unwrap_or(0);
                let living = descriptor.living_params.get_or_insert_with(Default::default);
                release_worker(living);
                Some((living.running_process, cap))
            })
            .await;
        match released {
            Ok(Some((running, cap))) => debug!(
                "Finished a run of auto command '{}', now {} / {} workers alive",
                cmd_name, running, cap
            ),
            Ok(None) => warn!("Auto command '{}' vanished from the registry", cmd_name),
            Err(e) => error!("Failed to release worker slot of '{}': {:#}", cmd_name, e),
        }

        if send {
            if let Some(reply) = reply.as_ref().filter(|r| !r.is_empty()) {
                self.bot.send_message(reply, &message_type, target_id).await;
            }
        }

        reply
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
