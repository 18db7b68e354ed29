//! Conversational commands backed by an OpenAI-compatible completion API
//!
//! History is kept per reply target on the command's own descriptor, so it
//! survives across worker processes.

use crate::bot::BotHandle;
use crate::command::descriptor::ChatTurn;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use crate::transport::RetryPolicy;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Turns kept per target; the history travels in every registry frame
const DEFAULT_MAX_HISTORY: usize = 40;

const PLAIN_PARAMS: &[&str] = &[
    "message",
    "api_key",
    "target_id",
    "cmd_name",
    "model",
    "api_base",
    "max_history",
];
const CONDITIONAL_PARAMS: &[&str] = &[
    "message",
    "api_key",
    "target_id",
    "cmd_name",
    "model",
    "api_base",
    "max_history",
    "conditional_history",
];

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatTurn,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Chat with stored per-target history
pub struct Chat {
    /// Prepend `conditional_history` to every request
    conditional: bool,
}

impl Chat {
    pub fn plain() -> Self {
        Self { conditional: false }
    }

    pub fn conditional() -> Self {
        Self { conditional: true }
    }
}

#[async_trait]
impl Command for Chat {
    fn declared_params(&self) -> &'static [&'static str] {
        if self.conditional {
            CONDITIONAL_PARAMS
        } else {
            PLAIN_PARAMS
        }
    }

    async fn invoke(&self, bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let message = args.str("message")?;
        let cmd_name = args.str("cmd_name")?.to_string();
        let target = args.i64("target_id")?.to_string();

        if message.trim() == "clear" {
            bot.registry()
                .with_lock(|table| {
                    if let Some(history) = table
                        .get_mut(&cmd_name)
                        .and_then(|d| d.chat_history.as_mut())
                    {
                        history.shift_remove(&target);
                    }
                })
                .await?;
            debug!("Chat history of {} for {} cleared", cmd_name, target);
            return Ok(Some(CommandOutput::bare("Chat history cleared")));
        }

        let mut turns = bot
            .registry()
            .get(&cmd_name)
            .await?
            .and_then(|d| d.chat_history)
            .and_then(|mut history| history.shift_remove(&target))
            .unwrap_or_default();
        turns.push(ChatTurn::new("user", message));

        let mut request_turns = if self.conditional {
            args.turns("conditional_history")?
        } else {
            Vec::new()
        };
        request_turns.extend(turns.iter().cloned());

        let api_key = args.str("api_key")?;
        let api_base = args.str_or("api_base", DEFAULT_API_BASE);
        let model = args.str_or("model", DEFAULT_MODEL);

        let (answer, total_tokens) = match complete(bot, api_base, api_key, model, &request_turns).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Chat completion for '{}' failed: {:#}", cmd_name, e);
                return Ok(Some(CommandOutput::bare(format!("Chat request failed: {:#}", e))));
            }
        };

        turns.push(answer.clone());
        let max_history = args.i64_or("max_history", DEFAULT_MAX_HISTORY as i64);
        trim_history(&mut turns, usize::try_from(max_history).unwrap_or(0));
        bot.registry()
            .with_lock(|table| {
                if let Some(descriptor) = table.get_mut(&cmd_name) {
                    descriptor
                        .chat_history
                        .get_or_insert_with(Default::default)
                        .insert(target.clone(), turns);
                }
            })
            .await?;

        Ok(Some(CommandOutput::bare(format!(
            "{}\n|total tokens: {}",
            answer.content, total_tokens
        ))))
    }
}

/// Drop the oldest turns beyond `max`
fn trim_history(turns: &mut Vec<ChatTurn>, max: usize) {
    let excess = turns.len().saturating_sub(max);
    turns.drain(..excess);
}

/// One chat-completion round trip; returns the assistant turn and the token total
async fn complete(
    bot: &BotHandle,
    api_base: &str,
    api_key: &str,
    model: &str,
    turns: &[ChatTurn],
) -> Result<(ChatTurn, u64)> {
    let url = format!("{}/chat/completions", api_base.trim_end_matches('/'));
    let request = CompletionRequest {
        model,
        messages: turns,
    };

    let url = url.as_str();
    let request = &request;
    let policy = RetryPolicy::fixed(bot.settings().retry_count);
    let response: CompletionResponse = policy
        .run("request chat completion", move || async move {
            let response = bot
                .http_client()
                .post(url)
                .bearer_auth(api_key)
                .json(request)
                .send()
                .await
                .context("Completion request failed")?
                .error_for_status()
                .context("Completion API returned an error status")?;
            response
                .json::<CompletionResponse>()
                .await
                .context("Malformed completion response")
        })
        .await?;

    let total_tokens = response.usage.map(|u| u.total_tokens).unwrap_or(0);
    let answer = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| anyhow!("Completion response has no choices"))?;
    Ok((answer, total_tokens))
}
