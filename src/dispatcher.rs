//! Inbound message dispatch
//!
//! Turns a webhook event into at most one worker launch. Dispatch never
//! waits for the worker it starts.

use crate::command::{CallContext, Registry};
use crate::worker::{Launcher, WorkerTask};
use onebot_shared::{is_group, MessageEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to one inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No message type or no segments
    NotAMessage,
    /// First segment type is not handled
    Unsupported(String),
    /// Ordinary chat, or a prefix that names no command
    Ignored,
    /// A worker was started for the named command
    Launched(String),
    /// The worker could not be started
    LaunchFailed(String),
}

/// Routes inbound messages to command workers
pub struct Dispatcher {
    registry: Registry,
    launcher: Arc<dyn Launcher>,
}

impl Dispatcher {
    pub fn new(registry: Registry, launcher: Arc<dyn Launcher>) -> Self {
        Self { registry, launcher }
    }

    pub async fn dispatch(&self, event: &MessageEvent) -> DispatchOutcome {
        let Some(message_type) = event.message_kind() else {
            warn!("Not a message event: {}", event.message_id);
            return DispatchOutcome::NotAMessage;
        };

        let origin = if is_group(message_type) {
            format!("Group({})", event.group_id.unwrap_or_default())
        } else {
            "Private".to_string()
        };
        info!(
            "[{}] - {}({}): {}",
            origin, event.sender.nickname, event.sender.user_id, event.raw_message
        );

        if !event.is_supported() {
            let kind = event.first_segment_type().unwrap_or_default().to_string();
            warn!("Unsupported message segment type: {}", kind);
            return DispatchOutcome::Unsupported(kind);
        }

        let Some((candidate, payload)) = event.split_command() else {
            return DispatchOutcome::Ignored;
        };
        match self.registry.contains(candidate).await {
            Ok(true) => {}
            Ok(false) => return DispatchOutcome::Ignored,
            Err(e) => {
                error!("Failed to look up command '{}': {:#}", candidate, e);
                return DispatchOutcome::Ignored;
            }
        }

        let context = CallContext {
            cmd_name: candidate.to_string(),
            message: payload.to_string(),
            message_type: message_type.to_string(),
            sender_id: event.sender.user_id,
            target_id: event.target_id(),
            message_id: event.message_id,
        };
        match self.launcher.launch(WorkerTask::Manual { context }) {
            Ok(()) => {
                debug!("Dispatched '{}'", candidate);
                DispatchOutcome::Launched(candidate.to_string())
            }
            Err(e) => {
                error!("Failed to launch '{}': {:#}", candidate, e);
                DispatchOutcome::LaunchFailed(candidate.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, HEADER};
    use serde_json::json;

    fn harness() -> Harness {
        Harness::new(&format!(
            r#"{HEADER}
ManualCommands:
  ping:
    target: echo
AutoCommands:
  tick:
    target: echo
    params:
      message: tock
    extra_params:
      auto_params:
        run: false
        min_execution_interval: 5
        longest_idle_interval: 60
"#
        ))
    }

    fn event(value: serde_json::Value) -> MessageEvent {
        serde_json::from_value(value).unwrap()
    }

    fn private(raw: &str) -> MessageEvent {
        event(json!({
            "message_id": 3,
            "message_type": "private",
            "message": [{"type": "text", "data": {"text": raw}}],
            "raw_message": raw,
            "sender": {"user_id": 42, "nickname": "alice"}
        }))
    }

    #[tokio::test]
    async fn test_ping_round_trip_replies_to_sender() {
        let h = harness();
        let outcome = h.dispatcher().dispatch(&private("ping|hello")).await;
        assert_eq!(outcome, DispatchOutcome::Launched("ping".into()));

        h.launcher.join_all().await;
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, "private");
        assert_eq!(sent[0].user_id, Some(42));
        assert_eq!(sent[0].message[0].data["text"], "hello");
    }

    #[tokio::test]
    async fn test_group_reply_goes_to_group() {
        let h = harness();
        let group = event(json!({
            "message_id": 4,
            "message_type": "group",
            "message": [{"type": "text", "data": {"text": "ping|hi"}}],
            "raw_message": "ping|hi",
            "sender": {"user_id": 42, "nickname": "alice"},
            "group_id": 1001
        }));
        h.dispatcher().dispatch(&group).await;
        h.launcher.join_all().await;
        assert_eq!(h.transport.sent()[0].group_id, Some(1001));
    }

    #[tokio::test]
    async fn test_any_kind_is_dispatchable() {
        let h = harness();
        assert_eq!(
            h.dispatcher().dispatch(&private("tick|")).await,
            DispatchOutcome::Launched("tick".into())
        );
    }

    #[tokio::test]
    async fn test_plain_and_unknown_messages_ignored() {
        let h = harness();
        assert_eq!(h.dispatcher().dispatch(&private("ping")).await, DispatchOutcome::Ignored);
        assert_eq!(h.dispatcher().dispatch(&private("pong|x")).await, DispatchOutcome::Ignored);
        assert_eq!(h.launcher.launched(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_segment_dropped() {
        let h = harness();
        let mut e = private("ping|x");
        e.message[0].kind = "markdown".into();
        assert_eq!(
            h.dispatcher().dispatch(&e).await,
            DispatchOutcome::Unsupported("markdown".into())
        );
    }

    #[tokio::test]
    async fn test_meta_event_dropped() {
        let h = harness();
        let meta = event(json!({"message_id": 5, "message_type": "private", "message": []}));
        assert_eq!(h.dispatcher().dispatch(&meta).await, DispatchOutcome::NotAMessage);
    }

    #[tokio::test]
    async fn test_launch_failure_reported() {
        let h = harness();
        h.launcher.fail_launches(true);
        assert_eq!(
            h.dispatcher().dispatch(&private("ping|x")).await,
            DispatchOutcome::LaunchFailed("ping".into())
        );
    }
}
