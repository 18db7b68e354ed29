//! axum server for inbound events

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use onebot_shared::MessageEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Route one raw event; `None` when it is not a message event
pub async fn handle_event(dispatcher: &Dispatcher, body: Value) -> Option<DispatchOutcome> {
    if body.get("message_id").is_none() {
        let post_type = body.get("post_type").and_then(Value::as_str).unwrap_or("unknown");
        debug!("Ignoring event without message_id: {}", post_type);
        return None;
    }

    match serde_json::from_value::<MessageEvent>(body) {
        Ok(event) => Some(dispatcher.dispatch(&event).await),
        Err(e) => {
            warn!("Malformed message event: {}", e);
            None
        }
    }
}

async fn receive(State(dispatcher): State<Arc<Dispatcher>>, Json(body): Json<Value>) -> StatusCode {
    handle_event(&dispatcher, body).await;
    StatusCode::OK
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().route("/", post(receive)).with_state(dispatcher)
}

/// Serve the webhook on an already bound listener
pub async fn serve(listener: TcpListener, dispatcher: Arc<Dispatcher>) -> Result<()> {
    axum::serve(listener, router(dispatcher))
        .await
        .context("Webhook server failed")
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
"#
        ))
    }

    fn ping(raw: &str) -> Value {
        json!({
            "post_type": "message",
            "message_id": 11,
            "message_type": "private",
            "message": [{"type": "text", "data": {"text": raw}}],
            "raw_message": raw,
            "sender": {"user_id": 42, "nickname": "alice"}
        })
    }

    #[tokio::test]
    async fn test_meta_event_ignored() {
        let h = harness();
        let heartbeat = json!({"post_type": "meta_event", "meta_event_type": "heartbeat"});
        assert!(handle_event(&h.dispatcher(), heartbeat).await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_event_ignored() {
        let h = harness();
        let broken = json!({"message_id": "eleven", "message": "nope"});
        assert!(handle_event(&h.dispatcher(), broken).await.is_none());
    }

    #[tokio::test]
    async fn test_message_event_dispatched() {
        let h = harness();
        assert_eq!(
            handle_event(&h.dispatcher(), ping("ping|hi")).await,
            Some(DispatchOutcome::Launched("ping".into()))
        );
    }

    #[tokio::test]
    async fn test_http_round_trip_answers_empty_200() {
        let h = harness();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(h.dispatcher())));

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/", addr))
            .json(&ping("ping|over http"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert!(response.text().await.unwrap().is_empty());

        let response = client
            .post(format!("http://{}/", addr))
            .json(&json!({"post_type": "notice"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        h.launcher.join_all().await;
        let sent = h.transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message[0].data["text"], "over http");
        server.abort();
    }
}
