//! Stand-in OneBot HTTP API
//!
//! Answers the three endpoints the orchestrator calls and logs every
//! outbound message, so the bot can be run without a real chat client.

use anyhow::Context;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use onebot_shared::Segment;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_ADDR: &str = "127.0.0.1:5700";

#[derive(Debug, Deserialize)]
struct SendMsg {
    message_type: String,
    #[serde(default)]
    message: Vec<Segment>,
    group_id: Option<i64>,
    user_id: Option<i64>,
}

#[derive(Default)]
struct MockState {
    next_message_id: AtomicI64,
}

async fn get_status() -> Json<Value> {
    Json(json!({"status": "ok", "retcode": 0, "data": {"online": true, "good": true}}))
}

async fn send_msg(State(state): State<Arc<MockState>>, Json(body): Json<SendMsg>) -> Json<Value> {
    let message_id = state.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
    let target = body.group_id.or(body.user_id).unwrap_or_default();
    for segment in &body.message {
        let data = Value::Object(segment.data.clone());
        info!(
            "[{}:{}] #{} {} {}",
            body.message_type, target, message_id, segment.kind, data
        );
    }
    Json(json!({"status": "ok", "retcode": 0, "data": {"message_id": message_id}}))
}

async fn clean_cache() -> Json<Value> {
    info!("Cache cleaned");
    Json(json!({"status": "ok", "retcode": 0, "data": null}))
}

fn router() -> Router {
    Router::new()
        .route("/get_status", get(get_status))
        .route("/send_msg", post(send_msg))
        .route("/clean_cache", get(clean_cache))
        .with_state(Arc::new(MockState::default()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Mock OneBot API listening on {}", addr);

    axum::serve(listener, router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: &str) -> SendMsg {
        serde_json::from_value(json!({
            "message_type": "group",
            "group_id": 1001,
            "message": [{"type": "text", "data": {"text": text}}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_msg_numbers_messages() {
        let state = Arc::new(MockState::default());

        let Json(first) = send_msg(State(state.clone()), Json(message("one"))).await;
        let Json(second) = send_msg(State(state), Json(message("two"))).await;

        assert_eq!(first["status"], "ok");
        assert_eq!(first["data"]["message_id"], 1);
        assert_eq!(second["data"]["message_id"], 2);
    }

    #[tokio::test]
    async fn test_status_reports_online() {
        let Json(body) = get_status().await;
        assert_eq!(body["data"]["online"], true);
    }
}
