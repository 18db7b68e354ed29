//! Runs the compiled `worker` subcommand against a registry session played
//! by the test over the child's stdio pipes.

use axum::{extract::State, routing::post, Json, Router};
use onebot_shared::codec::{encode, FrameDecoder};
use serde_json::{json, Value};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

const SESSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Fake `send_msg` endpoint forwarding every request body to the test
async fn message_endpoint() -> (String, mpsc::UnboundedReceiver<Value>) {
    async fn send_msg(
        State(sent): State<mpsc::UnboundedSender<Value>>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let _ = sent.send(body);
        Json(json!({"status": "ok", "retcode": 0, "data": {"message_id": 1}}))
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route("/send_msg", post(send_msg)).with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), rx)
}

fn settings(api_url: &str) -> Value {
    json!({
        "admin_id": 10001,
        "http_post_host": "127.0.0.1",
        "http_post_port": 5701,
        "http_api_url": api_url,
        "notice": "",
        "retry_count": 1
    })
}

fn tick_descriptor(running_process: u32) -> Value {
    json!({
        "kind": "Auto",
        "target": "echo",
        "params": {"message": "tick tock"},
        "extra_params": {
            "auto_params": {
                "run": true,
                "min_execution_interval": 0.0,
                "longest_idle_interval": 60.0,
                "num_process": 1,
                "message_type": "group",
                "target_id": 1001,
                "send": true
            }
        },
        "living_params": {"running_process": running_process, "last_runtime_ms": 0}
    })
}

async fn read_frame(stdout: &mut ChildStdout, decoder: &mut FrameDecoder) -> Option<Value> {
    let mut buf = [0u8; 8192];
    loop {
        if let Some(frame) = decoder.decode_next().unwrap() {
            return Some(frame);
        }
        let n = stdout.read(&mut buf).await.unwrap();
        if n == 0 {
            return None;
        }
        decoder.extend(&buf[..n]);
    }
}

/// What the worker asked for during its run
struct Session {
    requests: Vec<String>,
    unlocked: Vec<Value>,
}

/// Start a worker, hand it `job`, and answer its requests from `table`
/// until it closes stdout
async fn run_worker(job: Value, table: Value) -> Session {
    let mut child = Command::new(env!("CARGO_BIN_EXE_onebot"))
        .arg("worker")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    stdin.write_all(&encode(&job).unwrap()).await.unwrap();
    stdin.flush().await.unwrap();

    let mut decoder = FrameDecoder::new();
    let mut session = Session {
        requests: Vec::new(),
        unlocked: Vec::new(),
    };

    while let Some(request) = read_frame(&mut stdout, &mut decoder).await {
        // Unit variants arrive as bare strings, the rest as one-key objects
        let (name, body) = match &request {
            Value::String(name) => (name.clone(), Value::Null),
            Value::Object(map) => {
                let (name, body) = map.iter().next().unwrap();
                (name.clone(), body.clone())
            }
            other => panic!("unexpected request {}", other),
        };

        let response = match name.as_str() {
            "Get" => {
                let name = body["name"].as_str().unwrap();
                json!({"Descriptor": table.get(name).cloned()})
            }
            "Snapshot" | "Lock" => json!({"Table": table.clone()}),
            "Unlock" => {
                session.unlocked.push(body["changes"].clone());
                json!("Unlocked")
            }
            "KillWorkers" => json!({"Killed": 0}),
            other => panic!("unexpected request {}", other),
        };
        session.requests.push(name);

        stdin.write_all(&encode(&response).unwrap()).await.unwrap();
        stdin.flush().await.unwrap();
    }

    let status = child.wait().await.unwrap();
    assert!(status.success(), "worker exited with {}", status);
    session
}

#[tokio::test]
async fn test_auto_worker_releases_slot_and_sends() {
    let (api_url, mut sent) = message_endpoint().await;
    let job = json!({
        "worker_id": 7,
        "settings": settings(&api_url),
        "task": {"Auto": {"cmd_name": "tick"}}
    });
    let table = json!({"tick": tick_descriptor(1)});

    let session = timeout(SESSION_TIMEOUT, run_worker(job, table)).await.unwrap();

    assert_eq!(session.requests, vec!["Get", "Snapshot", "Lock", "Unlock"]);

    // The slot the scheduler reserved is handed back under the lock
    let changes = &session.unlocked[0];
    assert_eq!(changes["upserts"][0][0], "tick");
    assert_eq!(changes["upserts"][0][1]["living_params"]["running_process"], 0);
    assert_eq!(changes["removed"], json!([]));

    let body = sent.recv().await.unwrap();
    assert_eq!(body["message_type"], "group");
    assert_eq!(body["group_id"], 1001);
    assert_eq!(body["message"][0]["type"], "text");
    assert_eq!(body["message"][0]["data"]["text"], "tick tock");
}

#[tokio::test]
async fn test_manual_worker_replies_to_sender() {
    let (api_url, mut sent) = message_endpoint().await;
    let job = json!({
        "worker_id": 8,
        "settings": settings(&api_url),
        "task": {"Manual": {"context": {
            "cmd_name": "ping",
            "message": "hello there",
            "message_type": "private",
            "sender_id": 42,
            "target_id": 42,
            "message_id": 3
        }}}
    });
    let table = json!({"ping": {"kind": "Manual", "target": "echo"}});

    let session = timeout(SESSION_TIMEOUT, run_worker(job, table)).await.unwrap();

    // A manual run only reads the table
    assert_eq!(session.requests, vec!["Snapshot"]);
    assert!(session.unlocked.is_empty());

    let body = sent.recv().await.unwrap();
    assert_eq!(body["user_id"], 42);
    assert_eq!(body["message"][0]["data"]["text"], "hello there");
}
