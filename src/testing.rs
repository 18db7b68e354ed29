//! In-process stand-ins for workers and the message endpoint

use crate::bot::BotHandle;
use crate::command::factory::{Command, CommandOutput};
use crate::command::resolver::ParamBag;
use crate::command::{Catalog, CommandExecutor, Registry};
use crate::dispatcher::Dispatcher;
use crate::scheduler::AutoScheduler;
use crate::transport::traits::StatusReport;
use crate::transport::{MessageTransport, SendRequest};
use crate::worker::{Launcher, WorkerControl, WorkerTask};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use onebot_shared::Reply;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

pub const ADMIN_ID: i64 = 10001;

/// Settings block every test config starts with
pub const HEADER: &str = "AdminID: 10001
HttpPostHost: 127.0.0.1
HttpPostPort: 5701
HttpAPIURL: http://127.0.0.1:5700";

/// Concatenated values of every reply part
pub fn reply_text(reply: &Reply) -> String {
    reply.parts.iter().map(|p| p.value.as_str()).collect()
}

/// Transport that records sends instead of making HTTP calls
pub struct RecordingTransport {
    online: AtomicBool,
    fail: AtomicBool,
    sent: Mutex<Vec<SendRequest>>,
    cleaned: AtomicU32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            cleaned: AtomicU32::new(0),
        }
    }

    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn cleaned(&self) -> u32 {
        self.cleaned.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn get_status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            online: self.online.load(Ordering::SeqCst),
        })
    }

    async fn send_msg(&self, request: &SendRequest) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("endpoint unavailable");
        }
        self.sent.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn clean_cache(&self) -> Result<()> {
        self.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Recording"
    }
}

/// Worker control with no processes behind it
pub struct NoWorkers;

#[async_trait]
impl WorkerControl for NoWorkers {
    async fn kill_workers(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Runs worker tasks as tokio tasks sharing the test registry
pub struct InlineLauncher {
    bot: BotHandle,
    handles: Mutex<Vec<JoinHandle<()>>>,
    launched: AtomicUsize,
    fail: AtomicBool,
}

impl InlineLauncher {
    pub fn new(bot: BotHandle) -> Self {
        Self {
            bot,
            handles: Mutex::new(Vec::new()),
            launched: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    /// Wait for every launched task, including ones launched meanwhile
    pub async fn join_all(&self) {
        loop {
            let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                handle.await.unwrap();
            }
        }
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Launcher for InlineLauncher {
    fn launch(&self, task: WorkerTask) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("process table full");
        }
        let executor = CommandExecutor::new(self.bot.clone());
        let handle = tokio::spawn(async move {
            executor.run_task(task).await;
        });
        self.handles.lock().unwrap().push(handle);
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// `record`: returns its `message` and remembers it
#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn calls(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Command for Recorder {
    fn declared_params(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn invoke(&self, _bot: &BotHandle, args: ParamBag) -> Result<Option<CommandOutput>> {
        let message = args.str_or("message", "").to_string();
        self.messages.lock().unwrap().push(message.clone());
        Ok(Some(CommandOutput::bare(message)))
    }
}

/// `fail`: always errors
struct Fail;

#[async_trait]
impl Command for Fail {
    fn declared_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, _bot: &BotHandle, _args: ParamBag) -> Result<Option<CommandOutput>> {
        Err(anyhow!("upstream exploded"))
    }
}

/// `panic`: always panics
struct Panic;

#[async_trait]
impl Command for Panic {
    fn declared_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, _bot: &BotHandle, _args: ParamBag) -> Result<Option<CommandOutput>> {
        panic!("command body panicked")
    }
}

/// `gated`: blocks until the test adds a permit
struct Gated {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Command for Gated {
    fn declared_params(&self) -> &'static [&'static str] {
        &[]
    }

    async fn invoke(&self, _bot: &BotHandle, _args: ParamBag) -> Result<Option<CommandOutput>> {
        self.gate.acquire().await?.forget();
        Ok(Some(CommandOutput::bare("opened")))
    }
}

/// A registry built from a YAML document with in-process workers
pub struct Harness {
    pub bot: BotHandle,
    pub transport: Arc<RecordingTransport>,
    pub launcher: Arc<InlineLauncher>,
    pub recorder: Arc<Recorder>,
    pub gate: Arc<Semaphore>,
}

impl Harness {
    pub fn new(yaml: &str) -> Self {
        let config = crate::config::parse(yaml).unwrap();
        let recorder = Arc::new(Recorder::default());
        let gate = Arc::new(Semaphore::new(0));
        let catalog = Catalog::builtin()
            .with("record", recorder.clone())
            .with("fail", Arc::new(Fail))
            .with("panic", Arc::new(Panic))
            .with("gated", Arc::new(Gated { gate: gate.clone() }));

        let registry = Registry::from_config(&config, &catalog).unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let bot = BotHandle::new(
            config.settings(),
            registry,
            Arc::new(catalog),
            transport.clone(),
            Arc::new(NoWorkers),
        )
        .unwrap();
        let launcher = Arc::new(InlineLauncher::new(bot.clone()));

        Self {
            bot,
            transport,
            launcher,
            recorder,
            gate,
        }
    }

    pub fn executor(&self) -> CommandExecutor {
        CommandExecutor::new(self.bot.clone())
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.bot.registry().clone(), self.launcher.clone())
    }

    pub fn scheduler(&self) -> AutoScheduler {
        AutoScheduler::new(self.bot.registry().clone(), self.launcher.clone())
    }
}
