//! Orchestrator context and lifecycle
//!
//! This module handles:
//! - `BotHandle`, the context passed to every command body
//! - Startup: registration, receiver status probe, admin notice
//! - The main loop: webhook intake, scheduler ticks, signal handling
//! - The shutdown drain of Post commands

use crate::command::{CallContext, Catalog, CommandExecutor, CommandKind, Registry};
use crate::config::{BotConfig, BotSettings};
use crate::dispatcher::Dispatcher;
use crate::scheduler::AutoScheduler;
use crate::transport::{HttpTransport, MessageTransport, RetryPolicy, SendRequest};
use crate::webhook;
use crate::worker::{ProcessLauncher, WorkerControl};
use anyhow::{bail, Context, Result};
use onebot_shared::{limits, Reply};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

struct BotInner {
    settings: BotSettings,
    registry: Registry,
    catalog: Arc<Catalog>,
    transport: Arc<dyn MessageTransport>,
    workers: Arc<dyn WorkerControl>,
    http: reqwest::Client,
}

/// Everything a command body may reach: settings, registry, outbound API
/// and worker control
#[derive(Clone)]
pub struct BotHandle {
    inner: Arc<BotInner>,
}

impl BotHandle {
    pub fn new(
        settings: BotSettings,
        registry: Registry,
        catalog: Arc<Catalog>,
        transport: Arc<dyn MessageTransport>,
        workers: Arc<dyn WorkerControl>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(limits::REQUEST_TIMEOUT_MS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            inner: Arc::new(BotInner {
                settings,
                registry,
                catalog,
                transport,
                workers,
                http,
            }),
        })
    }

    pub fn settings(&self) -> &BotSettings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn transport(&self) -> &Arc<dyn MessageTransport> {
        &self.inner.transport
    }

    /// Client for upstream APIs called by command bodies
    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.http
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.inner.settings.admin_id
    }

    /// Deliver a reply; returns whether the endpoint accepted it
    ///
    /// Retries with the configured count, bounded by the send timeout overall.
    pub async fn send_message(&self, reply: &Reply, message_type: &str, target_id: i64) -> bool {
        let request = SendRequest::new(message_type, target_id, reply.to_segments());
        let transport = self.transport();
        let request_ref = &request;
        let policy = RetryPolicy::fixed(self.inner.settings.retry_count);
        let attempt = policy.run("send message", move || async move {
            transport.send_msg(request_ref).await
        });

        match timeout(Duration::from_millis(limits::SEND_TIMEOUT_MS), attempt).await {
            Ok(Ok(())) => {
                info!(
                    "Send message to [{}:{}]: {}",
                    message_type,
                    target_id,
                    reply.summary()
                );
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to send message to [{}:{}]: {:#}", message_type, target_id, e);
                false
            }
            Err(_) => {
                warn!(
                    "Sending message to [{}:{}] timed out after {} ms",
                    message_type,
                    target_id,
                    limits::SEND_TIMEOUT_MS
                );
                false
            }
        }
    }

    /// Ask the endpoint to clear its cache
    pub async fn clean_cache(&self) -> bool {
        let transport = self.transport();
        let policy = RetryPolicy::fixed(self.inner.settings.retry_count);
        match policy
            .run("clean cache", move || async move { transport.clean_cache().await })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("{:#}", e);
                false
            }
        }
    }

    /// The configuration document matching the live registry
    pub async fn get_config(&self) -> Result<BotConfig> {
        let table = self.registry().snapshot().await?;
        Ok(BotConfig::from_parts(self.settings(), &table))
    }

    pub async fn kill_workers(&self) -> Result<usize> {
        self.inner.workers.kill_workers().await
    }
}

/// Check that the message endpoint is up before serving
pub async fn probe_receiver(transport: &dyn MessageTransport, retry_count: u32) -> Result<()> {
    let policy = RetryPolicy::fixed(retry_count);
    let probe = policy.run("reach the message endpoint", move || async move {
        let status = transport.get_status().await?;
        if !status.online {
            bail!("{} endpoint reports offline", transport.name());
        }
        Ok(())
    });

    timeout(Duration::from_millis(limits::STATUS_PROBE_TIMEOUT_MS), probe)
        .await
        .context("Status probe timed out")?
}

/// Run every Post command once, inline and in registry order
///
/// Failures are logged by the executor and never stop the drain. Returns
/// how many commands were run.
pub async fn drain_post_commands(executor: &CommandExecutor) -> usize {
    let table = match executor.bot().registry().snapshot().await {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to read registry for the shutdown drain: {:#}", e);
            return 0;
        }
    };

    let mut drained = 0;
    for (name, _) in table.iter().filter(|(_, d)| d.kind == CommandKind::Post) {
        info!("Running post command '{}'", name);
        let ctx = CallContext::unattended(name, "private", 0);
        executor.handle_command(&ctx, false).await;
        drained += 1;
    }
    drained
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}

/// The main process: owns the registry, the workers and the webhook
pub struct Orchestrator {
    config: BotConfig,
    bot: BotHandle,
    dispatcher: Arc<Dispatcher>,
    scheduler: AutoScheduler,
}

impl Orchestrator {
    /// Register commands and wire the process launcher
    pub fn new(config: BotConfig, debug: bool) -> Result<Self> {
        let catalog = Arc::new(Catalog::builtin());
        let registry = Registry::from_config(&config, &catalog)?;
        let table = registry
            .shared_table()
            .context("Main process registry must own its table")?;

        let settings = config.settings();
        let launcher = Arc::new(ProcessLauncher::new(settings.clone(), table, debug)?);
        let transport = Arc::new(HttpTransport::new(&config.http_api_url)?);
        let bot = BotHandle::new(
            settings,
            registry.clone(),
            catalog,
            transport,
            launcher.clone(),
        )?;

        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(registry.clone(), launcher.clone())),
            scheduler: AutoScheduler::new(registry, launcher),
            config,
            bot,
        })
    }

    /// Serve until a shutdown signal, then drain Post commands
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then drain Post commands
    ///
    /// The shutdown future is armed before the status probe; a signal that
    /// arrives during startup skips straight to the drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = tokio::spawn(shutdown);

        let started = tokio::select! {
            started = self.start() => Some(started?),
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                None
            }
        };

        if let Some(mut server) = started {
            tokio::select! {
                () = self.scheduler.run() => {}
                _ = &mut shutdown => {}
                result = &mut server => match result {
                    Ok(Ok(())) => warn!("Webhook server stopped"),
                    Ok(Err(e)) => error!("Webhook server failed: {:#}", e),
                    Err(e) => error!("Webhook task failed: {}", e),
                },
            }
            server.abort();
        }
        shutdown.abort();

        info!("Shutting down, running post commands");
        let drained = drain_post_commands(&CommandExecutor::new(self.bot.clone())).await;
        debug!("Drained {} post commands", drained);
        info!("Bye");
        Ok(())
    }

    /// Probe the endpoint, send the admin notice and start the webhook
    async fn start(&self) -> Result<JoinHandle<Result<()>>> {
        probe_receiver(self.bot.transport().as_ref(), self.config.retry_count).await?;
        info!("Message endpoint {} is online", self.config.http_api_url);

        if !self.config.notice.is_empty() {
            let notice = Reply::text(self.config.notice.clone());
            self.bot
                .send_message(&notice, "private", self.config.admin_id)
                .await;
        }

        let addr = self.config.webhook_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind webhook on {}", addr))?;
        info!("Webhook listening on {}", addr);
        Ok(tokio::spawn(webhook::serve(listener, self.dispatcher.clone())))
    }
}
