//! Runtime orchestration and the dispatch loop.
//!
//! [`YozRuntime`] wires the pieces together: one [`Registry`] shared by every
//! plugin, one [`TaskExecutor`] that runs handlers and scheduled callbacks,
//! the root [`Scheduler`], the [`PluginManager`] and the [`Dispatcher`].
//! [`run`](YozRuntime::run) then pumps an [`EventSource`] until it closes,
//! a shutdown is requested or reconnecting gives up.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use yoz_runtime::{ChannelSource, YozRuntime};
//!
//! let runtime = YozRuntime::builder()
//!     .config_file("yoz.toml")
//!     .build()?;
//! runtime.load_plugins().await?;
//!
//! let (tx, source) = ChannelSource::channel(64);
//! // hand `tx` to the transport
//! runtime.run(source, bot).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, trace_span, warn};
use yoz_core::{BoxedBot, ExecutorStats, Scheduler, TaskExecutor, TransportError};
use yoz_framework::{DispatchRoute, Dispatcher, LoadReport, PluginManager, Registry};

use crate::config::{ConfigLoader, YozConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::source::EventSource;

/// Counters kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Envelopes received from the event source.
    pub events_received: u64,
    /// Envelopes that were malformed, blocked or matched nothing.
    pub events_dropped: u64,
    /// Envelopes routed to at least one handler.
    pub dispatched: u64,
    /// Successful reconnects of the event source.
    pub reconnects: u64,
}

#[derive(Default)]
struct StatsCounters {
    events_received: AtomicU64,
    events_dropped: AtomicU64,
    dispatched: AtomicU64,
    reconnects: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> RuntimeStats {
        RuntimeStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

/// The yoz runtime.
///
/// Must be created inside a tokio runtime: the root scheduler spawns its
/// timeline task on construction.
pub struct YozRuntime {
    config: YozConfig,
    registry: Arc<Registry>,
    executor: TaskExecutor,
    scheduler: Scheduler,
    plugins: Arc<PluginManager>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    running: AtomicBool,
    stats: StatsCounters,
}

impl YozRuntime {
    /// Creates a runtime builder that searches the current directory for
    /// configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration and initializes logging from it.
    pub fn from_config(config: YozConfig) -> Self {
        logging::init_from_config(&config.logging);
        Self::assemble(config)
    }

    fn assemble(config: YozConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let executor = TaskExecutor::new(config.executor.to_executor_config());
        let scheduler = Scheduler::new("root", executor.clone());
        let bot = Arc::new(config.bot.clone());
        let plugins = Arc::new(PluginManager::new(
            Arc::clone(&registry),
            executor.clone(),
            Arc::clone(&bot),
            config.plugins.to_plugin_settings(),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), executor.clone(), bot);

        info!(
            log_level = %config.logging.level,
            command_prefix = %config.bot.command_prefix,
            task_timeout_ms = config.executor.task_timeout_ms,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry,
            executor,
            scheduler,
            plugins,
            dispatcher,
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
            stats: StatsCounters::default(),
        }
    }

    pub fn config(&self) -> &YozConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// The root timeline. Plugins get their own from the plugin manager.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.snapshot()
    }

    pub fn executor_stats(&self) -> ExecutorStats {
        self.executor.stats()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Loads every plugin under the configured plugin directory.
    ///
    /// A missing directory loads nothing.
    pub async fn load_plugins(&self) -> RuntimeResult<LoadReport> {
        let directory = &self.config.plugins.directory;
        if !is_dir(directory).await {
            warn!(path = %directory.display(), "Plugin directory not found, no plugins loaded");
            return Ok(LoadReport::default());
        }
        Ok(self.plugins.load_all(directory).await?)
    }

    /// Asks a running [`run`](Self::run) to stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Pumps `source` until it closes, Ctrl+C/SIGTERM arrives or
    /// [`shutdown`](Self::shutdown) is called.
    pub async fn run<S: EventSource>(&self, source: S, bot: BoxedBot) -> RuntimeResult<()> {
        info!("Yoz runtime is now running. Press Ctrl+C to stop.");
        self.run_until(source, bot, wait_for_signal()).await
    }

    /// Like [`run`](Self::run) with a custom shutdown future instead of
    /// process signals.
    ///
    /// On exit every plugin is unloaded and the root scheduler is stopped, so
    /// a runtime runs at most once.
    pub async fn run_until<S, F>(&self, mut source: S, bot: BoxedBot, signal: F) -> RuntimeResult<()>
    where
        S: EventSource,
        F: Future<Output = ()>,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Err(RuntimeError::AlreadyRunning);
        }

        let result = tokio::select! {
            result = self.pump(&mut source, &bot) => result,
            _ = self.shutdown.cancelled() => {
                info!("Shutdown requested");
                Ok(())
            }
            _ = signal => Ok(()),
        };

        self.stop().await;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn stop(&self) {
        info!("Stopping yoz runtime");
        self.plugins.shutdown().await;
        self.scheduler.shutdown();
        let stats = self.stats();
        info!(
            received = stats.events_received,
            dispatched = stats.dispatched,
            dropped = stats.events_dropped,
            "Runtime stopped"
        );
    }

    async fn pump<S: EventSource>(&self, source: &mut S, bot: &BoxedBot) -> RuntimeResult<()> {
        loop {
            match source.recv().await {
                Ok(frame) => self.handle_frame(&frame, bot),
                Err(TransportError::Closed) => {
                    info!("Event source closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "Event source disconnected");
                    if !self.reconnect(source, e).await? {
                        info!("Event source closed while reconnecting");
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_frame(&self, frame: &[u8], bot: &BoxedBot) {
        let seq = self.stats.events_received.fetch_add(1, Ordering::Relaxed) + 1;
        let _span = trace_span!("event", seq).entered();

        match self.dispatcher.dispatch_raw(frame, bot) {
            DispatchRoute::Ignored => {
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
            route => {
                trace!(route = ?route, "Event routed");
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Retries with exponential backoff. `Ok(false)` means the source closed.
    async fn reconnect<S: EventSource>(
        &self,
        source: &mut S,
        cause: TransportError,
    ) -> RuntimeResult<bool> {
        let retry = &self.config.transport.retry;
        let mut last_error = cause;

        for attempt in 0..retry.max_retries {
            let delay = retry.delay_for(attempt);
            debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting event source"
            );
            tokio::time::sleep(delay).await;

            match source.reconnect().await {
                Ok(()) => {
                    info!(attempt = attempt + 1, "Event source reconnected");
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    return Ok(true);
                }
                Err(TransportError::Closed) => return Ok(false),
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Reconnect failed");
                    last_error = e;
                }
            }
        }

        Err(RuntimeError::ReconnectExhausted {
            attempts: retry.max_retries,
            last_error,
        })
    }
}

impl std::fmt::Debug for YozRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YozRuntime")
            .field("running", &self.is_running())
            .field("stats", &self.stats())
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_dir())
}

/// Waits for Ctrl+C (or SIGTERM on unix).
///
/// If no handler can be installed this never resolves.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a [`YozRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = YozRuntime::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            init_logging: true,
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: YozConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Leaves the global subscriber alone, for embedders that install their own.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Loads configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<YozRuntime> {
        let config = self.config_loader.load()?;
        if self.init_logging {
            Ok(YozRuntime::from_config(config))
        } else {
            Ok(YozRuntime::assemble(config))
        }
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use yoz_core::{ApiResult, Bot, Message};
    use yoz_framework::{
        BoxError, HandlerContext, Plugin, PluginContext, PluginFactory, handler_fn,
    };

    use crate::config::RetryConfig;
    use crate::source::{ChannelSender, ChannelSource};

    #[derive(Default)]
    struct MockBot {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Bot for MockBot {
        fn id(&self) -> &str {
            "mock"
        }

        async fn send_group_message(&self, _group: i64, message: Message) -> ApiResult<i64> {
            self.sent.lock().push(message.plain_text());
            Ok(1)
        }

        async fn send_contact_message(&self, _contact: i64, message: Message) -> ApiResult<i64> {
            self.sent.lock().push(message.plain_text());
            Ok(2)
        }

        async fn recall(&self, _message_id: i64) -> ApiResult<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Echo;

    #[async_trait]
    impl Plugin for Echo {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.group_command(
                "echo",
                handler_fn(|ctx: Arc<HandlerContext>| async move {
                    ctx.reply(ctx.args()).await?;
                    Ok::<(), BoxError>(())
                }),
            )?;
            ctx.group_command(
                "boom",
                handler_fn(|_ctx: Arc<HandlerContext>| async move {
                    Err::<(), BoxError>("boom".into())
                }),
            )?;
            Ok(())
        }
    }

    fn group_frame(text: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "GroupMessage",
            "sender": {
                "id": 7, "memberName": "m", "permission": "MEMBER",
                "group": {"id": 100, "name": "g", "permission": "MEMBER"}
            },
            "messageChain": [
                {"type": "Source", "id": 1, "time": 0},
                {"type": "Plain", "text": text}
            ]
        }))
        .unwrap()
    }

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_multiplier: 2.0,
        }
    }

    fn runtime_with_echo() -> YozRuntime {
        let mut config = YozConfig::default();
        config.transport.retry = fast_retry(2);
        let runtime = YozRuntime::assemble(config);
        runtime.plugins().register_factory(PluginFactory {
            name: "echo",
            create: || Box::new(Echo),
        });
        runtime
    }

    async fn install_echo(runtime: &YozRuntime) {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("echo");
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("manifest.json"), r#"{"name": "echo"}"#).unwrap();
        runtime
            .plugins()
            .load_dir("module", &plugin_dir)
            .await
            .unwrap();
    }

    async fn send(tx: &ChannelSender, frame: Vec<u8>) {
        tx.send(Ok(frame)).await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_loop_survives_failures_and_malformed_input() {
        let runtime = runtime_with_echo();
        install_echo(&runtime).await;
        let bot = Arc::new(MockBot::default());
        let mut reports = runtime.executor().subscribe();

        let (tx, source) = ChannelSource::channel(8);
        send(&tx, group_frame(".boom")).await;
        send(&tx, b"{not json".to_vec()).await;
        send(&tx, group_frame("no prefix here")).await;
        send(&tx, group_frame(".echo hello")).await;
        drop(tx);

        runtime
            .run_until(source, bot.clone(), std::future::pending())
            .await
            .unwrap();

        // Both handlers were submitted before the source closed.
        for _ in 0..2 {
            reports.recv().await.unwrap();
        }
        assert_eq!(*bot.sent.lock(), ["hello"]);

        let stats = runtime.stats();
        assert_eq!(stats.events_received, 4);
        assert_eq!(stats.dispatched, 2);
        assert_eq!(stats.events_dropped, 2);

        let executed = runtime.executor_stats();
        assert_eq!(executed.success, 1);
        assert_eq!(executed.failure, 1);
    }

    #[tokio::test]
    async fn test_exit_unloads_plugins_and_stops_scheduler() {
        let runtime = runtime_with_echo();
        install_echo(&runtime).await;
        runtime
            .scheduler()
            .add("later", Duration::from_secs(3600), || async { Ok(()) });
        assert_eq!(runtime.registry().command_names(yoz_core::Scope::Group).len(), 2);

        let (tx, source) = ChannelSource::channel(1);
        drop(tx);
        runtime
            .run_until(source, Arc::new(MockBot::default()), std::future::pending())
            .await
            .unwrap();

        assert!(runtime.plugins().descriptors().is_empty());
        assert!(runtime.registry().command_names(yoz_core::Scope::Group).is_empty());
        assert!(!runtime.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_reconnects_and_resumes() {
        let runtime = runtime_with_echo();
        install_echo(&runtime).await;
        let bot = Arc::new(MockBot::default());
        let mut reports = runtime.executor().subscribe();

        let (tx, source) = ChannelSource::channel(8);
        tx.send(Err(TransportError::disconnected("reset"))).await.unwrap();
        send(&tx, group_frame(".echo back")).await;
        drop(tx);

        runtime
            .run_until(source, bot.clone(), std::future::pending())
            .await
            .unwrap();

        reports.recv().await.unwrap();
        assert_eq!(*bot.sent.lock(), ["back"]);
        assert_eq!(runtime.stats().reconnects, 1);
    }

    struct FlakySource {
        failures: u32,
    }

    #[async_trait]
    impl EventSource for FlakySource {
        async fn recv(&mut self) -> yoz_core::TransportResult<Vec<u8>> {
            Err(TransportError::disconnected("down"))
        }

        async fn reconnect(&mut self) -> yoz_core::TransportResult<()> {
            self.failures += 1;
            Err(TransportError::disconnected("still down"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gives_up_after_max_retries() {
        let runtime = runtime_with_echo();
        let result = runtime
            .run_until(
                FlakySource { failures: 0 },
                Arc::new(MockBot::default()),
                std::future::pending(),
            )
            .await;

        assert!(matches!(
            result,
            Err(RuntimeError::ReconnectExhausted { attempts: 2, .. })
        ));
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_loop() {
        let runtime = Arc::new(runtime_with_echo());
        let (_tx, source) = ChannelSource::channel(1);

        let handle = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .run_until(source, Arc::new(MockBot::default()), std::future::pending())
                    .await
            }
        });

        while !runtime.is_running() {
            tokio::task::yield_now().await;
        }
        runtime.shutdown();
        handle.await.unwrap().unwrap();
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let runtime = Arc::new(runtime_with_echo());
        let (_tx, source) = ChannelSource::channel(1);

        let first = tokio::spawn({
            let runtime = Arc::clone(&runtime);
            async move {
                runtime
                    .run_until(source, Arc::new(MockBot::default()), std::future::pending())
                    .await
            }
        });
        while !runtime.is_running() {
            tokio::task::yield_now().await;
        }

        let (_tx2, source2) = ChannelSource::channel(1);
        let second = runtime
            .run_until(source2, Arc::new(MockBot::default()), std::future::ready(()))
            .await;
        assert!(matches!(second, Err(RuntimeError::AlreadyRunning)));

        runtime.shutdown();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_plugin_directory_loads_nothing() {
        let mut config = YozConfig::default();
        config.plugins.directory = "/nonexistent/yoz/module".into();
        let runtime = YozRuntime::assemble(config);

        let report = runtime.load_plugins().await.unwrap();
        assert!(report.loaded.is_empty() && report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_load_plugins_from_configured_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("module");
        std::fs::create_dir_all(root.join("echo")).unwrap();
        std::fs::write(root.join("echo/manifest.json"), r#"{"name": "echo"}"#).unwrap();

        let mut config = YozConfig::default();
        config.plugins.directory = root;
        let runtime = YozRuntime::assemble(config);
        runtime.plugins().register_factory(PluginFactory {
            name: "echo",
            create: || Box::new(Echo),
        });

        let report = runtime.load_plugins().await.unwrap();
        assert_eq!(report.loaded, ["module.echo"]);
    }
}
