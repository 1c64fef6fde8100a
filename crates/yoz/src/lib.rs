//! # Yoz
//!
//! An extensible chat-bot runtime: events come in from a gateway, are routed
//! to plugin handlers, and plugins can be loaded, unhooked and reloaded while
//! the bot keeps running.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐  redirect ─┐
//! │ EventSource │────▶│ Dispatcher │──command ──┼──▶ TaskExecutor ──▶ handler (own task, bounded wait)
//! └─────────────┘     └────────────┘  listeners ┘          ▲
//!                           │                              │
//!                      ┌────▼─────┐                  ┌─────┴─────┐
//!                      │ Registry │◀── PluginManager │ Scheduler │
//!                      └──────────┘                  └───────────┘
//! ```
//!
//! - **Runtime**: loads configuration, sets up logging, runs the dispatch loop
//! - **Dispatcher**: redirect, then longest command, then listener fan-out
//! - **Registry**: namespace trie of plugins plus command, listener and
//!   redirect tables behind one lock
//! - **Executor**: every handler runs in its own task; failures and timeouts
//!   are logged, never propagated
//! - **Scheduler**: a time-ordered queue of callbacks with lazy cancellation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use yoz::prelude::*;
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Ping {
//!     async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.group_command("ping", handler_fn(|ctx: Arc<HandlerContext>| async move {
//!             ctx.reply("pong").await?;
//!             Ok::<(), BoxError>(())
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! yoz::framework::export_plugin!("ping", Ping);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = YozRuntime::builder().build()?;
//!     runtime.load_plugins().await?;
//!
//!     let (tx, source) = ChannelSource::channel(64);
//!     let bot = my_transport::connect(tx).await?;
//!     runtime.run(source, bot).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `command` *(default)*: clap-based argument parsing in handlers
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use yoz_core as core;
pub use yoz_framework as framework;
pub use yoz_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use yoz::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use yoz_runtime::{ChannelSource, EventSource, YozRuntime};

    // Plugin system
    pub use yoz_framework::prelude::*;
    pub use yoz_framework::{BotSettings, PluginFactory, SessionStore};

    // Logging macros
    pub use yoz_runtime::prelude::*;
}
