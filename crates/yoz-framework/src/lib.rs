//! # Yoz Framework
//!
//! Plugin-facing layer of the yoz chat-bot runtime.
//!
//! This layer provides:
//! - The namespace trie that maps module paths to loaded plugins
//! - The command, listener and redirect registry, shared by every plugin
//! - The [`Dispatcher`] that routes each event to a redirect, a command or
//!   the listeners, in that order
//! - The [`PluginManager`] that discovers, loads, hooks and unloads plugins
//! - Per-conversation sessions and pairwise locks for interactive plugins
//! - Clap-based argument parsing for command handlers (with `command` feature)
//!
//! ```rust,ignore
//! use yoz_framework::prelude::*;
//!
//! #[derive(Default)]
//! struct Ping;
//!
//! #[async_trait::async_trait]
//! impl Plugin for Ping {
//!     async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
//!         ctx.group_command("ping", handler_fn(|ctx: Arc<HandlerContext>| async move {
//!             ctx.reply("pong").await?;
//!             Ok(())
//!         }))?;
//!         Ok(())
//!     }
//! }
//!
//! yoz_framework::export_plugin!("ping", Ping);
//! ```

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod manager;
pub mod namespace;
pub mod pair_lock;
pub mod plugin;
pub mod redirect;
pub mod registry;
pub mod session;

#[cfg(feature = "command")]
pub mod command;

#[doc(hidden)]
pub use linkme;
pub use tower::BoxError;

pub use context::HandlerContext;
pub use dispatcher::{BotSettings, DispatchRoute, Dispatcher};
pub use error::{LifecycleError, LifecycleResult, RegistryError, RegistryResult};
pub use handler::{BoxedHandler, handler_fn};
pub use manager::{LoadReport, PluginManager, PluginSettings};
pub use namespace::NamespaceTree;
pub use pair_lock::{PairGuard, PairLocks, UserGuard};
pub use plugin::{
    HookState, Manifest, PLUGIN_FACTORIES, Plugin, PluginContext, PluginDescriptor, PluginFactory,
};
pub use redirect::{RedirectFilter, RedirectPredicate};
pub use registry::{CommandMatch, ListenerMatch, Ownership, RedirectMatch, Registry};
pub use session::{Session, SessionKey, SessionStore, SharedSession};

#[cfg(feature = "command")]
pub use command::{parse_args, shell_split};

/// Prelude for common imports.
pub mod prelude {
    pub use std::sync::Arc;

    pub use super::{
        BoxError, BoxedHandler, HandlerContext, Plugin, PluginContext, RedirectPredicate,
        SessionKey, handler_fn,
    };
    pub use yoz_core::prelude::*;
}
