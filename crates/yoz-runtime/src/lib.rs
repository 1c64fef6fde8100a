//! Yoz Runtime - Orchestration layer for the yoz chat-bot runtime.
//!
//! This crate provides:
//! - Layered configuration loading with figment (`config`)
//! - Logging setup over `tracing-subscriber` (`logging`)
//! - The [`EventSource`] transport boundary and an in-process [`ChannelSource`]
//! - [`YozRuntime`], which owns the registry, executor, scheduler and plugin
//!   manager and runs the dispatch loop
//!
//! ```ignore
//! use std::sync::Arc;
//! use yoz_runtime::{ChannelSource, YozRuntime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = YozRuntime::builder().build()?;
//!     runtime.load_plugins().await?;
//!
//!     let (tx, source) = ChannelSource::channel(64);
//!     let bot = my_transport::connect(tx).await?;
//!
//!     // Runs until the transport closes or Ctrl+C.
//!     runtime.run(source, bot).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod source;

pub use config::{ConfigError, ConfigLoader, ConfigResult, YozConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RuntimeBuilder, RuntimeStats, YozRuntime};
pub use source::{ChannelSender, ChannelSource, EventSource};

// Re-export tracing for use by plugins
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the commonly used logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
