//! # Yoz Core
//!
//! The protocol-facing building blocks of the yoz chat-bot runtime.
//!
//! This crate has no notion of plugins or commands. It provides:
//!
//! - **Events**: the normalized inbound event model ([`InboundEvent`]) and
//!   the message chain it carries ([`Message`], [`Segment`])
//! - **Bot**: the outbound API surface handlers talk to ([`Bot`])
//! - **Executor**: fire-and-forget task execution with failure and timeout
//!   isolation ([`TaskExecutor`])
//! - **Scheduler**: a time-ordered callback queue driven by one background
//!   task ([`Scheduler`])
//!
//! ```text
//! raw bytes ──▶ InboundEvent::parse ──▶ (framework dispatch) ──▶ TaskExecutor
//!                                                                    ▲
//!                                    Scheduler (timeline) ───────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use yoz_core::{Scheduler, TaskExecutor};
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = TaskExecutor::default();
//!     let timeline = Scheduler::new("main", executor.clone());
//!
//!     timeline.add("greet", Duration::from_secs(5), || async {
//!         println!("five seconds later");
//!         Ok(())
//!     });
//! }
//! ```

pub mod bot;
pub mod error;
pub mod event;
pub mod executor;
pub mod message;
pub mod scheduler;

/// Type-erased error returned by handlers and scheduled callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use futures::future::BoxFuture;

pub use bot::{Bot, BoxedBot};
pub use error::{
    ApiError, ApiResult, ParseError, ParseResult, TransportError, TransportResult,
};
pub use event::{
    Contact, ContactMessage, Conversation, Group, GroupMessage, GroupRecall, InboundEvent, Member,
    Permission, Scope,
};
pub use executor::{
    DEFAULT_TASK_TIMEOUT, ExecutionOutcome, ExecutionReport, ExecutorConfig, ExecutorStats,
    TaskExecutor,
};
pub use message::{Message, Segment};
pub use scheduler::{ScheduledCallback, Scheduler};

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        BoxError, BoxFuture, Bot, BoxedBot, InboundEvent, Message, Scheduler, Scope, Segment,
        TaskExecutor,
    };
}
