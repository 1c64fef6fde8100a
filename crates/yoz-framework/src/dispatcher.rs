//! Event dispatcher.
//!
//! Every structured event takes exactly one route, tried in this order:
//!
//! 1. **Redirect**: the first redirect whose predicate captures the event.
//! 2. **Command**: message events whose first text starts with a command
//!    prefix; the longest registered command in the event's scope wins.
//! 3. **Listeners**: every listener registered for the event name, across
//!    all modules.
//!
//! Matched handlers are submitted to the [`TaskExecutor`] and never run on
//! the caller's task, so [`Dispatcher::dispatch`] returns without waiting for
//! any of them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use yoz_core::{BoxedBot, InboundEvent, TaskExecutor};

use crate::context::HandlerContext;
use crate::handler::{BoxedHandler, invoke};
use crate::registry::Registry;

/// Bot-level settings that shape dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// Name the bot answers to.
    pub nickname: String,
    /// Primary command prefix.
    pub command_prefix: String,
    /// Additional prefixes accepted in place of the primary one.
    pub alt_command_prefixes: Vec<String>,
    /// Senders whose events are dropped before routing.
    pub blocked_senders: Vec<i64>,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            nickname: "猫猫".to_string(),
            command_prefix: ".".to_string(),
            alt_command_prefixes: vec!["。".to_string(), "#".to_string(), "/".to_string()],
            blocked_senders: Vec::new(),
        }
    }
}

impl BotSettings {
    /// Returns the prefix `text` starts with, trying the primary one first.
    pub fn matched_prefix<'a>(&'a self, text: &str) -> Option<&'a str> {
        std::iter::once(&self.command_prefix)
            .chain(&self.alt_command_prefixes)
            .map(String::as_str)
            .find(|prefix| !prefix.is_empty() && text.starts_with(prefix))
    }

    pub fn is_blocked(&self, sender: i64) -> bool {
        self.blocked_senders.contains(&sender)
    }
}

/// Which route an event took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchRoute {
    /// Captured by the redirect with this guid.
    Redirected(String),
    /// Matched this command.
    Command(String),
    /// Fanned out to this many listeners.
    Listeners(usize),
    /// Dropped, blocked, or nothing matched.
    Ignored,
}

/// Routes events to registered handlers.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    executor: TaskExecutor,
    settings: Arc<BotSettings>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, executor: TaskExecutor, settings: Arc<BotSettings>) -> Self {
        Self {
            registry,
            executor,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    pub fn settings(&self) -> &Arc<BotSettings> {
        &self.settings
    }

    /// Parses a raw envelope and dispatches it.
    ///
    /// Malformed envelopes are logged and dropped; unmapped event types are
    /// skipped silently.
    pub fn dispatch_raw(&self, data: &[u8], bot: &BoxedBot) -> DispatchRoute {
        match InboundEvent::parse(data) {
            Ok(Some(event)) => self.dispatch(event, bot),
            Ok(None) => {
                trace!("Skipping unmapped event type");
                DispatchRoute::Ignored
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed event");
                DispatchRoute::Ignored
            }
        }
    }

    /// Routes one event. Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: InboundEvent, bot: &BoxedBot) -> DispatchRoute {
        let event_name = event.event_name();
        if self.settings.is_blocked(event.sender_id()) {
            trace!(event = event_name, sender = event.sender_id(), "Sender blocked");
            return DispatchRoute::Ignored;
        }

        if let Some(redirect) = self.registry.match_redirect(&event) {
            debug!(event = event_name, guid = %redirect.guid, module = %redirect.module, "Redirected");
            let label = format!("{}:redirect:{}", redirect.module, redirect.guid);
            self.submit(label, redirect.module, None, redirect.handler, event, bot);
            return DispatchRoute::Redirected(redirect.guid);
        }

        if let Some((command, module, handler, stripped)) = self.match_command(&event) {
            debug!(event = event_name, command = %command, module = %module, "Command matched");
            let label = format!("{module}:{command}");
            self.submit(label, module, Some(command.clone()), handler, stripped, bot);
            return DispatchRoute::Command(command);
        }

        let listeners = self.registry.listeners(event_name);
        if listeners.is_empty() {
            trace!(event = event_name, "No listeners");
            return DispatchRoute::Ignored;
        }
        let count = listeners.len();
        for listener in listeners {
            let label = format!("{}:{}", listener.module, event_name);
            self.submit(label, listener.module, None, listener.handler, event.clone(), bot);
        }
        trace!(event = event_name, count, "Fanned out to listeners");
        DispatchRoute::Listeners(count)
    }

    /// Resolves a command and builds the event the handler will see.
    fn match_command(
        &self,
        event: &InboundEvent,
    ) -> Option<(String, String, BoxedHandler, InboundEvent)> {
        let scope = event.scope()?;
        let text = event.message()?.first_text()?;
        let prefix = self.settings.matched_prefix(text)?;
        let found = self.registry.match_command(scope, &text[prefix.len()..])?;

        // prefix, command and one separator, counted in characters
        let skip = prefix.chars().count() + found.command.chars().count() + 1;
        let args: String = text.chars().skip(skip).collect();

        let mut stripped = event.clone();
        if let Some(message) = stripped.message_mut() {
            message.set_first_text(args);
        }
        Some((found.command, found.module, found.handler, stripped))
    }

    fn submit(
        &self,
        label: String,
        module: String,
        command: Option<String>,
        handler: BoxedHandler,
        event: InboundEvent,
        bot: &BoxedBot,
    ) {
        let ctx = Arc::new(HandlerContext::new(
            event,
            Arc::clone(bot),
            module,
            command,
            Arc::clone(&self.registry),
            Arc::clone(&self.settings),
        ));
        self.executor.execute(label, invoke(handler, ctx));
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .finish()
    }
}
