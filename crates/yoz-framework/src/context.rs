//! Context handed to every handler invocation.

use std::sync::Arc;

use yoz_core::{ApiResult, BoxedBot, InboundEvent, Message};

use crate::dispatcher::BotSettings;
use crate::error::RegistryResult;
use crate::handler::BoxedHandler;
use crate::redirect::RedirectPredicate;
use crate::registry::Registry;
use crate::session::{SessionKey, SessionStore, SharedSession};

/// Everything a running handler can see and call.
///
/// Redirects and sessions created through the context are owned by the
/// module the handler was registered from.
pub struct HandlerContext {
    event: InboundEvent,
    bot: BoxedBot,
    module_path: String,
    matched_command: Option<String>,
    registry: Arc<Registry>,
    settings: Arc<BotSettings>,
}

impl HandlerContext {
    pub(crate) fn new(
        event: InboundEvent,
        bot: BoxedBot,
        module_path: String,
        matched_command: Option<String>,
        registry: Arc<Registry>,
        settings: Arc<BotSettings>,
    ) -> Self {
        Self {
            event,
            bot,
            module_path,
            matched_command,
            registry,
            settings,
        }
    }

    /// The dispatched event. For commands, its first text segment holds the
    /// arguments with prefix and command already stripped.
    pub fn event(&self) -> &InboundEvent {
        &self.event
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    /// Module path of the plugin that registered the handler.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// The command string that selected this handler, if any.
    pub fn matched_command(&self) -> Option<&str> {
        self.matched_command.as_deref()
    }

    /// Text following the matched command. Empty for non-command handlers.
    pub fn args(&self) -> &str {
        if self.matched_command.is_none() {
            return "";
        }
        self.event
            .message()
            .and_then(Message::first_text)
            .unwrap_or_default()
    }

    pub fn settings(&self) -> &BotSettings {
        &self.settings
    }

    /// Replies in the conversation the event came from.
    pub async fn reply(&self, message: impl Into<Message>) -> ApiResult<i64> {
        self.bot.reply(&self.event, message.into()).await
    }

    // ─── Redirects ───────────────────────────────────────────────────────────

    pub fn redirect(
        &self,
        guid: &str,
        predicate: RedirectPredicate,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        self.registry
            .redirect(&self.module_path, guid, predicate, handler)
    }

    pub fn redirect_member(
        &self,
        guid: &str,
        group: i64,
        member: i64,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        self.redirect(guid, RedirectPredicate::Member { group, member }, handler)
    }

    pub fn redirect_contact(&self, guid: &str, contact: i64, handler: BoxedHandler) -> RegistryResult<()> {
        self.redirect(guid, RedirectPredicate::Contact(contact), handler)
    }

    pub fn unredirect(&self, guid: &str) -> bool {
        self.registry.unredirect(&self.module_path, guid)
    }

    /// Removes this plugin's redirects capturing the event's conversation.
    pub fn unredirect_conversation(&self) -> usize {
        match self.event.conversation() {
            Some(conversation) => {
                let predicate = RedirectPredicate::from(conversation);
                self.registry.unredirect_predicate(&self.module_path, &predicate)
            }
            None => 0,
        }
    }

    // ─── Sessions ────────────────────────────────────────────────────────────

    pub fn sessions(&self) -> &SessionStore {
        self.registry.sessions()
    }

    /// Session key of this event's conversation.
    pub fn session_key(&self) -> Option<SessionKey> {
        self.event.conversation().map(SessionKey::from)
    }

    /// This module's session for this conversation, if one is open.
    pub fn session(&self) -> Option<SharedSession> {
        self.sessions().get(&self.module_path, self.session_key()?)
    }

    /// Opens a fresh session for this conversation.
    pub fn start_session(&self) -> Option<SharedSession> {
        Some(self.sessions().create(&self.module_path, self.session_key()?))
    }

    /// Closes this module's session for this conversation.
    pub fn close_session(&self) -> bool {
        self.session_key()
            .is_some_and(|key| self.sessions().close(&self.module_path, key))
    }

    /// Parses the command arguments with clap.
    ///
    /// Arguments are split shell-style; the matched command is used as the
    /// binary name.
    #[cfg(feature = "command")]
    pub fn parse_args<T: clap::Parser>(&self) -> yoz_core::ParseResult<T> {
        crate::command::parse_args(self.matched_command().unwrap_or_default(), self.args())
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("event", &self.event.event_name())
            .field("module_path", &self.module_path)
            .field("matched_command", &self.matched_command)
            .finish()
    }
}
