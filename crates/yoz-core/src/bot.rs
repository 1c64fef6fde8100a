//! Outbound bot API.
//!
//! The wire transport is an external collaborator; the core only needs a
//! handle that handlers can use to talk back to the gateway.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ApiError, ApiResult};
use crate::event::InboundEvent;
use crate::message::Message;

/// An authenticated gateway session that can send messages.
///
/// Implemented by transport adapters. Every handler invocation receives the
/// bot the triggering event arrived through.
#[async_trait]
pub trait Bot: Send + Sync + 'static {
    /// Returns the bot's account identifier.
    fn id(&self) -> &str;

    /// Sends a message to a group. Returns the gateway message id.
    async fn send_group_message(&self, group: i64, message: Message) -> ApiResult<i64>;

    /// Sends a private message to a contact. Returns the gateway message id.
    async fn send_contact_message(&self, contact: i64, message: Message) -> ApiResult<i64>;

    /// Recalls a previously sent message.
    async fn recall(&self, message_id: i64) -> ApiResult<()>;

    /// Replies in the conversation `event` came from.
    ///
    /// Group messages are answered in the group, contact messages privately.
    /// Events that belong to no conversation cannot be replied to.
    async fn reply(&self, event: &InboundEvent, message: Message) -> ApiResult<i64> {
        match event {
            InboundEvent::GroupMessage(m) => self.send_group_message(m.sender.group.id, message).await,
            InboundEvent::ContactMessage(m) => self.send_contact_message(m.sender.id, message).await,
            InboundEvent::GroupRecall(_) => Err(ApiError::Rejected {
                code: -1,
                message: "recall events have no reply target".into(),
            }),
        }
    }
}

/// A shared bot handle.
pub type BoxedBot = Arc<dyn Bot>;
