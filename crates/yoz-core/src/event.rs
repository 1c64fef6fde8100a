//! Inbound event model.
//!
//! The transport collaborator hands the core raw JSON envelopes. This module
//! turns the envelope types the core understands into structured
//! [`InboundEvent`]s and normalises gateway quirks on the way:
//!
//! - permission strings are folded into [`Permission`] regardless of case,
//! - `TempMessage` (a private message through a group) becomes a
//!   contact-scope `FriendMessage`.
//!
//! Envelope types without a structured mapping are not errors; parsing
//! yields `None` and the dispatcher ignores them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ParseError, ParseResult};
use crate::message::Message;

/// Listener name of group message events.
pub const GROUP_MESSAGE: &str = "GroupMessage";
/// Listener name of contact (friend and temporary) message events.
pub const FRIEND_MESSAGE: &str = "FriendMessage";
/// Wire name of temporary session messages. Never dispatched under this name.
pub const TEMP_MESSAGE: &str = "TempMessage";
/// Listener name of group recall events.
pub const GROUP_RECALL: &str = "GroupRecallEvent";

// ============================================================================
// Entities
// ============================================================================

/// Permission level of a member, or of the bot inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Permission {
    Owner,
    Admin,
    Member,
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OWNER" => Ok(Self::Owner),
            "ADMINISTRATOR" | "ADMIN" => Ok(Self::Admin),
            "MEMBER" => Ok(Self::Member),
            other => Err(format!("unknown permission '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A group, as seen from one of its members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    /// The bot's own permission in this group.
    pub permission: Permission,
}

/// A group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    #[serde(rename = "memberName")]
    pub name: String,
    pub permission: Permission,
    pub group: Group,
}

/// A private-chat contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: i64,
    pub nickname: String,
    pub remark: String,
    /// Set when the conversation is a temporary session through a group.
    pub from_group: Option<i64>,
}

// ============================================================================
// Events
// ============================================================================

/// A message posted in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupMessage {
    pub sender: Member,
    pub message: Message,
}

impl GroupMessage {
    /// The group the message was posted in.
    pub fn group(&self) -> &Group {
        &self.sender.group
    }
}

/// A private message from a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactMessage {
    pub sender: Contact,
    pub message: Message,
}

/// A message recalled inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupRecall {
    pub operator: Member,
    pub author_id: Option<i64>,
    pub message_id: i64,
    pub time: i64,
}

/// The scope a command is registered in and a message arrives through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Group,
    Contact,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => f.write_str("group"),
            Self::Contact => f.write_str("contact"),
        }
    }
}

/// The conversation a message event belongs to.
///
/// Used to match redirects and to key interactive sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conversation {
    Member { group: i64, member: i64 },
    Contact(i64),
}

/// A structured inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InboundEvent {
    GroupMessage(GroupMessage),
    ContactMessage(ContactMessage),
    GroupRecall(GroupRecall),
}

impl InboundEvent {
    /// Parses a raw JSON envelope.
    ///
    /// Returns `Ok(None)` for envelope types without a structured mapping.
    pub fn parse(data: &[u8]) -> ParseResult<Option<Self>> {
        let value: Value = serde_json::from_slice(data)?;
        Self::from_value(value)
    }

    /// Converts an already decoded envelope.
    pub fn from_value(value: Value) -> ParseResult<Option<Self>> {
        let name = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::envelope("<unknown>", "missing string field 'type'"))?
            .to_string();

        let event = match name.as_str() {
            GROUP_MESSAGE => {
                let wire: WireGroupMessage = decode(&name, value)?;
                Self::GroupMessage(GroupMessage {
                    sender: wire.sender,
                    message: wire.message_chain,
                })
            }
            FRIEND_MESSAGE => {
                let wire: WireFriendMessage = decode(&name, value)?;
                Self::ContactMessage(ContactMessage {
                    sender: Contact {
                        id: wire.sender.id,
                        nickname: wire.sender.nickname,
                        remark: wire.sender.remark,
                        from_group: wire.sender.group.map(|g| g.id),
                    },
                    message: wire.message_chain,
                })
            }
            TEMP_MESSAGE => {
                let wire: WireGroupMessage = decode(&name, value)?;
                Self::ContactMessage(ContactMessage {
                    sender: Contact {
                        id: wire.sender.id,
                        nickname: wire.sender.name,
                        remark: String::new(),
                        from_group: Some(wire.sender.group.id),
                    },
                    message: wire.message_chain,
                })
            }
            GROUP_RECALL => {
                let wire: WireGroupRecall = decode(&name, value)?;
                Self::GroupRecall(GroupRecall {
                    operator: wire.operator,
                    author_id: wire.author_id,
                    message_id: wire.message_id,
                    time: wire.time,
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// Listener name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::GroupMessage(_) => GROUP_MESSAGE,
            Self::ContactMessage(_) => FRIEND_MESSAGE,
            Self::GroupRecall(_) => GROUP_RECALL,
        }
    }

    /// Command scope of message events.
    pub fn scope(&self) -> Option<Scope> {
        match self {
            Self::GroupMessage(_) => Some(Scope::Group),
            Self::ContactMessage(_) => Some(Scope::Contact),
            Self::GroupRecall(_) => None,
        }
    }

    /// Returns true for message events.
    pub fn is_message(&self) -> bool {
        self.scope().is_some()
    }

    /// The conversation a message event belongs to.
    pub fn conversation(&self) -> Option<Conversation> {
        match self {
            Self::GroupMessage(m) => Some(Conversation::Member {
                group: m.sender.group.id,
                member: m.sender.id,
            }),
            Self::ContactMessage(m) => Some(Conversation::Contact(m.sender.id)),
            Self::GroupRecall(_) => None,
        }
    }

    /// Id of the user who caused the event.
    pub fn sender_id(&self) -> i64 {
        match self {
            Self::GroupMessage(m) => m.sender.id,
            Self::ContactMessage(m) => m.sender.id,
            Self::GroupRecall(r) => r.operator.id,
        }
    }

    /// Group the event happened in, if any.
    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::GroupMessage(m) => Some(m.sender.group.id),
            Self::ContactMessage(_) => None,
            Self::GroupRecall(r) => Some(r.operator.group.id),
        }
    }

    /// The message carried by message events.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::GroupMessage(m) => Some(&m.message),
            Self::ContactMessage(m) => Some(&m.message),
            Self::GroupRecall(_) => None,
        }
    }

    /// Mutable access to the carried message.
    pub fn message_mut(&mut self) -> Option<&mut Message> {
        match self {
            Self::GroupMessage(m) => Some(&mut m.message),
            Self::ContactMessage(m) => Some(&mut m.message),
            Self::GroupRecall(_) => None,
        }
    }
}

// ============================================================================
// Wire shapes
// ============================================================================

fn decode<T: serde::de::DeserializeOwned>(event: &str, value: Value) -> ParseResult<T> {
    serde_json::from_value(value).map_err(|e| ParseError::envelope(event, e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroupMessage {
    sender: Member,
    message_chain: Message,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFriendMessage {
    sender: WireFriend,
    message_chain: Message,
}

#[derive(Deserialize)]
struct WireFriend {
    id: i64,
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    remark: String,
    #[serde(default)]
    group: Option<WireGroupRef>,
}

#[derive(Deserialize)]
struct WireGroupRef {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGroupRecall {
    operator: Member,
    #[serde(default)]
    author_id: Option<i64>,
    message_id: i64,
    time: i64,
}
