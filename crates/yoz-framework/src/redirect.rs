//! Redirect table entries.
//!
//! A redirect routes every event of one conversation (or every event a
//! filter accepts) straight to a single handler, bypassing commands and
//! listeners. Interactive multi-turn flows install one when they start and
//! remove it when they end.

use std::fmt;
use std::sync::Arc;

use yoz_core::event::Conversation;
use yoz_core::InboundEvent;

use crate::handler::BoxedHandler;

/// Shared filter closure.
pub type RedirectFilter = Arc<dyn Fn(&InboundEvent) -> bool + Send + Sync>;

/// Which events a redirect captures.
#[derive(Clone)]
pub enum RedirectPredicate {
    /// Any structured event the closure accepts.
    Filter(RedirectFilter),
    /// Messages from one member of one group.
    Member { group: i64, member: i64 },
    /// Private messages from one contact.
    Contact(i64),
}

impl RedirectPredicate {
    pub fn filter<F>(f: F) -> Self
    where
        F: Fn(&InboundEvent) -> bool + Send + Sync + 'static,
    {
        Self::Filter(Arc::new(f))
    }

    /// Returns `true` if `event` is captured.
    ///
    /// Member and contact predicates only ever match message events.
    pub fn matches(&self, event: &InboundEvent) -> bool {
        match self {
            Self::Filter(f) => f(event),
            Self::Member { group, member } => {
                event.conversation()
                    == Some(Conversation::Member {
                        group: *group,
                        member: *member,
                    })
            }
            Self::Contact(id) => event.conversation() == Some(Conversation::Contact(*id)),
        }
    }

    /// Identity comparison: filters compare by pointer, targets by value.
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Filter(a), Self::Filter(b)) => Arc::ptr_eq(a, b),
            (
                Self::Member { group, member },
                Self::Member {
                    group: g,
                    member: m,
                },
            ) => group == g && member == m,
            (Self::Contact(a), Self::Contact(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Conversation> for RedirectPredicate {
    fn from(conversation: Conversation) -> Self {
        match conversation {
            Conversation::Member { group, member } => Self::Member { group, member },
            Conversation::Contact(id) => Self::Contact(id),
        }
    }
}

impl fmt::Debug for RedirectPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(_) => f.write_str("Filter(..)"),
            Self::Member { group, member } => f
                .debug_struct("Member")
                .field("group", group)
                .field("member", member)
                .finish(),
            Self::Contact(id) => f.debug_tuple("Contact").field(id).finish(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct RedirectEntry {
    pub guid: String,
    pub module: String,
    pub predicate: RedirectPredicate,
    pub handler: BoxedHandler,
}
