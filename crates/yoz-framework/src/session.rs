//! Per-conversation session store.
//!
//! A session is the step counter and variable bag behind a redirect-driven
//! interactive flow. Sessions live in memory only; a restart drops them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use yoz_core::event::Conversation;

/// Which conversation a session belongs to, within one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Contact(i64),
    Member { group: i64, member: i64 },
}

impl From<Conversation> for SessionKey {
    fn from(conversation: Conversation) -> Self {
        match conversation {
            Conversation::Member { group, member } => Self::Member { group, member },
            Conversation::Contact(id) => Self::Contact(id),
        }
    }
}

/// Step counter plus free-form variables.
#[derive(Debug, Clone, Default)]
pub struct Session {
    step: u32,
    variables: HashMap<String, Value>,
}

impl Session {
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Advances one step and returns the new step.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u32 {
        self.step += 1;
        self.step
    }

    /// Goes back one step, never below zero.
    pub fn prev(&mut self) -> u32 {
        self.step = self.step.saturating_sub(1);
        self.step
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Reads a variable as `T`. Missing or mistyped values are `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.variables
            .get(key)
            .and_then(|v| T::deserialize(v).ok())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.variables.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.variables.remove(key)
    }

    /// Snapshot of every variable.
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.variables.clone()
    }
}

/// Shared handle to a live session.
pub type SharedSession = Arc<Mutex<Session>>;

/// All live sessions, keyed by owning module and conversation.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<(String, SessionKey), SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh session, replacing any existing one.
    pub fn create(&self, module: &str, key: SessionKey) -> SharedSession {
        let session = SharedSession::default();
        self.sessions
            .lock()
            .insert((module.to_string(), key), Arc::clone(&session));
        session
    }

    pub fn get(&self, module: &str, key: SessionKey) -> Option<SharedSession> {
        self.sessions.lock().get(&(module.to_string(), key)).cloned()
    }

    pub fn get_or_create(&self, module: &str, key: SessionKey) -> SharedSession {
        Arc::clone(
            self.sessions
                .lock()
                .entry((module.to_string(), key))
                .or_default(),
        )
    }

    /// Ends a session. Returns `false` if none was open.
    pub fn close(&self, module: &str, key: SessionKey) -> bool {
        self.sessions
            .lock()
            .remove(&(module.to_string(), key))
            .is_some()
    }

    /// Ends every session owned by `module` and returns how many were open.
    pub fn close_module(&self, module: &str) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|(owner, _), _| owner != module);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_never_goes_below_zero() {
        let mut session = Session::default();
        assert_eq!(session.prev(), 0);
        assert_eq!(session.next(), 1);
        assert_eq!(session.next(), 2);
        assert_eq!(session.prev(), 1);
        assert_eq!(session.prev(), 0);
        assert_eq!(session.prev(), 0);
    }

    #[test]
    fn test_variables() {
        let mut session = Session::default();
        assert!(session.set("answer", 42).is_none());
        session.set("name", "cat");
        assert_eq!(session.get("answer"), Some(&json!(42)));
        assert_eq!(session.get_as::<i64>("answer"), Some(42));
        assert_eq!(session.get_as::<i64>("name"), None);
        assert_eq!(session.get_all().len(), 2);
        assert_eq!(session.remove("name"), Some(json!("cat")));
        assert!(session.get("name").is_none());
    }

    #[test]
    fn test_store_is_scoped_by_module_and_conversation() {
        let store = SessionStore::new();
        let key = SessionKey::Member {
            group: 1,
            member: 2,
        };

        store.create("module.quiz", key).lock().next();
        assert_eq!(store.get("module.quiz", key).unwrap().lock().step(), 1);
        assert!(store.get("module.other", key).is_none());
        assert!(store.get("module.quiz", SessionKey::Contact(2)).is_none());

        // create replaces
        assert_eq!(store.create("module.quiz", key).lock().step(), 0);
        assert_eq!(store.get_or_create("module.quiz", key).lock().step(), 0);

        assert!(store.close("module.quiz", key));
        assert!(!store.close("module.quiz", key));
    }

    #[test]
    fn test_close_module() {
        let store = SessionStore::new();
        store.create("module.a", SessionKey::Contact(1));
        store.create("module.a", SessionKey::Contact(2));
        store.create("module.b", SessionKey::Contact(1));

        assert_eq!(store.close_module("module.a"), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get("module.b", SessionKey::Contact(1)).is_some());
    }
}
