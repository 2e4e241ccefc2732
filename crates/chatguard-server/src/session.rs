//! Conversation session storage

use chatguard_core::{ChatMessage, Persona};
use chatguard_policy::RedFlagMatch;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

/// State of one conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub persona: Persona,

    /// Free-text note collected before the conversation starts
    pub intake: String,

    /// Prior user/assistant turns, oldest first
    pub turns: Vec<ChatMessage>,

    pub created_at: DateTime<Utc>,
    pub flagged: bool,

    /// Most recent red flag raised in this session
    pub flag: Option<RedFlagMatch>,
}

impl Session {
    fn new(persona: Persona, intake: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            persona,
            intake,
            turns: Vec::new(),
            created_at: Utc::now(),
            flagged: false,
            flag: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Storage backend for sessions.
///
/// Each operation is atomic on its own; nothing serializes a read followed by
/// a later write to the same session.
pub trait SessionStore: Send + Sync {
    /// Create a session with an empty history and return it
    fn create(&self, persona: Persona, intake: String) -> Session;

    /// Snapshot of a session
    fn get(&self, id: &str) -> Option<Session>;

    /// Append a user turn followed by an assistant turn
    fn append_turns(&self, id: &str, user_text: &str, assistant_text: &str) -> Result<(), SessionError>;

    /// Mark a session flagged and record the rule that fired
    fn flag(&self, id: &str, flag: RedFlagMatch) -> Result<(), SessionError>;

    /// Remove a session; false if it did not exist
    fn delete(&self, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local session map. Sessions live until deleted.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, persona: Persona, intake: String) -> Session {
        let session = Session::new(persona, intake);
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
        session
    }

    fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    fn append_turns(&self, id: &str, user_text: &str, assistant_text: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.turns.push(ChatMessage::user(user_text));
        session.turns.push(ChatMessage::assistant(assistant_text));
        Ok(())
    }

    fn flag(&self, id: &str, flag: RedFlagMatch) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        session.flagged = true;
        session.flag = Some(flag);
        Ok(())
    }

    fn delete(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}
