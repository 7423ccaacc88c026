//! Per-session conversation history.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use enclave_core::AppResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// Bounded turn list; the oldest turns go first when full.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    max_messages: usize,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        let max_messages = max_messages.max(1);
        Self {
            max_messages,
            turns: VecDeque::with_capacity(max_messages),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_messages {
            self.turns.pop_front();
        }
    }

    pub fn append_exchange(&mut self, user: &str, assistant: &str) {
        self.push(ConversationTurn::user(user));
        self.push(ConversationTurn::assistant(assistant));
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Where session histories live. Durability is up to the implementation.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Last `limit` turns of the session, oldest first. Unknown sessions are
    /// empty.
    async fn recent(&self, session_id: &str, limit: usize) -> AppResult<Vec<ConversationTurn>>;

    /// Append a user turn and its answer as one step.
    async fn append_exchange(&self, session_id: &str, user: &str, assistant: &str) -> AppResult<()>;

    async fn messages(&self, session_id: &str) -> AppResult<Vec<ConversationTurn>>;

    async fn clear(&self, session_id: &str) -> AppResult<()>;
}

/// In-process history, one mutex per session.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    max_messages: usize,
    sessions: RwLock<HashMap<String, Arc<Mutex<ConversationHistory>>>>,
}

impl MemoryHistoryStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            max_messages,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Forget a session entirely.
    pub fn delete_session(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
            .is_some()
    }

    fn existing(&self, session_id: &str) -> Option<Arc<Mutex<ConversationHistory>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    fn get_or_create(&self, session_id: &str) -> Arc<Mutex<ConversationHistory>> {
        if let Some(history) = self.existing(session_id) {
            return history;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session = session_id, "new conversation history");
                Arc::new(Mutex::new(ConversationHistory::new(self.max_messages)))
            })
            .clone()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn recent(&self, session_id: &str, limit: usize) -> AppResult<Vec<ConversationTurn>> {
        Ok(self
            .existing(session_id)
            .map(|h| {
                let history = h.lock().unwrap_or_else(PoisonError::into_inner);
                history.recent(limit)
            })
            .unwrap_or_default())
    }

    async fn append_exchange(&self, session_id: &str, user: &str, assistant: &str) -> AppResult<()> {
        let history = self.get_or_create(session_id);
        let mut history = history.lock().unwrap_or_else(PoisonError::into_inner);
        history.append_exchange(user, assistant);
        tracing::debug!(session = session_id, turns = history.len(), "exchange recorded");
        Ok(())
    }

    async fn messages(&self, session_id: &str) -> AppResult<Vec<ConversationTurn>> {
        Ok(self
            .existing(session_id)
            .map(|h| {
                let history = h.lock().unwrap_or_else(PoisonError::into_inner);
                history.turns().cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> AppResult<()> {
        if let Some(history) = self.existing(session_id) {
            history.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
        Ok(())
    }
}
