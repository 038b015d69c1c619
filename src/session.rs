//! Per-session conversation state.
//!
//! A [`ChatSession`] owns the ordered, append-only message history and a
//! lazily-opened handle to the similarity index. Sessions are passed
//! explicitly to the pipeline; nothing here is process-global.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::db;
use crate::models::ChatMessage;

pub struct ChatSession {
    pub id: String,
    messages: Vec<ChatMessage>,
    index: Option<SqlitePool>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            messages: Vec::new(),
            index: None,
        }
    }

    /// The full ordered history. Entries are never mutated or removed.
    pub fn history(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// The cached index handle, opened from `db_path` on first use.
    /// Fails when no index exists at that path.
    pub async fn index(&mut self, db_path: &Path) -> Result<&SqlitePool> {
        if self.index.is_none() {
            self.index = Some(db::open_existing(db_path).await?);
        }
        Ok(self.index.as_ref().unwrap())
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-side registry of live sessions.
///
/// Lookup is guarded by a short-lived std mutex; each session carries its
/// own async mutex so one turn at a time runs per session while different
/// sessions proceed concurrently.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<ChatSession>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session and return its id.
    pub fn create(&self) -> String {
        let session = ChatSession::new();
        let id = session.id.clone();
        self.sessions
            .lock()
            .expect("session map poisoned")
            .insert(id.clone(), Arc::new(tokio::sync::Mutex::new(session)));
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<tokio::sync::Mutex<ChatSession>>> {
        self.sessions
            .lock()
            .expect("session map poisoned")
            .get(id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_history_is_append_only_and_ordered() {
        let mut session = ChatSession::new();
        session.push(ChatMessage::user("first"));
        session.push(ChatMessage::assistant("second"));
        session.push(ChatMessage::user("third"));

        let history = session.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[2].content, "third");
    }

    #[test]
    fn test_completed_turn_appends_exactly_two() {
        let mut session = ChatSession::new();
        let before = session.history().len();
        session.push(ChatMessage::user("what's a good breakfast?"));
        session.push(ChatMessage::assistant("Oats with whey and berries."));
        assert_eq!(session.history().len(), before + 2);
    }

    #[tokio::test]
    async fn test_index_missing_path_errors() {
        let mut session = ChatSession::new();
        let err = session
            .index(Path::new("/nonexistent/mealbot.sqlite"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no index"));
    }

    #[test]
    fn test_store_create_and_get() {
        let store = SessionStore::new();
        let id = store.create();
        assert!(store.get(&id).is_some());
        assert!(store.get("unknown").is_none());
    }
}
