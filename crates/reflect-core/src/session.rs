//! Append-only message log and archive-and-reset session lifecycle

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::store::SessionStore;
use crate::types::Message;

/// Ordered conversation history for the current coaching session.
///
/// Messages can only be appended; there is no way to edit or remove a
/// single entry. The whole log is cleared when a new session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    fn take(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.messages)
    }
}

/// A finished session moved out of the current history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedSession {
    pub id: String,
    pub messages: Vec<Message>,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedSession {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages,
            archived_at: Utc::now(),
        }
    }
}

/// Archive a non-empty log and reset it (and the stored copy) to empty.
///
/// Returns the archived session, or `None` when the log was already empty,
/// in which case the store is not touched at all. When the store write
/// fails the log is left as it was.
pub async fn start_new_session(
    log: &mut MessageLog,
    store: &dyn SessionStore,
    user_id: &str,
) -> Result<Option<ArchivedSession>> {
    if log.is_empty() {
        debug!("New session requested on empty history, nothing to archive");
        return Ok(None);
    }

    let archived = ArchivedSession::new(log.messages().to_vec());
    store
        .archive_and_reset(user_id, &archived)
        .await
        .context("Failed to archive session")?;
    log.take();

    info!(
        "Archived session {} with {} messages",
        archived.id,
        archived.messages.len()
    );
    Ok(Some(archived))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;

    /// Session store whose archive write always fails
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl SessionStore for ReadOnlyStore {
        async fn load_current(&self, user_id: &str) -> Result<Vec<Message>> {
            self.0.load_current(user_id).await
        }
        async fn save_current(&self, user_id: &str, messages: &[Message]) -> Result<()> {
            self.0.save_current(user_id, messages).await
        }
        async fn archive_and_reset(&self, _user_id: &str, _session: &ArchivedSession) -> Result<()> {
            anyhow::bail!("disk full")
        }
        async fn list_archives(&self, user_id: &str, limit: usize) -> Result<Vec<ArchivedSession>> {
            self.0.list_archives(user_id, limit).await
        }
    }

    #[test]
    fn test_append_preserves_order() {
        let mut log = MessageLog::new();
        let expected: Vec<Message> = (0..10)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("u{}", i))
                } else {
                    Message::assistant(format!("a{}", i))
                }
            })
            .collect();
        for m in &expected {
            log.push(m.clone());
        }
        assert_eq!(log.len(), 10);
        assert_eq!(log.messages(), expected.as_slice());
        assert_eq!(log.last().map(|m| m.content.as_str()), Some("a9"));
    }

    #[tokio::test]
    async fn test_history_roundtrips_through_store() {
        let store = InMemoryStore::new();
        let log = MessageLog::from_messages(vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ]);
        store.save_current("u1", log.messages()).await.unwrap();
        let restored = MessageLog::from_messages(store.load_current("u1").await.unwrap());
        assert_eq!(restored, log);
    }

    #[tokio::test]
    async fn test_new_session_on_empty_history_is_noop() {
        let store = InMemoryStore::new();
        let mut log = MessageLog::new();
        let archived = start_new_session(&mut log, &store, "u1").await.unwrap();
        assert!(archived.is_none());
        assert!(store.list_archives("u1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_session_archives_and_clears() {
        let store = InMemoryStore::new();
        let mut log = MessageLog::new();
        log.push(Message::user("I keep overthinking"));
        log.push(Message::assistant("What's the evidence?"));
        store.save_current("u1", log.messages()).await.unwrap();

        let archived = start_new_session(&mut log, &store, "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(archived.messages.len(), 2);
        assert!(log.is_empty());
        assert!(store.load_current("u1").await.unwrap().is_empty());

        let archives = store.list_archives("u1", 10).await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].messages[0].content, "I keep overthinking");

        // second call on the now-empty log adds nothing
        start_new_session(&mut log, &store, "u1").await.unwrap();
        assert_eq!(store.list_archives("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_archive_keeps_log() {
        let store = ReadOnlyStore(InMemoryStore::new());
        let mut log = MessageLog::from_messages(vec![Message::user("still here")]);
        store.save_current("u1", log.messages()).await.unwrap();

        let err = start_new_session(&mut log, &store, "u1").await.unwrap_err();
        assert!(format!("{:#}", err).contains("disk full"));
        assert_eq!(log.len(), 1);
        assert_eq!(store.load_current("u1").await.unwrap().len(), 1);
        assert!(store.list_archives("u1", 10).await.unwrap().is_empty());
    }
}
