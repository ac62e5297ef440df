//! Persistence ports and an in-memory implementation
//!
//! The SQLite store in `reflect-store` implements the same traits; the
//! in-memory version backs demo mode and tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::mood::MoodEntry;
use crate::session::ArchivedSession;
use crate::types::{Message, UserSettings};

/// Current coaching history plus the archive of finished sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_current(&self, user_id: &str) -> Result<Vec<Message>>;

    /// Replace the stored current history
    async fn save_current(&self, user_id: &str, messages: &[Message]) -> Result<()>;

    /// Store `session` as archived and empty the current history in one
    /// write; either both happen or neither does.
    async fn archive_and_reset(&self, user_id: &str, session: &ArchivedSession) -> Result<()>;

    /// Archived sessions, newest first
    async fn list_archives(&self, user_id: &str, limit: usize) -> Result<Vec<ArchivedSession>>;
}

#[async_trait]
pub trait MoodStore: Send + Sync {
    async fn log_mood(&self, user_id: &str, entry: &MoodEntry) -> Result<()>;

    /// Most recent entries, newest first
    async fn recent_moods(&self, user_id: &str, limit: usize) -> Result<Vec<MoodEntry>>;
}

/// The Config/Keys store: profile fields and provider keys
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn load_settings(&self, user_id: &str) -> Result<UserSettings>;

    /// Merge `update` over the stored settings and return the result
    async fn save_settings(&self, user_id: &str, update: &UserSettings) -> Result<UserSettings>;
}

/// Device-local string storage (PIN, daily quote cache, check-in stamps)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    current: HashMap<String, Vec<Message>>,
    archives: HashMap<String, Vec<ArchivedSession>>,
    moods: HashMap<String, Vec<MoodEntry>>,
    settings: HashMap<String, UserSettings>,
    kv: HashMap<String, String>,
}

/// Process-local store; nothing survives a restart
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_current(&self, user_id: &str) -> Result<Vec<Message>> {
        let state = self.state.lock().await;
        Ok(state.current.get(user_id).cloned().unwrap_or_default())
    }

    async fn save_current(&self, user_id: &str, messages: &[Message]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.current.insert(user_id.to_string(), messages.to_vec());
        Ok(())
    }

    async fn archive_and_reset(&self, user_id: &str, session: &ArchivedSession) -> Result<()> {
        let mut state = self.state.lock().await;
        state.current.insert(user_id.to_string(), Vec::new());
        state
            .archives
            .entry(user_id.to_string())
            .or_default()
            .push(session.clone());
        Ok(())
    }

    async fn list_archives(&self, user_id: &str, limit: usize) -> Result<Vec<ArchivedSession>> {
        let state = self.state.lock().await;
        let mut sessions = state.archives.get(user_id).cloned().unwrap_or_default();
        sessions.sort_by(|a, b| b.archived_at.cmp(&a.archived_at));
        sessions.truncate(limit);
        Ok(sessions)
    }
}

#[async_trait]
impl MoodStore for InMemoryStore {
    async fn log_mood(&self, user_id: &str, entry: &MoodEntry) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .moods
            .entry(user_id.to_string())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn recent_moods(&self, user_id: &str, limit: usize) -> Result<Vec<MoodEntry>> {
        let state = self.state.lock().await;
        let mut entries = state.moods.get(user_id).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.logged_at.cmp(&a.logged_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn load_settings(&self, user_id: &str) -> Result<UserSettings> {
        let state = self.state.lock().await;
        Ok(state.settings.get(user_id).cloned().unwrap_or_default())
    }

    async fn save_settings(&self, user_id: &str, update: &UserSettings) -> Result<UserSettings> {
        let mut state = self.state.lock().await;
        let merged = state
            .settings
            .get(user_id)
            .cloned()
            .unwrap_or_default()
            .merged(update);
        state.settings.insert(user_id.to_string(), merged.clone());
        Ok(merged)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.state
            .lock()
            .await
            .kv
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.state.lock().await.kv.remove(key);
        Ok(())
    }
}
