//! SQLite persistence for sessions, moods, settings and local key-values

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use reflect_core::mood::{Mood, MoodEntry};
use reflect_core::session::ArchivedSession;
use reflect_core::store::{KeyValueStore, MoodStore, SessionStore, SettingsStore};
use reflect_core::types::{Message, UserSettings};

/// Fixed-width timestamps so text ordering matches time ordering
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse().unwrap_or_else(|_| Utc::now())
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// SQLite database wrapper (thread-safe via Arc<Mutex>)
pub struct ReflectDb {
    conn: Arc<Mutex<Connection>>,
}

impl ReflectDb {
    /// Open (or create) the database and ensure the schema exists
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open SQLite database")?;

        info!("Initializing reflect database at {:?}", path.as_ref());
        warn!(
            "Journal database is NOT encrypted. Conversations, moods and API keys are stored in plaintext at {:?}",
            path.as_ref()
        );

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS current_sessions (
                user_id TEXT PRIMARY KEY,
                messages TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS archived_sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                messages TEXT NOT NULL,
                archived_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_archived_sessions_user
                ON archived_sessions(user_id, archived_at);
            CREATE TABLE IF NOT EXISTS mood_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                mood TEXT NOT NULL,
                caption TEXT NOT NULL,
                logged_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_mood_logs_user
                ON mood_logs(user_id, logged_at);
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT PRIMARY KEY,
                settings TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .context("Failed to initialize schema")?;

        debug!("Database schema initialized successfully");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(|poisoned| {
                warn!("Database mutex was poisoned, recovering");
                poisoned.into_inner()
            });
            f(&mut *conn)
        })
        .await
        .context("spawn_blocking task panicked")?
    }

    fn row_to_archive(row: &rusqlite::Row) -> rusqlite::Result<ArchivedSession> {
        let messages: String = row.get(1)?;
        Ok(ArchivedSession {
            id: row.get(0)?,
            messages: json_column(1, &messages)?,
            archived_at: parse_timestamp(&row.get::<_, String>(2)?),
        })
    }

    fn row_to_mood(row: &rusqlite::Row) -> rusqlite::Result<MoodEntry> {
        let label: String = row.get(1)?;
        let mood = Mood::parse(&label).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                format!("unknown mood {:?}", label).into(),
            )
        })?;
        Ok(MoodEntry {
            id: row.get(0)?,
            mood,
            caption: row.get(2)?,
            logged_at: parse_timestamp(&row.get::<_, String>(3)?),
        })
    }
}

#[async_trait]
impl SessionStore for ReflectDb {
    async fn load_current(&self, user_id: &str) -> Result<Vec<Message>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT messages FROM current_sessions WHERE user_id = ?1",
                    params![&user_id],
                    |row| row.get(0),
                )
                .optional()?;
            match raw {
                Some(raw) => serde_json::from_str(&raw).context("Corrupt current session"),
                None => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn save_current(&self, user_id: &str, messages: &[Message]) -> Result<()> {
        let user_id = user_id.to_owned();
        let json = serde_json::to_string(messages)?;
        let count = messages.len();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO current_sessions (user_id, messages, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET messages = ?2, updated_at = ?3",
                params![&user_id, json, timestamp(Utc::now())],
            )?;
            debug!("Saved current session for {} ({} messages)", user_id, count);
            Ok(())
        })
        .await
    }

    async fn archive_and_reset(&self, user_id: &str, session: &ArchivedSession) -> Result<()> {
        let user_id = user_id.to_owned();
        let id = session.id.clone();
        let json = serde_json::to_string(&session.messages)?;
        let archived_at = timestamp(session.archived_at);
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO archived_sessions (id, user_id, messages, archived_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![&id, &user_id, json, archived_at],
            )?;
            tx.execute(
                "INSERT INTO current_sessions (user_id, messages, updated_at)
                 VALUES (?1, '[]', ?2)
                 ON CONFLICT(user_id) DO UPDATE SET messages = '[]', updated_at = ?2",
                params![&user_id, timestamp(Utc::now())],
            )?;
            tx.commit()?;
            debug!("Archived session {} for {}", id, user_id);
            Ok(())
        })
        .await
    }

    async fn list_archives(&self, user_id: &str, limit: usize) -> Result<Vec<ArchivedSession>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, messages, archived_at FROM archived_sessions
                 WHERE user_id = ?1
                 ORDER BY archived_at DESC
                 LIMIT ?2",
            )?;
            let sessions = stmt
                .query_map(params![&user_id, limit as i64], Self::row_to_archive)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
        .await
    }
}

#[async_trait]
impl MoodStore for ReflectDb {
    async fn log_mood(&self, user_id: &str, entry: &MoodEntry) -> Result<()> {
        let user_id = user_id.to_owned();
        let entry = entry.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO mood_logs (id, user_id, mood, caption, logged_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    &entry.id,
                    &user_id,
                    entry.mood.label(),
                    &entry.caption,
                    timestamp(entry.logged_at),
                ],
            )?;
            debug!("Logged mood {} for {}", entry.mood.label(), user_id);
            Ok(())
        })
        .await
    }

    async fn recent_moods(&self, user_id: &str, limit: usize) -> Result<Vec<MoodEntry>> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, mood, caption, logged_at FROM mood_logs
                 WHERE user_id = ?1
                 ORDER BY logged_at DESC
                 LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(params![&user_id, limit as i64], Self::row_to_mood)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }
}

fn read_settings(conn: &Connection, user_id: &str) -> Result<UserSettings> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT settings FROM user_settings WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => serde_json::from_str(&raw).context("Corrupt user settings"),
        None => Ok(UserSettings::default()),
    }
}

#[async_trait]
impl SettingsStore for ReflectDb {
    async fn load_settings(&self, user_id: &str) -> Result<UserSettings> {
        let user_id = user_id.to_owned();
        self.with_conn(move |conn| read_settings(conn, &user_id)).await
    }

    async fn save_settings(&self, user_id: &str, update: &UserSettings) -> Result<UserSettings> {
        let user_id = user_id.to_owned();
        let update = update.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let merged = read_settings(&tx, &user_id)?.merged(&update);
            tx.execute(
                "INSERT INTO user_settings (user_id, settings, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET settings = ?2, updated_at = ?3",
                params![&user_id, serde_json::to_string(&merged)?, timestamp(Utc::now())],
            )?;
            tx.commit()?;
            info!("Saved settings for {}", user_id);
            Ok(merged)
        })
        .await
    }
}

#[async_trait]
impl KeyValueStore for ReflectDb {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![&key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = ?2",
                params![&key, &value],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![&key])?;
            Ok(())
        })
        .await
    }
}
