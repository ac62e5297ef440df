//! reflect-core - CBT journaling coach
//!
//! This crate provides:
//! - Provider adapters for Groq, DeepSeek and Google Gemini behind one trait
//! - A provider router with bounded retry and a single fallback hop
//! - The coaching session with an append-only message log and archiving
//! - Mood logging, daily check-in, daily quote, breathing and PIN lock
//! - Persistence and device capability ports with in-memory implementations

pub mod breathing;
pub mod capabilities;
pub mod checkin;
pub mod coach;
pub mod context;
pub mod lock;
pub mod mood;
pub mod providers;
pub mod quote;
pub mod session;
pub mod store;
pub mod types;

pub use coach::{CoachError, CoachSession, Reply, SYSTEM_INSTRUCTION};
pub use context::AppContext;
pub use mood::{Mood, MoodEntry};
pub use providers::{
    GeminiProvider, OpenAiCompatProvider, ProviderError, ProviderRouter, RetryPolicy, RouterFailure,
    RouterOutcome, TierAdapter,
};
pub use session::{ArchivedSession, MessageLog};
pub use store::{InMemoryStore, KeyValueStore, MoodStore, SessionStore, SettingsStore};
pub use types::{Message, ModelMode, ProviderCredentials, Role, Tier, UserSettings};
