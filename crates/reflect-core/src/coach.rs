//! CBT coaching conversation
//!
//! Owns the current message log and drives one router call per user
//! message. Only one send may be outstanding at a time, and a reply that
//! lands after the session was reset is dropped.

use anyhow::Context;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::providers::{ProviderRouter, RouterFailure, RouterOutcome};
use crate::session::{ArchivedSession, MessageLog, start_new_session};
use crate::store::SessionStore;
use crate::types::{Message, Tier};

pub const SYSTEM_INSTRUCTION: &str = "You are a warm, empathetic, non-judgemental CBT coach. Your goal is to guide the user through the Cognitive Restructuring process.
1. Help identifying Automatic Negative Thoughts (ANTs).
2. Challenge evidence for/against these thoughts.
3. Identify cognitive distortions.
4. Find a balanced replacement thought.
Use Socratic dialogue. Keep responses concise (2-3 sentences max).";

const DEMO_REPLY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CoachError {
    #[error("still waiting for the previous reply")]
    Busy,

    #[error("message is empty")]
    EmptyMessage,

    #[error(transparent)]
    Router(#[from] RouterFailure),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// An assistant reply that made it into the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Set when the primary tier failed and another tier answered
    pub recovered_via: Option<Tier>,
}

/// Clears the busy flag when a send finishes, however it finishes
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct CoachSession {
    router: Arc<ProviderRouter>,
    store: Arc<dyn SessionStore>,
    instruction: String,
    log: Mutex<MessageLog>,
    busy: AtomicBool,
    generation: AtomicU64,
}

impl CoachSession {
    pub fn new(router: Arc<ProviderRouter>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            router,
            store,
            instruction: SYSTEM_INSTRUCTION.to_string(),
            log: Mutex::new(MessageLog::new()),
            busy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn with_instruction(mut self, instruction: &str) -> Self {
        self.instruction = instruction.to_string();
        self
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Restore the current session from the store
    pub async fn load(&self, ctx: &AppContext) -> Result<usize, CoachError> {
        let messages = self
            .store
            .load_current(ctx.user_id())
            .await
            .context("Failed to load current session")?;
        let count = messages.len();
        *self.log.lock().await = MessageLog::from_messages(messages);
        debug!("Loaded {} messages for {}", count, ctx.user_id());
        Ok(count)
    }

    pub async fn history(&self) -> Vec<Message> {
        self.log.lock().await.messages().to_vec()
    }

    /// Send one user message and wait for the coach's reply.
    ///
    /// Returns `Ok(None)` when the session was reset while the reply was in
    /// flight. On a router failure the user message stays in the history.
    pub async fn send(&self, ctx: &AppContext, text: &str) -> Result<Option<Reply>, CoachError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoachError::EmptyMessage);
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoachError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let (generation, history) = {
            let mut log = self.log.lock().await;
            let generation = self.generation.load(Ordering::Acquire);
            log.push(Message::user(text));
            let history = log.messages().to_vec();
            self.persist(ctx, &history).await?;
            (generation, history)
        };

        let outcome = if ctx.is_demo() {
            tokio::time::sleep(DEMO_REPLY_DELAY).await;
            RouterOutcome::Success(demo_reply(text))
        } else {
            info!("Routing message in {} mode ({} turns)", ctx.mode(), history.len());
            self.router
                .route(ctx.mode(), &history, &self.instruction, ctx.credentials())
                .await
        };

        // new_session bumps the generation before taking the log lock, so
        // checking under the lock cannot miss a reset
        let mut log = self.log.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!("Discarding reply that resolved after a new session started");
            return Ok(None);
        }

        let reply = match outcome {
            RouterOutcome::Success(text) => Reply {
                text,
                recovered_via: None,
            },
            RouterOutcome::Recovered { text, via } => Reply {
                text,
                recovered_via: Some(via),
            },
            RouterOutcome::Failure(failure) => {
                warn!("Coach reply failed: {}", failure);
                return Err(CoachError::Router(failure));
            }
        };

        log.push(Message::assistant(reply.text.clone()));
        self.persist(ctx, log.messages()).await?;
        Ok(Some(reply))
    }

    /// Archive the current conversation and start a blank one
    pub async fn new_session(&self, ctx: &AppContext) -> Result<Option<ArchivedSession>, CoachError> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let mut log = self.log.lock().await;
        Ok(start_new_session(&mut log, self.store.as_ref(), ctx.user_id()).await?)
    }

    async fn persist(&self, ctx: &AppContext, history: &[Message]) -> Result<(), CoachError> {
        self.store
            .save_current(ctx.user_id(), history)
            .await
            .context("Failed to save current session")?;
        Ok(())
    }
}

fn demo_reply(text: &str) -> String {
    format!(
        "I'm in Demo Mode. I can't really think, but I hear you saying: \"{}\". How does that make you feel?",
        text
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderError, RetryPolicy, TierAdapter};
    use crate::store::InMemoryStore;
    use crate::types::{ModelMode, ProviderCredentials};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Answers after `delay`, or fails when `fail` is set
    struct SlowAdapter {
        tier: Tier,
        delay: Duration,
        fail: bool,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TierAdapter for SlowAdapter {
        fn tier(&self) -> Tier {
            self.tier
        }
        fn provider_name(&self) -> &str {
            "slow"
        }
        fn model(&self) -> &str {
            "slow-model"
        }
        async fn send(
            &self,
            history: &[Message],
            instruction: &str,
            _api_key: &str,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(instruction.contains("CBT coach"));
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::InvalidResponse {
                    provider: "slow".to_string(),
                    message: "nope".to_string(),
                });
            }
            Ok(format!("{} reply to {}", self.tier, history.len()))
        }
    }

    struct Fixture {
        coach: CoachSession,
        store: Arc<InMemoryStore>,
        calls: Arc<AtomicUsize>,
    }

    fn fixture(delay: Duration, fast_fails: bool) -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = |tier, fail| {
            Arc::new(SlowAdapter {
                tier,
                delay,
                fail,
                calls: Arc::clone(&calls),
            })
        };
        let router = ProviderRouter::new(
            adapter(Tier::Fast, fast_fails),
            adapter(Tier::Deep, false),
            adapter(Tier::Fallback, false),
        )
        .with_retry_policy(RetryPolicy::new(0, Duration::from_millis(1)));
        let store = Arc::new(InMemoryStore::new());
        let coach = CoachSession::new(Arc::new(router), store.clone());
        Fixture { coach, store, calls }
    }

    fn ctx(fallback: bool) -> AppContext {
        let credentials = ProviderCredentials {
            fast_key: Some("gsk_test".to_string()),
            deep_key: None,
            fallback_key: fallback.then(|| "AIza_test".to_string()),
        };
        AppContext::new("u1", credentials, ModelMode::Fast)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_appends_and_persists() {
        let f = fixture(Duration::from_millis(10), false);
        let ctx = ctx(true);
        let reply = f.coach.send(&ctx, "  I ruin everything  ").await.unwrap().unwrap();
        assert_eq!(reply.text, "fast reply to 1");
        assert_eq!(reply.recovered_via, None);

        let history = f.coach.history().await;
        assert_eq!(
            history,
            vec![Message::user("I ruin everything"), Message::assistant("fast reply to 1")]
        );
        assert_eq!(f.store.load_current("u1").await.unwrap(), history);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_reply_reports_tier() {
        let f = fixture(Duration::from_millis(10), true);
        let reply = f.coach.send(&ctx(true), "hello").await.unwrap().unwrap();
        assert_eq!(reply.recovered_via, Some(Tier::Fallback));
        assert_eq!(reply.text, "fallback reply to 1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_user_message() {
        let f = fixture(Duration::from_millis(10), true);
        let err = f.coach.send(&ctx(false), "hello").await.unwrap_err();
        assert!(matches!(
            err,
            CoachError::Router(RouterFailure::NoFallbackAvailable { .. })
        ));
        assert_eq!(f.coach.history().await, vec![Message::user("hello")]);
        assert!(!f.coach.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_send_while_busy_is_rejected() {
        let f = fixture(Duration::from_secs(5), false);
        let ctx = ctx(true);
        let (first, second) = tokio::join!(f.coach.send(&ctx, "one"), f.coach.send(&ctx, "two"));
        assert!(first.unwrap().is_some());
        assert!(matches!(second, Err(CoachError::Busy)));
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.coach.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_after_new_session_is_discarded() {
        let f = fixture(Duration::from_secs(5), false);
        let ctx = ctx(true);
        let (sent, archived) = tokio::join!(f.coach.send(&ctx, "first thought"), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            f.coach.new_session(&ctx).await
        });

        assert_eq!(sent.unwrap(), None);
        let archived = archived.unwrap().unwrap();
        assert_eq!(archived.messages, vec![Message::user("first thought")]);
        assert!(f.coach.history().await.is_empty());
        assert!(f.store.load_current("u1").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_mode_echoes_without_provider() {
        let f = fixture(Duration::from_millis(10), false);
        let ctx = AppContext::demo("u1");
        let reply = f.coach.send(&ctx, "I'm tired").await.unwrap().unwrap();
        assert!(reply.text.starts_with("I'm in Demo Mode."));
        assert!(reply.text.contains("\"I'm tired\""));
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let f = fixture(Duration::ZERO, false);
        assert!(matches!(
            f.coach.send(&ctx(true), "   ").await,
            Err(CoachError::EmptyMessage)
        ));
        assert!(f.coach.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_load_restores_history() {
        let f = fixture(Duration::ZERO, false);
        f.store
            .save_current("u1", &[Message::user("a"), Message::assistant("b")])
            .await
            .unwrap();
        assert_eq!(f.coach.load(&ctx(true)).await.unwrap(), 2);
        assert_eq!(f.coach.history().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_mode_routes_to_fallback_without_deep_key() {
        let f = fixture(Duration::from_millis(10), false);
        let mut ctx = ctx(true);
        ctx.set_mode(ModelMode::Deep);
        let reply = f.coach.send(&ctx, "hi").await.unwrap().unwrap();
        assert_eq!(reply.text, "fallback reply to 1");
        assert_eq!(reply.recovered_via, None);
    }

    /// Session store that parks the `pause_on`-th save until released
    struct GatedStore {
        inner: InMemoryStore,
        saves: AtomicUsize,
        pause_on: usize,
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl SessionStore for GatedStore {
        async fn load_current(&self, user_id: &str) -> anyhow::Result<Vec<Message>> {
            self.inner.load_current(user_id).await
        }
        async fn save_current(&self, user_id: &str, messages: &[Message]) -> anyhow::Result<()> {
            if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.pause_on {
                self.reached.notify_one();
                self.release.notified().await;
            }
            self.inner.save_current(user_id, messages).await
        }
        async fn archive_and_reset(
            &self,
            user_id: &str,
            session: &ArchivedSession,
        ) -> anyhow::Result<()> {
            self.inner.archive_and_reset(user_id, session).await
        }
        async fn list_archives(
            &self,
            user_id: &str,
            limit: usize,
        ) -> anyhow::Result<Vec<ArchivedSession>> {
            self.inner.list_archives(user_id, limit).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_waits_for_reply_being_saved() {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = |tier| {
            Arc::new(SlowAdapter {
                tier,
                delay: Duration::from_millis(10),
                fail: false,
                calls: Arc::clone(&calls),
            })
        };
        let router = ProviderRouter::new(
            adapter(Tier::Fast),
            adapter(Tier::Deep),
            adapter(Tier::Fallback),
        );
        let store = Arc::new(GatedStore {
            inner: InMemoryStore::new(),
            saves: AtomicUsize::new(0),
            // the save that follows the assistant reply
            pause_on: 2,
            reached: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
        });
        let coach = CoachSession::new(Arc::new(router), store.clone());
        let ctx = ctx(true);

        let (sent, archived) = tokio::join!(coach.send(&ctx, "first thought"), async {
            store.reached.notified().await;
            let (archived, ()) = tokio::join!(coach.new_session(&ctx), async {
                tokio::task::yield_now().await;
                store.release.notify_one();
            });
            archived
        });

        let reply = sent.unwrap().unwrap();
        let archived = archived.unwrap().unwrap();
        assert_eq!(
            archived.messages,
            vec![Message::user("first thought"), Message::assistant(reply.text)]
        );
        assert!(coach.history().await.is_empty());
        assert!(store.inner.load_current("u1").await.unwrap().is_empty());
    }
}
