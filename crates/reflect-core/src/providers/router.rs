//! Tier selection with a single fallback hop
//!
//! Tier-specific providers are expected to fail now and then (some reject
//! browser-origin or proxied calls outright), so a tier failure is routed
//! to the fallback provider before anything is surfaced to the user.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Message, ModelMode, ProviderCredentials, Tier};

use super::retry::RetryPolicy;
use super::types::{ProviderError, TierAdapter};

/// Terminal failure of one routed request
#[derive(Debug, Error)]
pub enum RouterFailure {
    #[error("no API key is configured for {mode} mode; add one in settings")]
    NoCredentials { mode: ModelMode },

    #[error(
        "the {primary} provider failed ({primary_error}) and the fallback provider also failed ({fallback_error})"
    )]
    FallbackAlsoFailed {
        primary: Tier,
        primary_error: ProviderError,
        fallback_error: ProviderError,
    },

    #[error("the {tier} provider failed and no fallback is available: {error}")]
    NoFallbackAvailable { tier: Tier, error: ProviderError },
}

/// Result of routing one outgoing message
#[derive(Debug)]
pub enum RouterOutcome {
    /// The primary tier answered
    Success(String),
    /// The primary tier failed and the fallback tier answered
    Recovered { text: String, via: Tier },
    Failure(RouterFailure),
}

impl RouterOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Success(text) | Self::Recovered { text, .. } => Some(text),
            Self::Failure(_) => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn into_result(self) -> Result<String, RouterFailure> {
        match self {
            Self::Success(text) | Self::Recovered { text, .. } => Ok(text),
            Self::Failure(failure) => Err(failure),
        }
    }
}

/// Routes a coaching request to the fast, deep or fallback provider
pub struct ProviderRouter {
    fast: Arc<dyn TierAdapter>,
    deep: Arc<dyn TierAdapter>,
    fallback: Arc<dyn TierAdapter>,
    retry: RetryPolicy,
}

impl ProviderRouter {
    pub fn new(
        fast: Arc<dyn TierAdapter>,
        deep: Arc<dyn TierAdapter>,
        fallback: Arc<dyn TierAdapter>,
    ) -> Self {
        Self {
            fast,
            deep,
            fallback,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    fn adapter(&self, tier: Tier) -> &Arc<dyn TierAdapter> {
        match tier {
            Tier::Fast => &self.fast,
            Tier::Deep => &self.deep,
            Tier::Fallback => &self.fallback,
        }
    }

    /// Tier the router tries first for `mode`, or `None` when no usable key exists
    pub fn select_primary(mode: ModelMode, credentials: &ProviderCredentials) -> Option<Tier> {
        let preferred = match mode {
            ModelMode::Fast => Tier::Fast,
            ModelMode::Deep => Tier::Deep,
        };
        if credentials.key_for(preferred).is_some() {
            Some(preferred)
        } else if credentials.key_for(Tier::Fallback).is_some() {
            Some(Tier::Fallback)
        } else {
            None
        }
    }

    /// Call one tier through the retry wrapper
    pub async fn call_tier(
        &self,
        tier: Tier,
        history: &[Message],
        instruction: &str,
        api_key: &str,
    ) -> Result<String, ProviderError> {
        let adapter = self.adapter(tier);
        let label = format!("{} ({})", adapter.provider_name(), adapter.model());
        debug!(
            "Calling {} tier via {} with {} messages",
            tier,
            label,
            history.len()
        );
        self.retry
            .run(&label, || adapter.send(history, instruction, api_key))
            .await
    }

    /// Produce the assistant reply for `history`, trying at most two providers.
    /// The primary finishes (including its retries) before the fallback starts.
    pub async fn route(
        &self,
        mode: ModelMode,
        history: &[Message],
        instruction: &str,
        credentials: &ProviderCredentials,
    ) -> RouterOutcome {
        let Some(primary) = Self::select_primary(mode, credentials) else {
            warn!("No provider key available for {} mode", mode);
            return RouterOutcome::Failure(RouterFailure::NoCredentials { mode });
        };

        // select_primary only returns tiers with a key
        let Some(primary_key) = credentials.key_for(primary) else {
            return RouterOutcome::Failure(RouterFailure::NoCredentials { mode });
        };

        let primary_error = match self
            .call_tier(primary, history, instruction, primary_key)
            .await
        {
            Ok(text) => return RouterOutcome::Success(text),
            Err(e) => e,
        };

        warn!("{} tier failed: {}", primary, primary_error);

        if primary == Tier::Fallback {
            return RouterOutcome::Failure(RouterFailure::NoFallbackAvailable {
                tier: primary,
                error: primary_error,
            });
        }

        let Some(fallback_key) = credentials.key_for(Tier::Fallback) else {
            return RouterOutcome::Failure(RouterFailure::NoFallbackAvailable {
                tier: primary,
                error: primary_error,
            });
        };

        info!("Failing over from {} tier to fallback tier", primary);

        match self
            .call_tier(Tier::Fallback, history, instruction, fallback_key)
            .await
        {
            Ok(text) => {
                info!("Request recovered on fallback tier");
                RouterOutcome::Recovered {
                    text,
                    via: Tier::Fallback,
                }
            }
            Err(fallback_error) => {
                warn!("Fallback tier also failed: {}", fallback_error);
                RouterOutcome::Failure(RouterFailure::FallbackAlsoFailed {
                    primary,
                    primary_error,
                    fallback_error,
                })
            }
        }
    }
}
