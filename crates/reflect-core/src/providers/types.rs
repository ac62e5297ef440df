//! Provider-agnostic adapter contract and error taxonomy

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::types::{Message, Tier};

/// Failure of a single provider call.
///
/// `Http` and `Network` are transient and absorbed by the retry wrapper
/// while budget remains; everything else surfaces immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("request to {provider} failed: {message}")]
    Network { provider: String, message: String },

    #[error("could not build request for {provider}: {message}")]
    InvalidRequest { provider: String, message: String },

    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse { provider: String, message: String },

    #[error("{provider} returned an empty reply")]
    EmptyResponse { provider: String },

    #[error("gave up retrying after {elapsed:?}: {last}")]
    DeadlineExceeded {
        elapsed: Duration,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http { .. } | Self::Network { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Http { status: 429, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::DeadlineExceeded { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// One hosted chat-completion provider.
///
/// Adapters hold no credentials; the key is supplied per call so the
/// router stays the only place that decides which key goes where.
#[async_trait]
pub trait TierAdapter: Send + Sync {
    /// Which tier this adapter serves
    fn tier(&self) -> Tier;

    /// Human-readable provider name (e.g. "groq", "gemini")
    fn provider_name(&self) -> &str;

    /// Model identifier sent on the wire
    fn model(&self) -> &str;

    /// Send the history plus instruction preamble and return the reply text
    async fn send(
        &self,
        history: &[Message],
        instruction: &str,
        api_key: &str,
    ) -> Result<String, ProviderError>;
}

/// Turn an extracted reply field into final text.
/// A missing field is an invalid response; a blank one is an empty reply.
pub(crate) fn reply_text(provider: &str, text: Option<String>) -> Result<String, ProviderError> {
    let Some(text) = text else {
        return Err(ProviderError::InvalidResponse {
            provider: provider.to_string(),
            message: "reply text field missing".to_string(),
        });
    };
    if text.trim().is_empty() {
        return Err(ProviderError::EmptyResponse {
            provider: provider.to_string(),
        });
    }
    Ok(text)
}

/// Send a request and decode a JSON body, mapping failures onto [`ProviderError`]
pub(crate) async fn send_json<T: serde::de::DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::Network {
            provider: provider.to_string(),
            // the Gemini key rides in the query string
            message: e.without_url().to_string(),
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| ProviderError::Network {
        provider: provider.to_string(),
        message: format!("failed to read response body: {}", e.without_url()),
    })?;

    if !status.is_success() {
        return Err(ProviderError::Http {
            provider: provider.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 300),
        });
    }

    serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse {
        provider: provider.to_string(),
        message: format!("malformed JSON body: {}", e),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{}...", cut)
}
