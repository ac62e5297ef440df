//! Google Gemini provider, the fallback tier
//!
//! The key travels as a `key` query parameter rather than a header.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::types::{Message, Role, Tier};

use super::types::{ProviderError, TierAdapter, reply_text, send_json};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash";

const PROVIDER_NAME: &str = "gemini";

/// Google Gemini provider
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            model: GEMINI_DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    fn endpoint(&self, api_key: &str) -> Result<Url, ProviderError> {
        let raw = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let mut url = Url::parse(&raw).map_err(|e| ProviderError::InvalidRequest {
            provider: PROVIDER_NAME.to_string(),
            message: format!("bad endpoint {}: {}", raw, e),
        })?;
        url.query_pairs_mut().append_pair("key", api_key);
        Ok(url)
    }

    /// Gemini has no system role on this endpoint: the instruction is sent
    /// as a leading user turn, and assistant turns use the "model" role.
    fn to_gemini_contents(history: &[Message], instruction: &str) -> Vec<GeminiContent> {
        let preamble = (!instruction.trim().is_empty()).then(|| GeminiContent {
            role: "user".to_string(),
            parts: vec![GeminiPart {
                text: Some(instruction.to_string()),
            }],
        });

        preamble
            .into_iter()
            .chain(history.iter().map(|m| GeminiContent {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                }
                .to_string(),
                parts: vec![GeminiPart {
                    text: Some(m.content.clone()),
                }],
            }))
            .collect()
    }

    /// `candidates[0].content.parts[0].text`
    fn extract_text(resp: GeminiApiResponse) -> Result<String, ProviderError> {
        let Some(candidate) = resp.candidates.into_iter().next() else {
            return Err(ProviderError::InvalidResponse {
                provider: PROVIDER_NAME.to_string(),
                message: "response had no candidates".to_string(),
            });
        };
        let text = candidate
            .content
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text);
        reply_text(PROVIDER_NAME, text)
    }
}

#[async_trait]
impl TierAdapter for GeminiProvider {
    fn tier(&self) -> Tier {
        Tier::Fallback
    }

    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn send(
        &self,
        history: &[Message],
        instruction: &str,
        api_key: &str,
    ) -> Result<String, ProviderError> {
        let url = self.endpoint(api_key)?;
        let body = GeminiRequest {
            contents: Self::to_gemini_contents(history, instruction),
        };

        debug!(
            "Gemini request: model={}, contents={}",
            self.model,
            body.contents.len()
        );

        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(&body);

        let api_response: GeminiApiResponse = send_json(PROVIDER_NAME, request).await?;

        debug!(
            "Gemini response: candidates={}",
            api_response.candidates.len()
        );

        Self::extract_text(api_response)
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}
