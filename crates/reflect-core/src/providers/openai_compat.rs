//! OpenAI-compatible chat-completions adapter
//!
//! Serves both the fast tier (Groq) and the deep tier (DeepSeek); the two
//! differ only in base URL, model and whether `max_tokens` is sent.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Message, Tier};

use super::types::{ProviderError, TierAdapter, reply_text, send_json};

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_DEFAULT_MODEL: &str = "deepseek-reasoner";

/// Chat-completions provider speaking the OpenAI wire format
pub struct OpenAiCompatProvider {
    client: Client,
    tier: Tier,
    name: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("tier", &self.tier)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiCompatProvider {
    pub fn new(client: Client, tier: Tier, name: &str, base_url: &str, model: &str) -> Self {
        Self {
            client,
            tier,
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    /// Fast tier: Groq, with a capped reply length
    pub fn groq(client: Client) -> Self {
        Self::new(client, Tier::Fast, "groq", GROQ_BASE_URL, GROQ_DEFAULT_MODEL)
            .with_max_tokens(Some(1024))
    }

    /// Deep tier: DeepSeek, no reply cap
    pub fn deepseek(client: Client) -> Self {
        Self::new(client, Tier::Deep, "deepseek", DEEPSEEK_BASE_URL, DEEPSEEK_DEFAULT_MODEL)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Instruction goes first as a system message, then the history verbatim
    fn to_openai_messages(history: &[Message], instruction: &str) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(history.len() + 1);
        if !instruction.trim().is_empty() {
            result.push(OpenAiMessage {
                role: "system".to_string(),
                content: instruction.to_string(),
            });
        }
        result.extend(history.iter().map(|m| OpenAiMessage {
            role: m.role.to_string(),
            content: m.content.clone(),
        }));
        result
    }

    fn request_body(&self, history: &[Message], instruction: &str) -> OpenAiRequest {
        OpenAiRequest {
            model: self.model.clone(),
            messages: Self::to_openai_messages(history, instruction),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    fn extract_text(&self, resp: OpenAiApiResponse) -> Result<String, ProviderError> {
        let Some(choice) = resp.choices.into_iter().next() else {
            return Err(ProviderError::InvalidResponse {
                provider: self.name.clone(),
                message: "response had no choices".to_string(),
            });
        };
        reply_text(&self.name, choice.message.and_then(|m| m.content))
    }
}

#[async_trait]
impl TierAdapter for OpenAiCompatProvider {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn provider_name(&self) -> &str {
        &self.name
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
        let body = self.request_body(history, instruction);

        debug!(
            "{} request: model={}, messages={}",
            self.name,
            self.model,
            body.messages.len()
        );

        let request = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body);

        let api_response: OpenAiApiResponse = send_json(&self.name, request).await?;

        debug!(
            "{} response: choices={}",
            self.name,
            api_response.choices.len()
        );

        self.extract_text(api_response)
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: Option<OpenAiChoiceMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}
