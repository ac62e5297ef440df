//! Multi-provider LLM routing
//!
//! Three hosted providers sit behind the [`TierAdapter`] trait: Groq (fast),
//! DeepSeek (deep) and Google Gemini (fallback). [`ProviderRouter`] picks a
//! primary for the requested mode and fails over to the fallback tier once.

pub mod google;
pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod types;

pub use google::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::RetryPolicy;
pub use router::{ProviderRouter, RouterFailure, RouterOutcome};
pub use types::{ProviderError, TierAdapter};
