//! Quote of the day, cached per calendar day

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::mood::MoodEntry;
use crate::providers::ProviderRouter;
use crate::store::KeyValueStore;
use crate::types::{Message, ProviderCredentials, Tier};

pub const DAILY_QUOTE_KEY: &str = "reflect_daily_quote";

pub const QUOTES: [&str; 12] = [
    "The only journey is the one within.",
    "Peace comes from within. Do not seek it without.",
    "Your mind will answer most questions if you learn to relax and wait for the answer.",
    "Feelings are something you have; not something you are.",
    "This too shall pass.",
    "Be kind to your mind.",
    "What you think, you become.",
    "Happiness depends upon ourselves.",
    "Turn your wounds into wisdom.",
    "Every moment is a fresh beginning.",
    "Believe you can and you're halfway there.",
    "You are enough just as you are.",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedQuote {
    date: NaiveDate,
    quote: String,
}

/// Built-in quote for a day; the same day always gets the same quote
pub fn builtin_quote(day: NaiveDate) -> &'static str {
    let idx = day.num_days_from_ce().rem_euclid(QUOTES.len() as i32) as usize;
    QUOTES[idx]
}

/// Prompt for a personalized quote from up to three recent mood labels
pub fn quote_prompt(recent_newest_first: &[MoodEntry]) -> String {
    let labels: Vec<&str> = recent_newest_first
        .iter()
        .take(3)
        .map(|e| e.mood.label())
        .collect();
    format!(
        "Generate a short, inspiring quote (max 15 words) for someone who has been feeling: {}. Return ONLY the quote text.",
        labels.join(", ")
    )
}

async fn cached_for(kv: &dyn KeyValueStore, day: NaiveDate) -> Result<Option<String>> {
    let Some(raw) = kv.get(DAILY_QUOTE_KEY).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<CachedQuote>(&raw) {
        Ok(cached) if cached.date == day => Ok(Some(cached.quote)),
        Ok(_) => Ok(None),
        Err(e) => {
            warn!("Discarding unreadable quote cache: {}", e);
            Ok(None)
        }
    }
}

async fn store_quote(kv: &dyn KeyValueStore, day: NaiveDate, quote: &str) -> Result<()> {
    let cached = CachedQuote {
        date: day,
        quote: quote.to_string(),
    };
    kv.set(DAILY_QUOTE_KEY, &serde_json::to_string(&cached)?).await
}

/// Today's quote.
///
/// A cached quote for `day` wins. Otherwise, with mood history and a
/// fallback key (and outside demo mode), the fallback provider is asked for
/// a personalized one. A failed request shows the built-in quote without
/// caching it, so the next call tries the provider again.
pub async fn daily_quote(
    kv: &dyn KeyValueStore,
    router: &ProviderRouter,
    credentials: &ProviderCredentials,
    recent: &[MoodEntry],
    day: NaiveDate,
    demo: bool,
) -> Result<String> {
    if let Some(quote) = cached_for(kv, day).await? {
        debug!("Using cached quote for {}", day);
        return Ok(quote);
    }

    let builtin = builtin_quote(day);
    let key = match credentials.key_for(Tier::Fallback) {
        Some(key) if !recent.is_empty() && !demo => key,
        _ => {
            store_quote(kv, day, builtin).await?;
            return Ok(builtin.to_string());
        }
    };

    let prompt = [Message::user(quote_prompt(recent))];
    match router.call_tier(Tier::Fallback, &prompt, "", key).await {
        Ok(text) => {
            let quote = text.trim().to_string();
            info!("Fetched personalized quote for {}", day);
            store_quote(kv, day, &quote).await?;
            Ok(quote)
        }
        Err(e) => {
            warn!("Failed to fetch AI quote: {}", e);
            Ok(builtin.to_string())
        }
    }
}
