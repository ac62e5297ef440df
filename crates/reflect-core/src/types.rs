//! Core domain types shared across the coach, router and stores

use serde::{Deserialize, Serialize};

/// Who authored a message in the coaching conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single conversation turn. Never mutated once appended to a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Which primary tier the router tries first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    #[default]
    Fast,
    Deep,
}

impl ModelMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Some(Self::Fast),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Deep => write!(f, "deep"),
        }
    }
}

/// One of the three hosted providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Fast,
    Deep,
    Fallback,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Deep => write!(f, "deep"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

/// Per-user provider API keys (bring-your-own-key)
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    #[serde(default)]
    pub fast_key: Option<String>,
    #[serde(default)]
    pub deep_key: Option<String>,
    #[serde(default)]
    pub fallback_key: Option<String>,
}

impl ProviderCredentials {
    /// Key for a tier, treating blank strings as absent
    pub fn key_for(&self, tier: Tier) -> Option<&str> {
        let key = match tier {
            Tier::Fast => self.fast_key.as_deref(),
            Tier::Deep => self.deep_key.as_deref(),
            Tier::Fallback => self.fallback_key.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn has_any(&self) -> bool {
        [Tier::Fast, Tier::Deep, Tier::Fallback]
            .into_iter()
            .any(|t| self.key_for(t).is_some())
    }

    /// Fill tiers that have no usable key from `other`
    pub fn or(mut self, other: &ProviderCredentials) -> Self {
        if self.key_for(Tier::Fast).is_none() {
            self.fast_key = other.fast_key.clone();
        }
        if self.key_for(Tier::Deep).is_none() {
            self.deep_key = other.deep_key.clone();
        }
        if self.key_for(Tier::Fallback).is_none() {
            self.fallback_key = other.fallback_key.clone();
        }
        self
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = |k: &Option<String>| k.as_deref().map(mask_secret);
        f.debug_struct("ProviderCredentials")
            .field("fast_key", &masked(&self.fast_key))
            .field("deep_key", &masked(&self.deep_key))
            .field("fallback_key", &masked(&self.fallback_key))
            .finish()
    }
}

/// Profile fields plus keys, as saved from the settings screen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub credentials: ProviderCredentials,
}

impl UserSettings {
    /// Merge an update over stored settings; fields absent in `update` keep
    /// their stored value.
    pub fn merged(&self, update: &UserSettings) -> UserSettings {
        let pick = |new: &Option<String>, old: &Option<String>| {
            if new.is_some() { new.clone() } else { old.clone() }
        };
        UserSettings {
            age: update.age.or(self.age),
            credentials: ProviderCredentials {
                fast_key: pick(&update.credentials.fast_key, &self.credentials.fast_key),
                deep_key: pick(&update.credentials.deep_key, &self.credentials.deep_key),
                fallback_key: pick(
                    &update.credentials.fallback_key,
                    &self.credentials.fallback_key,
                ),
            },
        }
    }
}

/// Mask a secret for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}
