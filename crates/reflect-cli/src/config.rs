use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use reflect_core::providers::RetryPolicy;
use reflect_core::providers::google::{GEMINI_BASE_URL, GEMINI_DEFAULT_MODEL};
use reflect_core::providers::openai_compat::{
    DEEPSEEK_BASE_URL, DEEPSEEK_DEFAULT_MODEL, GROQ_BASE_URL, GROQ_DEFAULT_MODEL,
};
use reflect_core::types::{ModelMode, ProviderCredentials, mask_secret};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectConfig {
    #[serde(default)]
    pub coach: CoachConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub user: UserConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoachConfig {
    #[serde(default)]
    pub default_mode: ModelMode,
    /// Replaces the built-in CBT instruction when set
    #[serde(default)]
    pub instruction_file: Option<String>,
    /// Canned replies, no provider calls
    #[serde(default)]
    pub demo: bool,
    /// Read replies aloud with the system speech command
    #[serde(default)]
    pub speak_replies: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub fast: FastProviderConfig,
    #[serde(default)]
    pub deep: DeepProviderConfig,
    #[serde(default)]
    pub fallback: FallbackProviderConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FastProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_groq_base_url")]
    pub base_url: String,
    #[serde(default = "default_groq_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_fast_max_tokens")]
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for FastProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for FastProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_groq_base_url(),
            model: default_groq_model(),
            temperature: default_temperature(),
            max_tokens: default_fast_max_tokens(),
        }
    }
}

fn default_groq_base_url() -> String {
    GROQ_BASE_URL.to_string()
}
fn default_groq_model() -> String {
    GROQ_DEFAULT_MODEL.to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_fast_max_tokens() -> Option<u32> {
    Some(1024)
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DeepProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_deepseek_base_url")]
    pub base_url: String,
    #[serde(default = "default_deepseek_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl std::fmt::Debug for DeepProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeepProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for DeepProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_deepseek_base_url(),
            model: default_deepseek_model(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

fn default_deepseek_base_url() -> String {
    DEEPSEEK_BASE_URL.to_string()
}
fn default_deepseek_model() -> String {
    DEEPSEEK_DEFAULT_MODEL.to_string()
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FallbackProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl std::fmt::Debug for FallbackProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackProviderConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl Default for FallbackProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

fn default_gemini_base_url() -> String {
    GEMINI_BASE_URL.to_string()
}
fn default_gemini_model() -> String {
    GEMINI_DEFAULT_MODEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Give up on a provider once backoff would run past this many seconds
    #[serde(default)]
    pub max_elapsed_secs: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_elapsed_secs: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.initial_delay_ms))
            .with_max_elapsed(self.max_elapsed_secs.map(Duration::from_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.reflect/data/reflect.db".to_string()
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_user_id")]
    pub id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: default_user_id(),
        }
    }
}

fn default_user_id() -> String {
    "local".to_string()
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".reflect")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(s: &str) -> PathBuf {
    match (s.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(s),
    }
}

fn non_blank(key: &str) -> Option<String> {
    let key = key.trim();
    (!key.is_empty()).then(|| key.to_string())
}

impl ReflectConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path.clone().unwrap_or_else(default_config_path);

        check_permissions(&path)?;

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `reflect init` first.",
                path.display()
            )
        })?;

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let raw: Self = toml::from_str(content)?;
        for (tier, key) in [
            ("fast", &raw.providers.fast.api_key),
            ("deep", &raw.providers.deep.api_key),
            ("fallback", &raw.providers.fallback.api_key),
        ] {
            if non_blank(key).is_some() && !key.contains("${") {
                warn!(
                    "The {} provider key is hardcoded in the config file. Prefer `reflect settings` or an environment variable.",
                    tier
                );
            }
        }

        Ok(toml::from_str(&expand_env_vars(content))?)
    }

    /// Keys from the config file; blank entries count as absent
    pub fn credentials(&self) -> ProviderCredentials {
        ProviderCredentials {
            fast_key: non_blank(&self.providers.fast.api_key),
            deep_key: non_blank(&self.providers.deep.api_key),
            fallback_key: non_blank(&self.providers.fallback.api_key),
        }
    }

    /// The coaching instruction: the configured file, or `default` when unset
    pub fn instruction(&self, default: &str) -> Result<String> {
        match &self.coach.instruction_file {
            Some(file) => {
                let path = expand_home(file);
                std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read instruction file {}", path.display()))
            }
            None => Ok(default.to_string()),
        }
    }
}

/// Refuse config files that group or other can read; they may hold API keys
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                bail!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain API keys. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Environment variables that may be expanded in the config file
const ALLOWED_ENV_VARS: &[&str] = &[
    "GROQ_API_KEY",
    "DEEPSEEK_API_KEY",
    "GEMINI_API_KEY",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + len];
        out.push_str(&rest[..start]);
        if ALLOWED_ENV_VARS.contains(&name) {
            out.push_str(&std::env::var(name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                name
            );
            out.push_str(&rest[start..start + len + 1]);
        }
        rest = &rest[start + len + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config = ReflectConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.coach.default_mode, ModelMode::Fast);
        assert!(!config.coach.demo);
        assert_eq!(config.providers.fast.model, GROQ_DEFAULT_MODEL);
        assert_eq!(config.providers.fast.max_tokens, Some(1024));
        assert_eq!(config.providers.deep.base_url, DEEPSEEK_BASE_URL);
        assert_eq!(config.providers.deep.max_tokens, None);
        assert_eq!(config.providers.fallback.model, GEMINI_DEFAULT_MODEL);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.user.id, "local");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = ReflectConfig::parse("").unwrap();
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(!config.credentials().has_any());
        assert!(config.storage.db_path().ends_with("reflect.db"));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = ReflectConfig::parse(
            r#"
            [coach]
            default_mode = "deep"

            [providers.deep]
            api_key = "  "
            model = "deepseek-chat"

            [retry]
            max_retries = 1
            initial_delay_ms = 250
            max_elapsed_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.coach.default_mode, ModelMode::Deep);
        assert_eq!(config.providers.deep.model, "deepseek-chat");
        assert_eq!(config.providers.deep.base_url, DEEPSEEK_BASE_URL);
        assert_eq!(config.credentials().deep_key, None);

        let policy = config.retry.policy();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_elapsed, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        // HOME is allowlisted and set in any test environment
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(expand_env_vars("dir=${HOME}/x"), format!("dir={}/x", home));
        assert_eq!(expand_env_vars("k=${AWS_SECRET_ACCESS_KEY}"), "k=${AWS_SECRET_ACCESS_KEY}");
        assert_eq!(expand_env_vars("unterminated ${HOME"), "unterminated ${HOME");
        assert_eq!(expand_env_vars("plain"), "plain");
    }

    #[test]
    fn test_debug_masks_keys() {
        let mut config = ReflectConfig::default();
        config.providers.fast.api_key = "gsk_abcdefghijklmnop".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("abcdefghijklmnop"));
        assert!(debug.contains("gsk...mnop"));
    }

    #[test]
    fn test_instruction_file_overrides_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("coach.md");
        std::fs::write(&file, "Be brief.").unwrap();

        let mut config = ReflectConfig::default();
        assert_eq!(config.instruction("built-in").unwrap(), "built-in");
        config.coach.instruction_file = Some(file.display().to_string());
        assert_eq!(config.instruction("built-in").unwrap(), "Be brief.");
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_config_refused() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = ReflectConfig::load(&Some(path.clone())).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(ReflectConfig::load(&Some(path)).is_ok());
    }
}
