//! Signed-in application context
//!
//! Built once at sign-in and handed to the coach and commands explicitly;
//! dropping it (sign-out or lock) drops the credentials with it.

use anyhow::{Context, Result};
use tracing::info;

use crate::store::SettingsStore;
use crate::types::{ModelMode, ProviderCredentials};

#[derive(Debug, Clone)]
pub struct AppContext {
    user_id: String,
    credentials: ProviderCredentials,
    mode: ModelMode,
    demo: bool,
}

impl AppContext {
    pub fn new(user_id: &str, credentials: ProviderCredentials, mode: ModelMode) -> Self {
        Self {
            user_id: user_id.to_string(),
            credentials,
            mode,
            demo: false,
        }
    }

    /// Load the user's saved keys; tiers with no saved key are filled from
    /// `fallback_credentials` (keys from the config file).
    pub async fn sign_in(
        user_id: &str,
        settings: &dyn SettingsStore,
        fallback_credentials: &ProviderCredentials,
        mode: ModelMode,
    ) -> Result<Self> {
        let stored = settings
            .load_settings(user_id)
            .await
            .with_context(|| format!("Failed to load settings for {}", user_id))?;
        let credentials = stored.credentials.or(fallback_credentials);
        info!(
            "Signed in as {} (mode={}, keys={:?})",
            user_id, mode, credentials
        );
        Ok(Self::new(user_id, credentials, mode))
    }

    /// Offline context: no provider calls are made
    pub fn demo(user_id: &str) -> Self {
        info!("Starting demo session for {}", user_id);
        Self {
            user_id: user_id.to_string(),
            credentials: ProviderCredentials::default(),
            mode: ModelMode::default(),
            demo: true,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn credentials(&self) -> &ProviderCredentials {
        &self.credentials
    }

    pub fn mode(&self) -> ModelMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }

    pub fn is_demo(&self) -> bool {
        self.demo
    }

    /// Swap in freshly saved keys without signing out
    pub fn replace_credentials(&mut self, credentials: ProviderCredentials) {
        self.credentials = credentials;
    }

    pub fn sign_out(self) {
        info!("Signed out {}", self.user_id);
    }
}
