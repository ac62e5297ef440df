//! Four-digit PIN lock kept in local storage

use anyhow::Context;
use thiserror::Error;
use tracing::info;

use crate::store::KeyValueStore;

pub const PIN_KEY: &str = "reflect_pin";
const PIN_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("a PIN must be exactly 4 digits")]
    InvalidPin,

    #[error("PINs don't match")]
    Mismatch,

    #[error("Incorrect PIN")]
    Incorrect,

    #[error("no PIN is set")]
    NotSet,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn validate(pin: &str) -> Result<(), LockError> {
    if pin.len() == PIN_LEN && pin.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(LockError::InvalidPin)
    }
}

/// App lock state. Locked from the start whenever a PIN exists.
pub struct PinLock<'a> {
    kv: &'a dyn KeyValueStore,
    pin: Option<String>,
    locked: bool,
}

impl std::fmt::Debug for PinLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinLock")
            .field("has_pin", &self.pin.is_some())
            .field("locked", &self.locked)
            .finish()
    }
}

impl<'a> PinLock<'a> {
    pub async fn load(kv: &'a dyn KeyValueStore) -> Result<Self, LockError> {
        let pin = kv.get(PIN_KEY).await.context("Failed to read PIN")?;
        let locked = pin.is_some();
        Ok(Self { kv, pin, locked })
    }

    pub fn has_pin(&self) -> bool {
        self.pin.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn lock(&mut self) {
        if self.pin.is_some() {
            self.locked = true;
        }
    }

    pub fn unlock(&mut self, attempt: &str) -> Result<(), LockError> {
        match &self.pin {
            None => Err(LockError::NotSet),
            Some(pin) if pin == attempt => {
                self.locked = false;
                Ok(())
            }
            Some(_) => Err(LockError::Incorrect),
        }
    }

    /// Set (or replace) the PIN; `confirm` must repeat it
    pub async fn set_pin(&mut self, pin: &str, confirm: &str) -> Result<(), LockError> {
        validate(pin)?;
        if pin != confirm {
            return Err(LockError::Mismatch);
        }
        if self.locked {
            return Err(LockError::Incorrect);
        }
        self.kv.set(PIN_KEY, pin).await.context("Failed to save PIN")?;
        self.pin = Some(pin.to_string());
        info!("PIN set");
        Ok(())
    }

    /// Remove the PIN; only possible while unlocked
    pub async fn clear(&mut self) -> Result<(), LockError> {
        if self.pin.is_none() {
            return Err(LockError::NotSet);
        }
        if self.locked {
            return Err(LockError::Incorrect);
        }
        self.kv.remove(PIN_KEY).await.context("Failed to clear PIN")?;
        self.pin = None;
        info!("PIN cleared");
        Ok(())
    }
}
