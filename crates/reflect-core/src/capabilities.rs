//! Device capabilities as injected ports
//!
//! Speech input, speech output and local notifications are optional on any
//! given machine. Each is a trait so the coach can run (and be tested) with
//! none of them present.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("{0} is not supported on this device")]
    Unsupported(&'static str),

    #[error("no speech was detected")]
    NoSpeechDetected,

    #[error("permission to use {0} was denied")]
    PermissionDenied(&'static str),

    #[error("{0}")]
    Failed(String),
}

/// Speech-to-text for a single utterance
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn listen_once(&self) -> Result<String, CapabilityError>;
}

/// Text-to-speech playback
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), CapabilityError>;
    async fn stop(&self) -> Result<(), CapabilityError>;
}

/// Local (desktop) notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str) -> Result<(), CapabilityError>;
}

/// Stand-in for any capability the device lacks
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

#[async_trait]
impl SpeechRecognizer for Unsupported {
    async fn listen_once(&self) -> Result<String, CapabilityError> {
        Err(CapabilityError::Unsupported("speech recognition"))
    }
}

#[async_trait]
impl SpeechSynthesizer for Unsupported {
    async fn speak(&self, _text: &str) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported("speech synthesis"))
    }

    async fn stop(&self) -> Result<(), CapabilityError> {
        Ok(())
    }
}

#[async_trait]
impl Notifier for Unsupported {
    async fn notify(&self, _title: &str, _body: &str) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported("notifications"))
    }
}

/// Speaks through a local command such as macOS `say` or `espeak`
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    stop_signal: Notify,
}

impl CommandSynthesizer {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            stop_signal: Notify::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// `say` on macOS, `espeak` elsewhere
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new("say")
        } else {
            Self::new("espeak")
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn speak(&self, text: &str) -> Result<(), CapabilityError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        // Starting new speech cancels whatever is still playing
        self.stop_signal.notify_waiters();

        debug!("{}: speaking {} chars", self.program, text.len());
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CapabilityError::Unsupported("speech synthesis"),
                _ => CapabilityError::Failed(format!("failed to run {}: {}", self.program, e)),
            })?;

        tokio::select! {
            status = child.wait() => match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(CapabilityError::Failed(format!(
                    "{} exited with {}",
                    self.program, s
                ))),
                Err(e) => Err(CapabilityError::Failed(e.to_string())),
            },
            _ = self.stop_signal.notified() => {
                info!("Stopping speech playback");
                child
                    .kill()
                    .await
                    .map_err(|e| CapabilityError::Failed(e.to_string()))
            }
        }
    }

    async fn stop(&self) -> Result<(), CapabilityError> {
        self.stop_signal.notify_waiters();
        Ok(())
    }
}

/// Writes notifications to the terminal through the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), CapabilityError> {
        info!("🔔 {}: {}", title, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_capabilities() {
        let none = Unsupported;
        assert!(matches!(
            SpeechRecognizer::listen_once(&none).await,
            Err(CapabilityError::Unsupported(_))
        ));
        assert!(matches!(
            none.speak("hello").await,
            Err(CapabilityError::Unsupported(_))
        ));
        assert!(SpeechSynthesizer::stop(&none).await.is_ok());
        assert!(matches!(
            none.notify("Reflect", "hi").await,
            Err(CapabilityError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unsupported() {
        let synth = CommandSynthesizer::new("reflect-no-such-tts-binary");
        assert!(matches!(
            synth.speak("hello").await,
            Err(CapabilityError::Unsupported(_))
        ));
        // blank text never spawns anything
        assert!(synth.speak("  ").await.is_ok());
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        assert!(LogNotifier.notify("Reflect", "Time to check in").await.is_ok());
    }
}
