use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Deep-link resolution or connection establishment failed.
pub const ERROR_CODE_DEEP_LINK: u32 = 1039;
/// Persisted application state could not be loaded.
pub const ERROR_CODE_STATE_LOAD: u32 = 1001;

const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Failures reported by the agent collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentError {
    #[error("mediation error: {0}")]
    Mediation(String),
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("invitation error: {0}")]
    Invitation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("internal: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    DeepLinkHandling,
    StateLoading,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeepLinkHandling => "deep_link_handling",
            Self::StateLoading => "state_loading",
        }
    }
}

/// User-facing error event published on the [`ErrorChannel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{title} ({code}): {message}")]
pub struct WalletError {
    pub category: ErrorCategory,
    pub title: String,
    pub message: String,
    pub cause: String,
    pub code: u32,
}

impl WalletError {
    #[must_use]
    pub fn deep_link(cause: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::DeepLinkHandling,
            title: "Unable to open link".to_string(),
            message: "The invitation in this link could not be accepted. Try scanning it again or ask for a new invitation.".to_string(),
            cause: cause.into(),
            code: ERROR_CODE_DEEP_LINK,
        }
    }

    #[must_use]
    pub fn state_load(cause: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::StateLoading,
            title: "Unable to load wallet state".to_string(),
            message: "Saved settings could not be restored. Defaults are in use until the app restarts.".to_string(),
            cause: cause.into(),
            code: ERROR_CODE_STATE_LOAD,
        }
    }
}

/// Process-wide fan-out of [`WalletError`] events.
///
/// Publishing never fails: with no subscriber attached the event is dropped.
#[derive(Debug, Clone)]
pub struct ErrorChannel {
    tx: broadcast::Sender<WalletError>,
}

impl Default for ErrorChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, error: WalletError) {
        tracing::warn!(
            "Publishing wallet error {} ({}): {}",
            error.code,
            error.category.as_str(),
            error.cause
        );
        let _ = self.tx.send(error);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WalletError> {
        self.tx.subscribe()
    }
}
