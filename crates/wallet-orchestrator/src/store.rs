//! Application-wide state shared between the host shell and the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{AgentError, ErrorChannel, WalletError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationState {
    pub did_authenticate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingState {
    pub onboarding_version: u32,
    pub did_complete_onboarding: bool,
    pub did_consider_biometry: bool,
    pub post_auth_screens: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub state_loaded: bool,
    pub deep_link: Option<String>,
    pub authentication: AuthenticationState,
    pub onboarding: OnboardingState,
}

impl AppState {
    /// Whether the wallet's main surface, and with it every orchestrator effect, may run.
    #[must_use]
    pub fn auth_gate(&self) -> bool {
        let onboarding = &self.onboarding;
        let onboarded = if onboarding.onboarding_version == 0 {
            onboarding.did_consider_biometry
        } else {
            onboarding.did_complete_onboarding
        };
        onboarded && self.authentication.did_authenticate && onboarding.post_auth_screens.is_empty()
    }
}

/// Store mutation. On the wire every payload is a one-element array, e.g.
/// `{"type": "ACTIVE_DEEP_LINK", "payload": ["https://..."]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchAction {
    StateLoaded,
    ActiveDeepLink(#[serde(with = "payload_array")] Option<String>),
    DidAuthenticate(#[serde(with = "payload_array")] bool),
    DidCompleteOnboarding(#[serde(with = "payload_array")] bool),
    DidConsiderBiometry(#[serde(with = "payload_array")] bool),
    SetOnboardingVersion(#[serde(with = "payload_array")] u32),
    SetPostAuthScreens(#[serde(with = "payload_array")] Vec<String>),
    PostAuthScreenSeen(#[serde(with = "payload_array")] String),
}

mod payload_array {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T: Serialize, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        (value,).serialize(serializer)
    }

    pub fn deserialize<'de, T: Deserialize<'de>, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let (value,) = <(T,)>::deserialize(deserializer)?;
        Ok(value)
    }
}

impl DispatchAction {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateLoaded => "STATE_LOADED",
            Self::ActiveDeepLink(_) => "ACTIVE_DEEP_LINK",
            Self::DidAuthenticate(_) => "DID_AUTHENTICATE",
            Self::DidCompleteOnboarding(_) => "DID_COMPLETE_ONBOARDING",
            Self::DidConsiderBiometry(_) => "DID_CONSIDER_BIOMETRY",
            Self::SetOnboardingVersion(_) => "SET_ONBOARDING_VERSION",
            Self::SetPostAuthScreens(_) => "SET_POST_AUTH_SCREENS",
            Self::PostAuthScreenSeen(_) => "POST_AUTH_SCREEN_SEEN",
        }
    }
}

/// Applies `action` to `state`. Returns whether anything changed.
pub fn reduce(state: &mut AppState, action: DispatchAction) -> bool {
    let before = state.clone();
    match action {
        DispatchAction::StateLoaded => state.state_loaded = true,
        DispatchAction::ActiveDeepLink(link) => {
            state.deep_link = link.filter(|value| !value.trim().is_empty());
        }
        DispatchAction::DidAuthenticate(value) => state.authentication.did_authenticate = value,
        DispatchAction::DidCompleteOnboarding(value) => {
            state.onboarding.did_complete_onboarding = value;
        }
        DispatchAction::DidConsiderBiometry(value) => {
            state.onboarding.did_consider_biometry = value;
        }
        DispatchAction::SetOnboardingVersion(version) => {
            state.onboarding.onboarding_version = version;
        }
        DispatchAction::SetPostAuthScreens(screens) => state.onboarding.post_auth_screens = screens,
        DispatchAction::PostAuthScreenSeen(screen) => {
            state
                .onboarding
                .post_auth_screens
                .retain(|pending| *pending != screen);
        }
    }
    *state != before
}

/// Narrow view of the store used by the deep-link dispatcher.
pub trait DeepLinkStateAccess: Send + Sync {
    fn pending_deep_link(&self) -> Option<String>;

    fn set_pending_deep_link(&self, link: Option<String>);

    /// Removes and returns the pending link in one step.
    fn take_pending_deep_link(&self) -> Option<String>;

    fn auth_gate(&self) -> bool;
}

/// Single-writer store: every mutation goes through [`AppStore::dispatch`] and is published to
/// subscribers only when it changes the state.
#[derive(Debug, Clone)]
pub struct AppStore {
    tx: Arc<watch::Sender<AppState>>,
}

impl Default for AppStore {
    fn default() -> Self {
        Self::new(AppState::default())
    }
}

impl AppStore {
    #[must_use]
    pub fn new(initial: AppState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn dispatch(&self, action: DispatchAction) -> bool {
        let kind = action.kind();
        let changed = self.tx.send_if_modified(|state| reduce(state, action));
        debug!("Dispatched {} (changed: {})", kind, changed);
        changed
    }

    #[must_use]
    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    /// Runs `loader` once and marks the state loaded. A failure is published as a
    /// [`WalletError`] and the store keeps its defaults.
    pub async fn load_with(&self, loader: &dyn StateLoader, errors: &ErrorChannel) -> bool {
        match loader.load_state(self).await {
            Ok(()) => {
                self.dispatch(DispatchAction::StateLoaded);
                info!("Application state loaded");
                true
            }
            Err(error) => {
                warn!("Failed to load application state: {}", error);
                errors.publish(WalletError::state_load(error.to_string()));
                false
            }
        }
    }
}

impl DeepLinkStateAccess for AppStore {
    fn pending_deep_link(&self) -> Option<String> {
        self.tx.borrow().deep_link.clone()
    }

    fn set_pending_deep_link(&self, link: Option<String>) {
        self.dispatch(DispatchAction::ActiveDeepLink(link));
    }

    fn take_pending_deep_link(&self) -> Option<String> {
        let mut taken = None;
        self.tx.send_if_modified(|state| {
            taken = state.deep_link.take();
            taken.is_some()
        });
        taken
    }

    fn auth_gate(&self) -> bool {
        self.tx.borrow().auth_gate()
    }
}

/// Restores persisted settings into the store by dispatching actions.
#[async_trait]
pub trait StateLoader: Send + Sync {
    async fn load_state(&self, store: &AppStore) -> Result<(), AgentError>;
}
