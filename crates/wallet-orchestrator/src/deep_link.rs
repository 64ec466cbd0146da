//! At-most-once handling of deep-link connection invitations.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::agent::{ConnectRequest, ConnectionEstablisher, WalletAgent};
use crate::config::OrchestratorConfig;
use crate::error::{ErrorChannel, WalletError};
use crate::lifecycle::AppVisibility;
use crate::orchestrator::OrchestratorTriggers;
use crate::store::DeepLinkStateAccess;

/// Query markers that identify an invitation-carrying link: out-of-band invitation, legacy
/// connection invitation, connectionless device message, and a generic shortened url.
pub const INVITATION_MARKERS: [&str; 4] = ["oob=", "c_i=", "d_m=", "url="];

#[must_use]
pub fn is_connection_invitation(uri: &str) -> bool {
    INVITATION_MARKERS.iter().any(|marker| uri.contains(marker))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressedReason {
    Backgrounded,
    AgentNotInitialized,
    AuthenticationGateClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Preconditions not met; the pending link, if any, stays in place.
    Suppressed(SuppressedReason),
    /// Nothing was pending.
    Idle,
    /// Not an invitation; cleared without a connection attempt.
    Ignored { uri: String },
    Connected { uri: String },
    Failed { uri: String, error: WalletError },
}

pub struct DeepLinkDispatcher {
    agent: Arc<dyn WalletAgent>,
    establisher: Arc<dyn ConnectionEstablisher>,
    state: Arc<dyn DeepLinkStateAccess>,
    errors: ErrorChannel,
    config: OrchestratorConfig,
}

impl DeepLinkDispatcher {
    #[must_use]
    pub fn new(
        agent: Arc<dyn WalletAgent>,
        establisher: Arc<dyn ConnectionEstablisher>,
        state: Arc<dyn DeepLinkStateAccess>,
        errors: ErrorChannel,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            agent,
            establisher,
            state,
            errors,
            config,
        }
    }

    /// Runs one dispatch cycle.
    ///
    /// The pending link is taken out of the slot before the attempt, so a re-entrant cycle
    /// observes an empty slot, and a link queued while the attempt is in flight survives for the
    /// next cycle.
    pub async fn dispatch_pending(&self, visibility: AppVisibility) -> DispatchOutcome {
        if !visibility.is_foreground() {
            return DispatchOutcome::Suppressed(SuppressedReason::Backgrounded);
        }
        if !self.agent.is_initialized() {
            return DispatchOutcome::Suppressed(SuppressedReason::AgentNotInitialized);
        }
        if !self.state.auth_gate() {
            return DispatchOutcome::Suppressed(SuppressedReason::AuthenticationGateClosed);
        }
        let Some(uri) = self.state.take_pending_deep_link() else {
            return DispatchOutcome::Idle;
        };

        self.handle_deep_link(uri).await
    }

    async fn handle_deep_link(&self, uri: String) -> DispatchOutcome {
        info!("Handling deeplink: {}", uri);

        if !is_connection_invitation(&uri) {
            info!("Deeplink carries no invitation, ignoring");
            return DispatchOutcome::Ignored { uri };
        }

        let request = ConnectRequest {
            uri: uri.clone(),
            is_deep_link: true,
            implicit_invitations: self.config.enable_implicit_invitations,
            reuse_connections: self.config.enable_reuse_connections,
        };
        match self.establisher.connect(request).await {
            Ok(()) => {
                info!("Connection established from deeplink");
                DispatchOutcome::Connected { uri }
            }
            Err(err) => {
                warn!("Failed to handle deeplink {}: {}", uri, err);
                let error = WalletError::deep_link(err.to_string());
                self.errors.publish(error.clone());
                DispatchOutcome::Failed { uri, error }
            }
        }
    }

    /// Re-evaluates the pending link on every lifecycle, store or agent-readiness change until
    /// the lifecycle or store channel closes. Attempts run one at a time on this task.
    pub async fn run(self, triggers: OrchestratorTriggers) {
        let OrchestratorTriggers {
            mut visibility,
            mut app_state,
            mut agent_ready,
        } = triggers;
        let mut ready_open = true;

        loop {
            let current = *visibility.borrow_and_update();
            app_state.mark_unchanged();
            let outcome = self.dispatch_pending(current).await;
            debug!("Deeplink dispatch cycle finished: {:?}", outcome);

            tokio::select! {
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = app_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = agent_ready.changed(), if ready_open => {
                    if changed.is_err() {
                        ready_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, ERROR_CODE_DEEP_LINK};
    use crate::in_memory::{InMemoryConnectionEstablisher, InMemoryWalletAgent};
    use crate::store::{AppState, AppStore, AuthenticationState, DispatchAction, OnboardingState};

    const OOB_LINK: &str = "https://example.org/?oob=abc";

    struct Harness {
        agent: Arc<InMemoryWalletAgent>,
        establisher: Arc<InMemoryConnectionEstablisher>,
        store: AppStore,
        errors: ErrorChannel,
        dispatcher: DeepLinkDispatcher,
    }

    fn harness(initial: AppState) -> Harness {
        let agent = Arc::new(InMemoryWalletAgent::default());
        let establisher = Arc::new(InMemoryConnectionEstablisher::new());
        let store = AppStore::new(initial);
        let errors = ErrorChannel::new();
        let dispatcher = DeepLinkDispatcher::new(
            agent.clone(),
            establisher.clone(),
            Arc::new(store.clone()),
            errors.clone(),
            OrchestratorConfig {
                enable_implicit_invitations: true,
                enable_reuse_connections: false,
            },
        );
        Harness {
            agent,
            establisher,
            store,
            errors,
            dispatcher,
        }
    }

    fn authenticated() -> AppState {
        AppState {
            authentication: AuthenticationState {
                did_authenticate: true,
            },
            onboarding: OnboardingState {
                onboarding_version: 1,
                did_complete_onboarding: true,
                ..OnboardingState::default()
            },
            ..AppState::default()
        }
    }

    #[test]
    fn invitation_markers_are_recognized() {
        assert!(is_connection_invitation(OOB_LINK));
        assert!(is_connection_invitation("didcomm://invite?c_i=eyJ0"));
        assert!(is_connection_invitation("bifold://aries?d_m=eyJ0"));
        assert!(is_connection_invitation("https://s.example.org/?url=abc"));
        assert!(!is_connection_invitation("https://example.org/"));
    }

    #[tokio::test]
    async fn successful_invitation_clears_pending_link() {
        let h = harness(authenticated());
        h.store.set_pending_deep_link(Some(OOB_LINK.to_string()));

        let outcome = h.dispatcher.dispatch_pending(AppVisibility::Active).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Connected {
                uri: OOB_LINK.to_string()
            }
        );
        assert_eq!(h.store.pending_deep_link(), None);
        let requests = h.establisher.requests().expect("requests");
        assert_eq!(requests.len(), 1);
        assert!(requests[0].is_deep_link);
        assert!(requests[0].implicit_invitations);
        assert!(!requests[0].reuse_connections);
    }

    #[tokio::test]
    async fn failed_invitation_clears_link_and_publishes_error() {
        let h = harness(authenticated());
        let mut errors = h.errors.subscribe();
        h.establisher
            .fail_next(AgentError::Invitation("invitation expired".to_string()))
            .expect("inject");
        h.store.set_pending_deep_link(Some(OOB_LINK.to_string()));

        let outcome = h.dispatcher.dispatch_pending(AppVisibility::Active).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(h.store.pending_deep_link(), None);
        let published = errors.recv().await.expect("error event");
        assert_eq!(published.code, ERROR_CODE_DEEP_LINK);
        assert!(published.cause.contains("invitation expired"));
    }

    #[tokio::test]
    async fn plain_link_is_cleared_without_connecting() {
        let h = harness(authenticated());
        h.store
            .set_pending_deep_link(Some("https://example.org/".to_string()));

        let outcome = h.dispatcher.dispatch_pending(AppVisibility::Active).await;

        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
        assert_eq!(h.store.pending_deep_link(), None);
        assert!(h.establisher.requests().expect("requests").is_empty());
    }

    #[tokio::test]
    async fn closed_gate_leaves_link_pending_until_authenticated() {
        let h = harness(AppState::default());
        h.store.dispatch(DispatchAction::SetOnboardingVersion(1));
        h.store.dispatch(DispatchAction::DidCompleteOnboarding(true));
        h.store.set_pending_deep_link(Some(OOB_LINK.to_string()));

        let outcome = h.dispatcher.dispatch_pending(AppVisibility::Active).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Suppressed(SuppressedReason::AuthenticationGateClosed)
        );
        assert_eq!(h.store.pending_deep_link().as_deref(), Some(OOB_LINK));
        assert!(h.establisher.requests().expect("requests").is_empty());

        h.store.dispatch(DispatchAction::DidAuthenticate(true));
        let outcome = h.dispatcher.dispatch_pending(AppVisibility::Active).await;
        assert!(matches!(outcome, DispatchOutcome::Connected { .. }));
        assert_eq!(h.establisher.requests().expect("requests").len(), 1);
    }

    #[tokio::test]
    async fn background_and_uninitialized_agent_suppress_dispatch() {
        let h = harness(authenticated());
        h.store.set_pending_deep_link(Some(OOB_LINK.to_string()));

        assert_eq!(
            h.dispatcher.dispatch_pending(AppVisibility::Background).await,
            DispatchOutcome::Suppressed(SuppressedReason::Backgrounded)
        );
        h.agent.set_initialized(false);
        assert_eq!(
            h.dispatcher.dispatch_pending(AppVisibility::Active).await,
            DispatchOutcome::Suppressed(SuppressedReason::AgentNotInitialized)
        );
        assert_eq!(h.store.pending_deep_link().as_deref(), Some(OOB_LINK));
    }

    #[tokio::test]
    async fn second_cycle_on_same_link_does_not_retry() {
        let h = harness(authenticated());
        h.store.set_pending_deep_link(Some(OOB_LINK.to_string()));

        let _ = h.dispatcher.dispatch_pending(AppVisibility::Active).await;
        let second = h.dispatcher.dispatch_pending(AppVisibility::Active).await;

        assert_eq!(second, DispatchOutcome::Idle);
        assert_eq!(h.establisher.requests().expect("requests").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_cycles_connect_once_per_link() {
        let h = harness(authenticated());
        let dispatcher = Arc::new(h.dispatcher);

        for round in 1..=50 {
            h.store.set_pending_deep_link(Some(format!("{OOB_LINK}&round={round}")));

            let mut cycles = tokio::task::JoinSet::new();
            for _ in 0..8 {
                let dispatcher = Arc::clone(&dispatcher);
                cycles.spawn(
                    async move { dispatcher.dispatch_pending(AppVisibility::Active).await },
                );
            }
            let mut connected = 0;
            while let Some(outcome) = cycles.join_next().await {
                match outcome.expect("cycle task") {
                    DispatchOutcome::Connected { .. } => connected += 1,
                    other => assert_eq!(other, DispatchOutcome::Idle),
                }
            }

            assert_eq!(connected, 1);
            assert_eq!(h.establisher.requests().expect("requests").len(), round);
            assert_eq!(h.store.pending_deep_link(), None);
        }
    }
}
