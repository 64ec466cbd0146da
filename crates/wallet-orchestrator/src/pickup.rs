use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::agent::WalletAgent;
use crate::error::AgentError;
use crate::lifecycle::AppVisibility;
use crate::orchestrator::OrchestratorTriggers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupAction {
    Started,
    Stopped,
    /// The agent was not initialized; nothing was sent.
    Skipped,
}

/// Starts and stops mediator message pickup as the app moves between foreground and background.
///
/// Every agent call is best-effort: failures are logged and returned, never retried here. The
/// next transition naturally re-attempts.
#[derive(Clone)]
pub struct SessionPickupController {
    agent: Arc<dyn WalletAgent>,
}

impl SessionPickupController {
    #[must_use]
    pub fn new(agent: Arc<dyn WalletAgent>) -> Self {
        Self { agent }
    }

    pub async fn handle_transition(
        &self,
        visibility: AppVisibility,
    ) -> Result<PickupAction, AgentError> {
        if !self.agent.is_initialized() {
            debug!(
                "Agent not initialized, skipping pickup change for {}",
                visibility.as_str()
            );
            return Ok(PickupAction::Skipped);
        }

        match visibility {
            AppVisibility::Background => match self.agent.stop_message_pickup().await {
                Ok(()) => {
                    info!("Stopped agent message pickup");
                    Ok(PickupAction::Stopped)
                }
                Err(err) => {
                    error!("Error stopping agent message pickup, {}", err);
                    Err(err)
                }
            },
            AppVisibility::Active => match self.agent.initiate_message_pickup().await {
                Ok(()) => {
                    info!("Resuming agent message pickup");
                    Ok(PickupAction::Started)
                }
                Err(err) => {
                    error!("Error resuming agent message pickup, {}", err);
                    Err(err)
                }
            },
        }
    }

    /// Reacts to visibility changes until the lifecycle or store channel closes.
    ///
    /// Fires once for the current state when the authentication gate and agent readiness are
    /// both satisfied (at start or later), and again on every visibility change while the gate
    /// is open. Each operation runs as its own task, so a slow stop never delays a later start.
    pub async fn run(self, triggers: OrchestratorTriggers) {
        let OrchestratorTriggers {
            mut visibility,
            mut app_state,
            mut agent_ready,
        } = triggers;
        let mut in_flight = JoinSet::new();
        let mut gate_open = app_state.borrow_and_update().auth_gate();
        let mut ready = *agent_ready.borrow_and_update();
        let current = *visibility.borrow_and_update();
        if gate_open && ready {
            self.spawn_transition(&mut in_flight, current);
        }

        loop {
            let was_armed = gate_open && ready;
            tokio::select! {
                changed = visibility.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let next = *visibility.borrow_and_update();
                    if gate_open {
                        self.spawn_transition(&mut in_flight, next);
                    } else {
                        debug!(
                            "Authentication gate closed, deferring pickup for {}",
                            next.as_str()
                        );
                    }
                    continue;
                }
                changed = app_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    gate_open = app_state.borrow_and_update().auth_gate();
                }
                changed = agent_ready.changed(), if !ready => {
                    if changed.is_ok() {
                        ready = *agent_ready.borrow_and_update();
                    } else {
                        ready = true;
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {
                    continue;
                }
            }

            if gate_open && ready && !was_armed {
                let next = *visibility.borrow_and_update();
                self.spawn_transition(&mut in_flight, next);
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    fn spawn_transition(&self, in_flight: &mut JoinSet<()>, visibility: AppVisibility) {
        let controller = self.clone();
        in_flight.spawn(async move {
            let _ = controller.handle_transition(visibility).await;
        });
    }
}
