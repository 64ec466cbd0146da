//! Wires the lifecycle monitor, pickup controller, deep-link dispatcher and proof cleanup
//! reconciler to one agent and runs them as independent tasks.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::info;

use crate::agent::{ConnectionEstablisher, WalletAgent};
use crate::config::{ConfigInputError, OrchestratorConfig, resolve_orchestrator_config};
use crate::deep_link::DeepLinkDispatcher;
use crate::error::ErrorChannel;
use crate::lifecycle::{AppLifecycleState, AppStateMonitor, AppVisibility, MonitorSubscription};
use crate::pickup::SessionPickupController;
use crate::proof_cleanup::ProofCleanupReconciler;
use crate::store::{AppState, AppStore, DispatchAction, StateLoader};

/// Change notifications every reactive component wakes up on.
#[derive(Debug, Clone)]
pub struct OrchestratorTriggers {
    pub visibility: watch::Receiver<AppVisibility>,
    pub app_state: watch::Receiver<AppState>,
    pub agent_ready: watch::Receiver<bool>,
}

pub struct Orchestrator {
    agent: Arc<dyn WalletAgent>,
    establisher: Arc<dyn ConnectionEstablisher>,
    store: AppStore,
    monitor: AppStateMonitor,
    errors: ErrorChannel,
    config: OrchestratorConfig,
    agent_ready: watch::Sender<bool>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        agent: Arc<dyn WalletAgent>,
        establisher: Arc<dyn ConnectionEstablisher>,
        config: OrchestratorConfig,
    ) -> Self {
        let (agent_ready, _) = watch::channel(agent.is_initialized());
        Self {
            agent,
            establisher,
            store: AppStore::default(),
            monitor: AppStateMonitor::new(AppVisibility::Active),
            errors: ErrorChannel::new(),
            config,
            agent_ready,
        }
    }

    /// Builds an orchestrator with toggles resolved from the environment.
    pub fn from_env(
        agent: Arc<dyn WalletAgent>,
        establisher: Arc<dyn ConnectionEstablisher>,
    ) -> Result<Self, ConfigInputError> {
        let resolved = resolve_orchestrator_config()?;
        info!(
            "Orchestrator config: implicit invitations {} ({}), reuse connections {} ({})",
            resolved.config.enable_implicit_invitations,
            resolved.implicit_invitations_source,
            resolved.config.enable_reuse_connections,
            resolved.reuse_connections_source
        );
        Ok(Self::new(agent, establisher, resolved.config))
    }

    #[must_use]
    pub fn with_store(mut self, store: AppStore) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_initial_visibility(mut self, visibility: AppVisibility) -> Self {
        self.monitor = AppStateMonitor::new(visibility);
        self
    }

    #[must_use]
    pub fn store(&self) -> &AppStore {
        &self.store
    }

    #[must_use]
    pub fn monitor(&self) -> &AppStateMonitor {
        &self.monitor
    }

    #[must_use]
    pub fn errors(&self) -> &ErrorChannel {
        &self.errors
    }

    #[must_use]
    pub fn config(&self) -> OrchestratorConfig {
        self.config
    }

    #[must_use]
    pub fn triggers(&self) -> OrchestratorTriggers {
        OrchestratorTriggers {
            visibility: self.monitor.subscribe(),
            app_state: self.store.subscribe(),
            agent_ready: self.agent_ready.subscribe(),
        }
    }

    /// Entry point for scanned QR codes and OS-level URL opens.
    pub fn open_deep_link(&self, uri: impl Into<String>) -> bool {
        self.store
            .dispatch(DispatchAction::ActiveDeepLink(Some(uri.into())))
    }

    /// Re-reads the agent's initialization flag and wakes components waiting on it.
    pub fn refresh_agent_ready(&self) {
        let initialized = self.agent.is_initialized();
        self.agent_ready.send_if_modified(|ready| {
            if *ready == initialized {
                return false;
            }
            *ready = initialized;
            true
        });
    }

    pub async fn load_state(&self, loader: &dyn StateLoader) -> bool {
        self.store.load_with(loader, &self.errors).await
    }

    /// Spawns every component. When `lifecycle_source` is given, the monitor relays it for as
    /// long as the handle lives; otherwise the host feeds [`AppStateMonitor::observe`] directly.
    #[must_use]
    pub fn start(
        &self,
        lifecycle_source: Option<mpsc::Receiver<AppLifecycleState>>,
    ) -> OrchestratorHandle {
        let mut tasks = JoinSet::new();

        let pickup = SessionPickupController::new(Arc::clone(&self.agent));
        tasks.spawn(pickup.run(self.triggers()));

        let dispatcher = DeepLinkDispatcher::new(
            Arc::clone(&self.agent),
            Arc::clone(&self.establisher),
            Arc::new(self.store.clone()),
            self.errors.clone(),
            self.config,
        );
        tasks.spawn(dispatcher.run(self.triggers()));

        let reconciler = ProofCleanupReconciler::new(Arc::clone(&self.agent));
        tasks.spawn(reconciler.run(self.agent.subscribe_proofs()));

        let subscription = lifecycle_source.map(|source| self.monitor.attach(source));
        info!("Wallet orchestrator started");

        OrchestratorHandle {
            tasks,
            subscription,
        }
    }
}

/// Owns the spawned component tasks. Dropping it stops them.
pub struct OrchestratorHandle {
    tasks: JoinSet<()>,
    subscription: Option<MonitorSubscription>,
}

impl OrchestratorHandle {
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub async fn shutdown(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.release();
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        info!("Wallet orchestrator stopped");
    }
}
