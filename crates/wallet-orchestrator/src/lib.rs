#![cfg_attr(test, allow(clippy::expect_used))]

pub mod agent;
pub mod config;
pub mod deep_link;
pub mod error;
pub mod in_memory;
pub mod lifecycle;
pub mod orchestrator;
pub mod pickup;
pub mod proof_cleanup;
pub mod store;

pub use agent::{
    ConnectRequest, ConnectionEstablisher, PROOF_CUSTOM_METADATA_SLOT, ProofCustomMetadata,
    ProofExchangeRecord, ProofState, WalletAgent,
};
pub use config::{
    ConfigInputError, ENV_ENABLE_IMPLICIT_INVITATIONS, ENV_ENABLE_REUSE_CONNECTIONS,
    OrchestratorConfig, resolve_orchestrator_config,
};
pub use deep_link::{
    DeepLinkDispatcher, DispatchOutcome, SuppressedReason, is_connection_invitation,
};
pub use error::{
    AgentError, ERROR_CODE_DEEP_LINK, ERROR_CODE_STATE_LOAD, ErrorCategory, ErrorChannel,
    WalletError,
};
pub use in_memory::{
    AgentCall, AgentCallKind, InMemoryConnectionEstablisher, InMemoryWalletAgent,
};
pub use lifecycle::{AppLifecycleState, AppStateMonitor, AppVisibility, MonitorSubscription};
pub use orchestrator::{Orchestrator, OrchestratorHandle, OrchestratorTriggers};
pub use pickup::{PickupAction, SessionPickupController};
pub use proof_cleanup::{CleanupReport, ProofCleanupReconciler};
pub use store::{
    AppState, AppStore, AuthenticationState, DeepLinkStateAccess, DispatchAction,
    OnboardingState, StateLoader,
};
