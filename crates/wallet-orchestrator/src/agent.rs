//! Boundary to the identity agent: the operations this core invokes and the proof records it
//! reads.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::error::AgentError;

/// Metadata slot holding [`ProofCustomMetadata`] on a proof record.
pub const PROOF_CUSTOM_METADATA_SLOT: &str = "customMetadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProofState {
    ProposalSent,
    ProposalReceived,
    RequestSent,
    RequestReceived,
    PresentationSent,
    PresentationReceived,
    Declined,
    Abandoned,
    Done,
}

impl ProofState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProposalSent => "proposal-sent",
            Self::ProposalReceived => "proposal-received",
            Self::RequestSent => "request-sent",
            Self::RequestReceived => "request-received",
            Self::PresentationSent => "presentation-sent",
            Self::PresentationReceived => "presentation-received",
            Self::Declined => "declined",
            Self::Abandoned => "abandoned",
            Self::Done => "done",
        }
    }
}

/// Application-attached fields stored under [`PROOF_CUSTOM_METADATA_SLOT`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProofCustomMetadata {
    #[serde(default)]
    pub delete_conn_after_seen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_seen: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofExchangeRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    pub state: ProofState,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProofExchangeRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, state: ProofState) -> Self {
        Self {
            id: id.into(),
            connection_id: None,
            state,
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.connection_id = Some(connection_id.into());
        self
    }

    #[must_use]
    pub fn with_custom_metadata(mut self, metadata: &ProofCustomMetadata) -> Self {
        if let Ok(value) = serde_json::to_value(metadata) {
            self.metadata
                .insert(PROOF_CUSTOM_METADATA_SLOT.to_string(), value);
        }
        self
    }

    /// Decodes the custom metadata slot. A missing or malformed slot reads as `None`.
    #[must_use]
    pub fn custom_metadata(&self) -> Option<ProofCustomMetadata> {
        self.metadata
            .get(PROOF_CUSTOM_METADATA_SLOT)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    #[must_use]
    pub fn wants_connection_cleanup(&self) -> bool {
        self.custom_metadata()
            .is_some_and(|metadata| metadata.delete_conn_after_seen)
    }

    #[must_use]
    pub fn is_terminal_rejection(&self) -> bool {
        matches!(self.state, ProofState::Declined | ProofState::Abandoned)
    }
}

/// The long-lived agent session. Owned by the host; this core never recreates it.
#[async_trait]
pub trait WalletAgent: Send + Sync {
    fn is_initialized(&self) -> bool;

    async fn initiate_message_pickup(&self) -> Result<(), AgentError>;

    async fn stop_message_pickup(&self) -> Result<(), AgentError>;

    async fn delete_connection(&self, connection_id: &str) -> Result<(), AgentError>;

    /// Live view of every proof exchange record the agent holds.
    fn subscribe_proofs(&self) -> watch::Receiver<Vec<ProofExchangeRecord>>;

    /// Merges `patch` into the object stored under `slot`, leaving other keys untouched.
    async fn merge_proof_metadata(
        &self,
        proof_id: &str,
        slot: &str,
        patch: Map<String, Value>,
    ) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    pub uri: String,
    pub is_deep_link: bool,
    pub implicit_invitations: bool,
    pub reuse_connections: bool,
}

/// Resolves an invitation URI and establishes (or reuses) a connection for it.
///
/// Implementations own the agent hand-off and any navigation the host performs afterwards.
#[async_trait]
pub trait ConnectionEstablisher: Send + Sync {
    async fn connect(&self, request: ConnectRequest) -> Result<(), AgentError>;
}
