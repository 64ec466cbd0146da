//! In-process agent and connection establisher used by tests and host prototypes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Notify, watch};

use crate::agent::{ConnectRequest, ConnectionEstablisher, ProofExchangeRecord, WalletAgent};
use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCallKind {
    InitiatePickup,
    StopPickup,
    DeleteConnection,
    MergeProofMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCall {
    InitiatePickup,
    StopPickup,
    DeleteConnection(String),
    MergeProofMetadata { proof_id: String, slot: String },
}

impl AgentCall {
    #[must_use]
    pub fn kind(&self) -> AgentCallKind {
        match self {
            Self::InitiatePickup => AgentCallKind::InitiatePickup,
            Self::StopPickup => AgentCallKind::StopPickup,
            Self::DeleteConnection(_) => AgentCallKind::DeleteConnection,
            Self::MergeProofMetadata { .. } => AgentCallKind::MergeProofMetadata,
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, label: &str) -> Result<MutexGuard<'a, T>, AgentError> {
    mutex
        .lock()
        .map_err(|_| AgentError::Internal(format!("mutex poisoned: {label}")))
}

fn take_failure(
    failures: &Mutex<Vec<(AgentCallKind, AgentError)>>,
    kind: AgentCallKind,
) -> Result<Option<AgentError>, AgentError> {
    let mut failures = lock(failures, "failures")?;
    let position = failures.iter().position(|(candidate, _)| *candidate == kind);
    Ok(position.map(|index| failures.remove(index).1))
}

/// Records every call, tracks connections and proof records, and fails on demand.
pub struct InMemoryWalletAgent {
    initialized: AtomicBool,
    pickup_running: AtomicBool,
    calls: Mutex<Vec<AgentCall>>,
    failures: Mutex<Vec<(AgentCallKind, AgentError)>>,
    connections: Mutex<BTreeSet<String>>,
    proofs: watch::Sender<Vec<ProofExchangeRecord>>,
}

impl Default for InMemoryWalletAgent {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InMemoryWalletAgent {
    #[must_use]
    pub fn new(initialized: bool) -> Self {
        let (proofs, _) = watch::channel(Vec::new());
        Self {
            initialized: AtomicBool::new(initialized),
            pickup_running: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            connections: Mutex::new(BTreeSet::new()),
            proofs,
        }
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    #[must_use]
    pub fn pickup_running(&self) -> bool {
        self.pickup_running.load(Ordering::SeqCst)
    }

    /// Makes the next call of `kind` fail with `error`. Failures queue per kind.
    pub fn fail_next(&self, kind: AgentCallKind, error: AgentError) -> Result<(), AgentError> {
        lock(&self.failures, "failures")?.push((kind, error));
        Ok(())
    }

    pub fn add_connection(&self, connection_id: impl Into<String>) -> Result<(), AgentError> {
        lock(&self.connections, "connections")?.insert(connection_id.into());
        Ok(())
    }

    pub fn connections(&self) -> Result<Vec<String>, AgentError> {
        Ok(lock(&self.connections, "connections")?.iter().cloned().collect())
    }

    pub fn calls(&self) -> Result<Vec<AgentCall>, AgentError> {
        Ok(lock(&self.calls, "calls")?.clone())
    }

    pub fn calls_of(&self, kind: AgentCallKind) -> Result<Vec<AgentCall>, AgentError> {
        Ok(self
            .calls()?
            .into_iter()
            .filter(|call| call.kind() == kind)
            .collect())
    }

    /// Inserts or replaces a proof record and notifies proof subscribers.
    pub fn upsert_proof(&self, record: ProofExchangeRecord) {
        self.proofs.send_modify(|proofs| {
            if let Some(existing) = proofs.iter_mut().find(|proof| proof.id == record.id) {
                *existing = record;
            } else {
                proofs.push(record);
            }
        });
    }

    #[must_use]
    pub fn proof(&self, proof_id: &str) -> Option<ProofExchangeRecord> {
        self.proofs
            .borrow()
            .iter()
            .find(|proof| proof.id == proof_id)
            .cloned()
    }

    fn record(&self, call: AgentCall) -> Result<(), AgentError> {
        let kind = call.kind();
        lock(&self.calls, "calls")?.push(call);
        match take_failure(&self.failures, kind)? {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WalletAgent for InMemoryWalletAgent {
    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn initiate_message_pickup(&self) -> Result<(), AgentError> {
        self.record(AgentCall::InitiatePickup)?;
        self.pickup_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_message_pickup(&self) -> Result<(), AgentError> {
        self.record(AgentCall::StopPickup)?;
        self.pickup_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), AgentError> {
        self.record(AgentCall::DeleteConnection(connection_id.to_string()))?;
        if lock(&self.connections, "connections")?.remove(connection_id) {
            Ok(())
        } else {
            Err(AgentError::ConnectionNotFound(connection_id.to_string()))
        }
    }

    fn subscribe_proofs(&self) -> watch::Receiver<Vec<ProofExchangeRecord>> {
        self.proofs.subscribe()
    }

    async fn merge_proof_metadata(
        &self,
        proof_id: &str,
        slot: &str,
        patch: Map<String, Value>,
    ) -> Result<(), AgentError> {
        self.record(AgentCall::MergeProofMetadata {
            proof_id: proof_id.to_string(),
            slot: slot.to_string(),
        })?;

        let mut found = false;
        self.proofs.send_if_modified(|proofs| {
            let Some(record) = proofs.iter_mut().find(|proof| proof.id == proof_id) else {
                return false;
            };
            found = true;
            let entry = record
                .metadata
                .entry(slot.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(existing) = entry else {
                return false;
            };
            let mut changed = false;
            for (key, value) in patch {
                if existing.get(&key) != Some(&value) {
                    existing.insert(key, value);
                    changed = true;
                }
            }
            changed
        });

        if found {
            Ok(())
        } else {
            Err(AgentError::Storage(format!("unknown proof record {proof_id}")))
        }
    }
}

/// Accepts or rejects invitations on demand and records every request it sees.
#[derive(Default)]
pub struct InMemoryConnectionEstablisher {
    requests: Mutex<Vec<ConnectRequest>>,
    failures: Mutex<Vec<AgentError>>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryConnectionEstablisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: AgentError) -> Result<(), AgentError> {
        lock(&self.failures, "failures")?.push(error);
        Ok(())
    }

    /// Parks subsequent `connect` calls until the returned notifier fires once per call.
    pub fn hold(&self) -> Result<Arc<Notify>, AgentError> {
        let notify = Arc::new(Notify::new());
        *lock(&self.hold, "hold")? = Some(Arc::clone(&notify));
        Ok(notify)
    }

    pub fn requests(&self) -> Result<Vec<ConnectRequest>, AgentError> {
        Ok(lock(&self.requests, "requests")?.clone())
    }
}

#[async_trait]
impl ConnectionEstablisher for InMemoryConnectionEstablisher {
    async fn connect(&self, request: ConnectRequest) -> Result<(), AgentError> {
        lock(&self.requests, "requests")?.push(request);
        let hold = lock(&self.hold, "hold")?.clone();
        if let Some(notify) = hold {
            notify.notified().await;
        }
        let mut failures = lock(&self.failures, "failures")?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.remove(0))
        }
    }
}
