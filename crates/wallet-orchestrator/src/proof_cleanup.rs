use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent::{PROOF_CUSTOM_METADATA_SLOT, ProofExchangeRecord, WalletAgent};

const DELETE_CONN_AFTER_SEEN_KEY: &str = "delete_conn_after_seen";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub examined: usize,
    /// Connections actually removed.
    pub deleted_connections: Vec<String>,
    /// Deletions that failed and were swallowed.
    pub failed_deletions: Vec<String>,
    /// Proof records whose cleanup flag was cleared.
    pub flags_cleared: Vec<String>,
}

impl CleanupReport {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.deleted_connections.is_empty()
            && self.failed_deletions.is_empty()
            && self.flags_cleared.is_empty()
    }
}

/// Removes the connection behind every declined or abandoned proof exchange whose metadata asks
/// for it, then clears the request so it is never repeated.
#[derive(Clone)]
pub struct ProofCleanupReconciler {
    agent: Arc<dyn WalletAgent>,
}

impl ProofCleanupReconciler {
    #[must_use]
    pub fn new(agent: Arc<dyn WalletAgent>) -> Self {
        Self { agent }
    }

    pub async fn reconcile(&self, records: &[ProofExchangeRecord]) -> CleanupReport {
        let mut report = CleanupReport::default();

        for record in records.iter().filter(|record| record.is_terminal_rejection()) {
            report.examined += 1;
            if !record.wants_connection_cleanup() {
                continue;
            }

            if let Some(connection_id) = record.connection_id.as_deref() {
                match self.agent.delete_connection(connection_id).await {
                    Ok(()) => {
                        info!(
                            "Deleted connection {} for {} proof {}",
                            connection_id,
                            record.state.as_str(),
                            record.id
                        );
                        report.deleted_connections.push(connection_id.to_string());
                    }
                    Err(err) => {
                        debug!(
                            "Ignoring failed connection cleanup {} for proof {}: {}",
                            connection_id, record.id, err
                        );
                        report.failed_deletions.push(connection_id.to_string());
                    }
                }
            }

            let mut patch = Map::new();
            patch.insert(DELETE_CONN_AFTER_SEEN_KEY.to_string(), Value::Bool(false));
            match self
                .agent
                .merge_proof_metadata(&record.id, PROOF_CUSTOM_METADATA_SLOT, patch)
                .await
            {
                Ok(()) => report.flags_cleared.push(record.id.clone()),
                Err(err) => warn!(
                    "Failed to clear connection cleanup flag on proof {}: {}",
                    record.id, err
                ),
            }
        }

        report
    }

    /// Reconciles the current record set, then again on every change, until the agent's proof
    /// stream closes.
    pub async fn run(self, mut proofs: watch::Receiver<Vec<ProofExchangeRecord>>) {
        loop {
            let snapshot = proofs.borrow_and_update().clone();
            let report = self.reconcile(&snapshot).await;
            if !report.is_noop() {
                debug!("Proof cleanup cycle: {:?}", report);
            }
            if proofs.changed().await.is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ProofCustomMetadata, ProofState};
    use crate::error::AgentError;
    use crate::in_memory::{AgentCall, AgentCallKind, InMemoryWalletAgent};

    fn flagged(id: &str, state: ProofState, flag: bool) -> ProofExchangeRecord {
        ProofExchangeRecord::new(id, state).with_custom_metadata(&ProofCustomMetadata {
            delete_conn_after_seen: flag,
            ..ProofCustomMetadata::default()
        })
    }

    fn current_records(agent: &InMemoryWalletAgent) -> Vec<ProofExchangeRecord> {
        agent.subscribe_proofs().borrow().clone()
    }

    #[tokio::test]
    async fn declined_proof_deletes_connection_once() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent.add_connection("c1").expect("add");
        agent.upsert_proof(flagged("p1", ProofState::Declined, true).with_connection("c1"));
        let reconciler = ProofCleanupReconciler::new(agent.clone());

        let first = reconciler.reconcile(&current_records(&agent)).await;
        assert_eq!(first.deleted_connections, vec!["c1".to_string()]);
        assert_eq!(first.flags_cleared, vec!["p1".to_string()]);
        assert!(
            !agent
                .proof("p1")
                .expect("record")
                .wants_connection_cleanup()
        );

        let second = reconciler.reconcile(&current_records(&agent)).await;
        assert!(second.is_noop());
        assert_eq!(
            agent
                .calls_of(AgentCallKind::DeleteConnection)
                .expect("calls"),
            vec![AgentCall::DeleteConnection("c1".to_string())]
        );
    }

    #[tokio::test]
    async fn unflagged_proof_is_never_touched() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent.add_connection("c1").expect("add");
        agent.upsert_proof(flagged("p1", ProofState::Declined, false).with_connection("c1"));
        let reconciler = ProofCleanupReconciler::new(agent.clone());

        for _ in 0..3 {
            let report = reconciler.reconcile(&current_records(&agent)).await;
            assert!(report.is_noop());
        }
        assert!(agent.calls().expect("calls").is_empty());
        assert_eq!(agent.connections().expect("connections"), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn failed_deletion_still_clears_flag() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent
            .fail_next(
                AgentCallKind::DeleteConnection,
                AgentError::Internal("wallet locked".to_string()),
            )
            .expect("inject");
        agent.upsert_proof(flagged("p1", ProofState::Abandoned, true).with_connection("gone"));
        let reconciler = ProofCleanupReconciler::new(agent.clone());

        let report = reconciler.reconcile(&current_records(&agent)).await;

        assert_eq!(report.failed_deletions, vec!["gone".to_string()]);
        assert_eq!(report.flags_cleared, vec!["p1".to_string()]);
        assert!(
            !agent
                .proof("p1")
                .expect("record")
                .wants_connection_cleanup()
        );
    }

    #[tokio::test]
    async fn missing_connection_id_only_clears_flag() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent.upsert_proof(flagged("p1", ProofState::Declined, true));
        let reconciler = ProofCleanupReconciler::new(agent.clone());

        let report = reconciler.reconcile(&current_records(&agent)).await;

        assert!(report.deleted_connections.is_empty());
        assert!(report.failed_deletions.is_empty());
        assert_eq!(report.flags_cleared, vec!["p1".to_string()]);
        assert!(
            agent
                .calls_of(AgentCallKind::DeleteConnection)
                .expect("calls")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn non_terminal_proofs_are_ignored() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent.add_connection("c1").expect("add");
        agent.upsert_proof(flagged("p1", ProofState::RequestReceived, true).with_connection("c1"));
        agent.upsert_proof(flagged("p2", ProofState::Done, true).with_connection("c1"));
        let reconciler = ProofCleanupReconciler::new(agent.clone());

        let report = reconciler.reconcile(&current_records(&agent)).await;

        assert_eq!(report.examined, 0);
        assert!(agent.calls().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn run_reacts_to_records_reaching_declined() {
        let agent = Arc::new(InMemoryWalletAgent::default());
        agent.add_connection("c1").expect("add");
        agent.upsert_proof(flagged("p1", ProofState::RequestReceived, true).with_connection("c1"));
        let task = tokio::spawn(
            ProofCleanupReconciler::new(agent.clone()).run(agent.subscribe_proofs()),
        );
        tokio::task::yield_now().await;
        assert!(agent.calls().expect("calls").is_empty());

        agent.upsert_proof(flagged("p1", ProofState::Declined, true).with_connection("c1"));
        for _ in 0..100 {
            if agent.connections().expect("connections").is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert!(agent.connections().expect("connections").is_empty());
        task.abort();
    }
}
