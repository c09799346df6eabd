//! Workflow run supervision.
//!
//! The supervisor owns the process-wide table of active runs. Every run
//! gets a fresh cancellation token that is deliberately *not* derived from
//! the inbound request: async webhooks and sync-with-early-output runs
//! outlive the request that started them. Cancellation is cooperative; the
//! engine observes the token at node boundaries and in-flight upstream
//! calls inherit it.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::domain::{ActiveRun, RunSource};

struct RunEntry {
    run: ActiveRun,
    token: CancellationToken,
}

/// Process-local table of cancellable runs.
#[derive(Clone, Default)]
pub struct RunSupervisor {
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
}

impl std::fmt::Debug for RunSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunSupervisor")
            .field("active", &self.runs.read().len())
            .finish()
    }
}

/// Removes the run entry and cancels its token when dropped, so a
/// completed or panicked run never lingers in the table.
pub struct RunGuard {
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
    run_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(entry) = self.runs.write().remove(&self.run_id) {
            entry.token.cancel();
        }
    }
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run. Returns its ID, the cancellation token the
    /// engine must watch, and the cleanup guard the spawned task owns.
    pub fn register(
        &self,
        workflow_id: &str,
        source: RunSource,
    ) -> (String, CancellationToken, RunGuard) {
        let run_id = format!("run_{}", ulid::Ulid::new());
        let token = CancellationToken::new();

        let run = ActiveRun {
            id: run_id.clone(),
            workflow_id: workflow_id.to_string(),
            source,
            started_at: Utc::now(),
        };

        self.runs.write().insert(
            run_id.clone(),
            RunEntry {
                run,
                token: token.clone(),
            },
        );

        let guard = RunGuard {
            runs: self.runs.clone(),
            run_id: run_id.clone(),
        };
        (run_id, token, guard)
    }

    /// Snapshot of all active runs, newest first.
    pub fn list(&self) -> Vec<ActiveRun> {
        let mut runs: Vec<ActiveRun> =
            self.runs.read().values().map(|e| e.run.clone()).collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Cancel a run. Returns false for unknown IDs; cancelling an already
    /// finished run is a no-op at the token level.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.runs.write().remove(run_id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!(run_id = %run_id, "run cancelled");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_list_cancel() {
        let supervisor = RunSupervisor::new();
        let (run_id, token, _guard) = supervisor.register("wf1", RunSource::Webhook);

        assert!(run_id.starts_with("run_"));
        assert_eq!(supervisor.list().len(), 1);
        assert!(!token.is_cancelled());

        assert!(supervisor.cancel(&run_id));
        assert!(token.is_cancelled());
        assert!(supervisor.list().is_empty());

        // Cancelling again is harmless but reports unknown.
        assert!(!supervisor.cancel(&run_id));
    }

    #[tokio::test]
    async fn guard_drop_cleans_up() {
        let supervisor = RunSupervisor::new();
        let token = {
            let (_run_id, token, _guard) = supervisor.register("wf1", RunSource::Api);
            assert_eq!(supervisor.list().len(), 1);
            token
        };
        assert!(supervisor.list().is_empty());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_is_observable() {
        let supervisor = RunSupervisor::new();
        let (run_id, token, _guard) = supervisor.register("wf1", RunSource::Cron);

        let waiter = tokio::spawn(async move {
            token.cancelled().await;
        });
        supervisor.cancel(&run_id);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("cancellation not observed")
            .unwrap();
    }
}
