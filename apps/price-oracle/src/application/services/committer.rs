//! Commit Queue
//!
//! Forwards aggregate changes to the [`PriceStore`] from a single background
//! task, in the order they were enqueued. Enqueueing never waits: when the
//! queue is full the commit is dropped and counted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PriceStore;
use crate::domain::aggregation::Aggregate;
use crate::domain::instrument::AccountKey;
use crate::infrastructure::metrics;

/// A pending commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Target instrument.
    pub account: AccountKey,
    /// Aggregate to record.
    pub aggregate: Aggregate,
}

/// Handle to the commit worker.
#[derive(Debug, Clone)]
pub struct CommitQueue {
    tx: mpsc::Sender<CommitRequest>,
}

impl CommitQueue {
    /// Spawn the commit worker on the current runtime.
    ///
    /// The worker stops when `cancel` fires or every handle is dropped.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn PriceStore>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run(store, rx, cancel));
        (Self { tx }, handle)
    }

    /// Queue an aggregate for commit.
    ///
    /// Returns `false` if the commit was dropped.
    pub fn enqueue(&self, account: &str, aggregate: Aggregate) -> bool {
        let request = CommitRequest {
            account: account.to_string(),
            aggregate,
        };

        match self.tx.try_send(request) {
            Ok(()) => true,
            Err(TrySendError::Full(request)) => {
                tracing::warn!(account = %request.account, "Commit queue full, dropping commit");
                metrics::record_commit_dropped();
                false
            }
            Err(TrySendError::Closed(request)) => {
                tracing::debug!(account = %request.account, "Commit worker stopped, dropping commit");
                false
            }
        }
    }

    /// Whether the worker is still accepting commits.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

async fn run(
    store: Arc<dyn PriceStore>,
    mut rx: mpsc::Receiver<CommitRequest>,
    cancel: CancellationToken,
) {
    tracing::info!("Commit worker started");

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            request = rx.recv() => {
                let Some(request) = request else { break };
                if let Err(e) = store.commit(&request.account, &request.aggregate).await {
                    tracing::warn!(account = %request.account, error = %e, "Commit failed");
                    metrics::record_commit_failed();
                }
            }
        }
    }

    rx.close();
    tracing::info!("Commit worker stopped");
}
