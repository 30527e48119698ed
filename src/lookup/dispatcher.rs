//! Concurrent enrichment of search matches.
//!
//! A fixed pool of workers drains a shared queue of identities, issuing one
//! detail call each. The supervisor races three signals:
//!
//! - every worker finished (the results channel closes),
//! - the first worker error,
//! - cancellation of the caller's token.
//!
//! Any exit other than the first cancels the pool's child token, so in-flight
//! and idle workers stop issuing upstream calls. The child token is cancelled
//! through a drop guard, which also covers the supervisor future being dropped.
//!
//! Workers consult the shared [`RateLimitTracker`] before every detail call. A
//! window recorded mid-dispatch, by this request or any other, is reported as
//! a rate-limit error instead of spending more upstream quota.

use crate::lookup::models::{Identity, UserRecord};
use crate::lookup::rate_limit::RateLimitTracker;
use crate::lookup::upstream::{UpstreamError, UserDetails};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, trace, warn};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("detail fetch cancelled")]
    Cancelled,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// Bounded worker pool resolving identities to full records.
pub struct DetailFetchDispatcher {
    details: Arc<dyn UserDetails>,
    tracker: Arc<RateLimitTracker>,
    workers: usize,
}

impl DetailFetchDispatcher {
    pub fn new(
        details: Arc<dyn UserDetails>,
        tracker: Arc<RateLimitTracker>,
        workers: usize,
    ) -> Self {
        Self {
            details,
            tracker,
            workers: workers.max(1),
        }
    }

    /// Fetch a record for every identity.
    ///
    /// Returns all records (in completion order) or the first error. A
    /// cancelled `cancel` token yields [`DispatchError::Cancelled`], never a
    /// partial result.
    pub async fn dispatch(
        &self,
        identities: Vec<Identity>,
        cancel: &CancellationToken,
    ) -> Result<Vec<UserRecord>, DispatchError> {
        if identities.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let total = identities.len();
        let pool_size = self.workers.min(total);

        let scope = cancel.child_token();
        let _cancel_on_exit = scope.clone().drop_guard();

        let (queue_tx, queue_rx) = mpsc::channel(total);
        for identity in identities {
            // Capacity equals the input size, so this never waits.
            if queue_tx.try_send(identity).is_err() {
                return Err(DispatchError::Cancelled);
            }
        }
        drop(queue_tx);
        let queue = Arc::new(Mutex::new(queue_rx));

        let (result_tx, mut result_rx) = mpsc::channel(total);
        let (error_tx, mut error_rx) = mpsc::channel(1);

        let mut workers = JoinSet::new();
        for worker_id in 0..pool_size {
            let worker = DetailWorker {
                id: worker_id,
                details: self.details.clone(),
                tracker: self.tracker.clone(),
                queue: queue.clone(),
                results: result_tx.clone(),
                errors: error_tx.clone(),
                cancel: scope.clone(),
            };
            workers.spawn(
                worker
                    .run()
                    .instrument(tracing::debug_span!("detail_worker", worker_id)),
            );
        }
        // Only workers hold senders now; the channels close when the pool drains.
        drop(result_tx);
        drop(error_tx);

        debug!(identities = total, workers = pool_size, "Dispatching detail fetches");

        let mut records = Vec::with_capacity(total);
        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Detail dispatch cancelled by caller");
                    break Err(DispatchError::Cancelled);
                }
                Some(err) = error_rx.recv() => {
                    warn!(error = %err, "Detail fetch failed, cancelling remaining workers");
                    break Err(DispatchError::Upstream(err));
                }
                received = result_rx.recv() => match received {
                    Some(record) => records.push(record),
                    None => break Ok(()),
                },
            }
        };

        scope.cancel();
        workers.shutdown().await;

        match outcome {
            // An error sent just before the last worker exited still wins.
            Ok(()) => match error_rx.try_recv() {
                Ok(err) => Err(DispatchError::Upstream(err)),
                Err(_) => {
                    debug!(records = records.len(), "Detail dispatch complete");
                    Ok(records)
                }
            },
            Err(e) => Err(e),
        }
    }
}

struct DetailWorker {
    id: usize,
    details: Arc<dyn UserDetails>,
    tracker: Arc<RateLimitTracker>,
    queue: Arc<Mutex<mpsc::Receiver<Identity>>>,
    results: mpsc::Sender<UserRecord>,
    errors: mpsc::Sender<UpstreamError>,
    cancel: CancellationToken,
}

impl DetailWorker {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = async { self.queue.lock().await.recv().await } => next,
            };
            let Some(identity) = next else {
                trace!(worker_id = self.id, "Queue drained, worker exiting");
                break;
            };

            if let Some(reset_at) = self.tracker.active_until() {
                debug!(worker_id = self.id, %reset_at, "Rate limit window active, skipping detail fetch");
                let _ = self.errors.try_send(UpstreamError::RateLimited { reset_at });
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = self.details.get_user(&identity) => fetched,
            };

            match fetched {
                Ok(record) => {
                    if self.results.send(record).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    debug!(worker_id = self.id, login = %identity, error = %err, "Detail fetch failed");
                    // Capacity one: the first error wins, later ones are dropped.
                    let _ = self.errors.try_send(err);
                    break;
                }
            }
        }
    }
}
