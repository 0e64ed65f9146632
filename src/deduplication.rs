use crate::cache::SharedResponseCache;
use crate::cancellation::{cancel_pair, run_with_deadline, CancelHandle, CancelToken};
use crate::error::Error;
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Shared terminal outcome of an in-flight operation.
pub type SharedOutcome = Result<Arc<Value>, Error>;

/// A registered in-flight operation.
struct InFlightEntry {
    started_at: DateTime<Utc>,
    tx: broadcast::Sender<SharedOutcome>,
    cancel: CancelHandle,
}

/// In-flight deduplication tracker.
///
/// At most one underlying network operation per fingerprint is ever in
/// flight; every concurrent caller for that fingerprint observes the
/// identical outcome. Entries are removed whenever the operation settles,
/// whether by success, failure or cancellation, so a retry is always
/// possible immediately after.
pub struct InFlightTracker {
    in_flight: DashMap<Fingerprint, InFlightEntry>,
    cache: SharedResponseCache,
    timeout: Duration,
}

enum Role {
    Executor(CancelToken),
    Waiter(broadcast::Receiver<SharedOutcome>),
}

impl InFlightTracker {
    pub fn new(cache: SharedResponseCache, timeout: Duration) -> Self {
        Self {
            in_flight: DashMap::new(),
            cache,
            timeout,
        }
    }

    /// Execute an operation with deduplication.
    ///
    /// If the key already has a live entry the caller waits on its shared
    /// outcome; otherwise `factory` is invoked under the configured timeout
    /// and this entry's cancellation token. On success the value is written
    /// through to the response cache.
    pub async fn execute<F, Fut>(&self, key: Fingerprint, factory: F) -> SharedOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, Error>>,
    {
        self.cleanup_stale();

        let role = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                log::debug!("Request already pending for key: {}", key);
                Role::Waiter(entry.get().tx.subscribe())
            }
            Entry::Vacant(vacant) => {
                let (tx, _) = broadcast::channel(32);
                let (handle, token) = cancel_pair();
                vacant.insert(InFlightEntry {
                    started_at: Utc::now(),
                    tx,
                    cancel: handle,
                });
                Role::Executor(token)
            }
        };

        match role {
            Role::Waiter(mut rx) => match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::warn!("In-flight entry dropped for key: {}", key);
                    Err(Error::ChannelClosed)
                }
            },
            Role::Executor(token) => {
                log::debug!("Executing new request for key: {}", key);
                let outcome: SharedOutcome =
                    run_with_deadline(factory(), self.timeout, token)
                        .await
                        .map(Arc::new);

                if let Ok(value) = &outcome {
                    self.cache.put(key.clone(), Arc::clone(value));
                }

                // Remove unconditionally before broadcasting so a retry can
                // start the moment waiters observe the outcome.
                if let Some((_, entry)) = self.in_flight.remove(&key) {
                    let waiters = entry.tx.receiver_count();
                    if waiters > 0 {
                        log::debug!("Notifying {} waiters for key: {}", waiters, key);
                    }
                    let _ = entry.tx.send(outcome.clone());
                }

                outcome
            }
        }
    }

    /// Cancel the in-flight operation for a key, if any. Idempotent; a
    /// no-op for settled or unknown keys.
    pub fn cancel(&self, key: &Fingerprint) -> bool {
        if let Some(entry) = self.in_flight.get(key) {
            entry.cancel.cancel();
            log::debug!("Cancelled in-flight request for key: {}", key);
            true
        } else {
            false
        }
    }

    /// Cancel every in-flight operation.
    pub fn cancel_all(&self) {
        let mut cancelled = 0usize;
        for entry in self.in_flight.iter() {
            entry.value().cancel.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            log::info!("Cancelled {} in-flight requests", cancelled);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> InFlightStats {
        let pending_requests = self.in_flight.len();
        let total_waiters = self
            .in_flight
            .iter()
            .map(|entry| entry.value().tx.receiver_count())
            .sum();

        InFlightStats {
            pending_requests,
            total_waiters,
        }
    }

    /// Drop entries whose executor vanished without settling (e.g. the
    /// owning task was aborted). Waiters see the channel close and receive
    /// `ChannelClosed` instead of hanging.
    fn cleanup_stale(&self) {
        let grace = self.timeout + Duration::seconds(5);
        let now = Utc::now();
        let stale_keys: Vec<_> = self
            .in_flight
            .iter()
            .filter(|entry| now - entry.value().started_at > grace)
            .map(|entry| entry.key().clone())
            .collect();

        for key in stale_keys {
            if let Some((_, entry)) = self.in_flight.remove(&key) {
                log::warn!(
                    "Cleaning up stale in-flight entry for key: {} with {} waiters",
                    key,
                    entry.tx.receiver_count()
                );
            }
        }
    }
}

/// Statistics for the in-flight tracker.
#[derive(Debug)]
pub struct InFlightStats {
    pub pending_requests: usize,
    pub total_waiters: usize,
}

/// Thread-safe wrapper for the tracker.
pub type SharedInFlightTracker = Arc<InFlightTracker>;
