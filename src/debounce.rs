use crate::deduplication::SharedOutcome;
use crate::error::Error;
use crate::fingerprint::Fingerprint;
use chrono::Duration;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::broadcast;

// Sync as well as Send: entries live in the shared map and the timer task
// reaches them from another thread.
type DebounceAction = Box<dyn FnOnce() -> BoxFuture<'static, SharedOutcome> + Send + Sync>;

/// Timer state for one key. Every call bumps the generation and replaces
/// the action, so only the most recent timer fires and it always runs the
/// most recent call's action.
struct DebounceEntry {
    generation: u64,
    action: Option<DebounceAction>,
    tx: broadcast::Sender<SharedOutcome>,
}

/// Trailing-edge debounce scheduler.
///
/// `schedule` restarts the quiet window on every call with the same key.
/// Exactly one action executes per window, and every caller (including
/// superseded ones) resolves with that single execution's outcome.
pub struct DebounceScheduler {
    entries: Arc<DashMap<Fingerprint, DebounceEntry>>,
    default_delay: Duration,
}

impl DebounceScheduler {
    pub fn new(default_delay: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_delay,
        }
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    /// Schedule `action` to run after `delay` of silence on `key`.
    pub async fn schedule<F, Fut>(
        &self,
        key: Fingerprint,
        delay: Duration,
        action: F,
    ) -> SharedOutcome
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SharedOutcome> + Send + 'static,
    {
        let boxed: DebounceAction = Box::new(move || Box::pin(action()));

        let (generation, mut rx) = {
            let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
                let (tx, _) = broadcast::channel(32);
                DebounceEntry {
                    generation: 0,
                    action: None,
                    tx,
                }
            });
            entry.generation += 1;
            entry.action = Some(boxed);
            (entry.generation, entry.tx.subscribe())
        };

        log::debug!(
            "Debounce timer (re)started for key: {} generation {}",
            key,
            generation
        );

        let entries = Arc::clone(&self.entries);
        let wait = delay.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;

            // Only the timer holding the current generation may fire; a
            // superseded timer finds a newer generation and exits.
            let fired = entries.remove_if(&key, |_, entry| entry.generation == generation);
            if let Some((_, mut entry)) = fired {
                if let Some(action) = entry.action.take() {
                    log::debug!("Debounce window elapsed for key: {}, executing", key);
                    let outcome = action().await;
                    let _ = entry.tx.send(outcome);
                }
            }
        });

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Schedule with the configured default delay.
    pub async fn schedule_default<F, Fut>(&self, key: Fingerprint, action: F) -> SharedOutcome
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SharedOutcome> + Send + 'static,
    {
        self.schedule(key, self.default_delay, action).await
    }

    /// Drop every pending timer and deliver `Cancelled` to its callers.
    pub fn cancel_all(&self) {
        let keys: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                let _ = entry.tx.send(Err(Error::Cancelled));
            }
        }
    }

    pub fn debouncing_count(&self) -> usize {
        self.entries.len()
    }
}
