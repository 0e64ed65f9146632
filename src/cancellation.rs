use crate::error::Error;
use chrono::Duration;
use std::future::Future;
use tokio::sync::watch;

/// Create a linked cancel handle/token pair.
///
/// The handle side triggers cancellation; the token side is cheap to clone
/// and can be observed by any number of waiters.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Trigger side of a cancellation signal.
///
/// Cancelling an already-settled or already-cancelled operation is a no-op.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace records the flag even when every token is gone, so
        // is_cancelled stays truthful after the operation settles.
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Observer side of a cancellation signal.
#[derive(Clone, Debug)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolve once the linked handle fires. If the handle is dropped
    /// without firing, cancellation can no longer happen and this future
    /// stays pending.
    pub async fn cancelled(mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Run an operation raced against a timeout and a cancellation token.
///
/// The losing branches resolve to `Timeout`/`Cancelled`; dropping the
/// operation future at that point is what stops it consuming resources.
pub async fn run_with_deadline<T, F>(
    operation: F,
    timeout: Duration,
    token: CancelToken,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    let budget = timeout
        .to_std()
        .map_err(|_| Error::Configuration(format!(
            "request timeout must be positive, got {}ms",
            timeout.num_milliseconds()
        )))?;

    tokio::select! {
        outcome = operation => outcome,
        _ = tokio::time::sleep(budget) => Err(Error::Timeout(timeout.num_milliseconds())),
        _ = token.cancelled() => Err(Error::Cancelled),
    }
}
