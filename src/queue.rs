use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// A deferred unit of prefetch work.
pub type QueueTask = BoxFuture<'static, ()>;

/// Bounded-concurrency FIFO work queue.
///
/// At most `max_concurrent` tasks execute at once; the remainder waits in
/// a FIFO backlog. The dispatcher acquires a permit before taking the next
/// task off the backlog, so start order matches submission order.
/// Completion order is not guaranteed.
pub struct PrefetchQueue {
    tx: mpsc::UnboundedSender<QueueTask>,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    semaphore: Arc<Semaphore>,
}

impl PrefetchQueue {
    /// Start the queue dispatcher. Outside a tokio runtime no dispatcher is
    /// spawned and `enqueue` reports failure.
    pub fn start(max_concurrent: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<QueueTask>();
        let running = Arc::new(AtomicUsize::new(0));
        let queued = Arc::new(AtomicUsize::new(0));
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));

        if tokio::runtime::Handle::try_current().is_ok() {
            Self::spawn_dispatcher(rx, running.clone(), queued.clone(), semaphore.clone());
        }

        Self {
            tx,
            running,
            queued,
            semaphore,
        }
    }

    fn spawn_dispatcher(
        mut rx: mpsc::UnboundedReceiver<QueueTask>,
        running: Arc<AtomicUsize>,
        queued: Arc<AtomicUsize>,
        semaphore: Arc<Semaphore>,
    ) {
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                // Acquire the permit before dispatching so the backlog
                // drains strictly in submission order.
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        // Shut down mid-dispatch: drop this task and the
                        // rest of the backlog, keeping the count honest.
                        let mut dropped = 1;
                        while rx.try_recv().is_ok() {
                            dropped += 1;
                        }
                        queued.fetch_sub(dropped, Ordering::SeqCst);
                        break;
                    }
                };

                queued.fetch_sub(1, Ordering::SeqCst);
                running.fetch_add(1, Ordering::SeqCst);

                let running = running.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    task.await;
                    running.fetch_sub(1, Ordering::SeqCst);
                });
            }
            log::debug!("Prefetch queue dispatcher stopped");
        });
    }

    /// Submit a task. Returns `false` if the queue has been shut down.
    pub fn enqueue(&self, task: QueueTask) -> bool {
        if self.semaphore.is_closed() {
            log::debug!("Prefetch queue rejected task after shutdown");
            return false;
        }
        self.queued.fetch_add(1, Ordering::SeqCst);
        let accepted = self.tx.send(task).is_ok();
        if !accepted {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            log::debug!("Prefetch queue rejected task after shutdown");
        }
        accepted
    }

    /// Number of tasks currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of tasks waiting in the backlog.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Stop the dispatcher. In-flight tasks finish; the backlog is dropped.
    pub fn shutdown(&self) {
        self.semaphore.close();
    }
}
