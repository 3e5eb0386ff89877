//! In-process work queue with in-flight accounting.
//!
//! A `WorkQueue` is an unbounded FIFO shared by one pool of workers. The
//! in-flight counter is incremented on push and decremented only when the
//! worker acknowledges completion, not on dequeue, since the work is async
//! long past the pop. Whenever the counter returns to zero the queue pings
//! the shared drain signal, so the orchestrator can wait on a notification
//! instead of polling on an interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};
use tracing::warn;

/// Unbounded FIFO plus in-flight counter, cloneable across workers.
#[derive(Debug)]
pub struct WorkQueue<T> {
    name: String,
    tx: mpsc::UnboundedSender<T>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
    in_flight: Arc<AtomicUsize>,
    drain: Arc<Notify>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
            in_flight: Arc::clone(&self.in_flight),
            drain: Arc::clone(&self.drain),
        }
    }
}

impl<T> WorkQueue<T> {
    /// Creates a queue wired to the given drain signal.
    pub fn new(name: impl Into<String>, drain: Arc<Notify>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            drain,
        }
    }

    /// Queue name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pushes one item. The item counts as unfinished until a worker calls
    /// [`WorkQueue::task_done`] for it.
    pub fn push(&self, item: T) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            // All receivers dropped; the run is already shutting down.
            warn!(queue = %self.name, "Push on a closed queue");
            self.task_done();
        }
    }

    /// Pops the next item, waiting while the queue is empty. Returns `None`
    /// only when every sender is gone.
    pub async fn pop(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }

    /// Acknowledges completion of one popped item.
    pub fn task_done(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "task_done without matching push");
        if previous == 1 {
            self.drain.notify_waiters();
        }
    }

    /// Number of items pushed but not yet acknowledged.
    pub fn unfinished(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}
