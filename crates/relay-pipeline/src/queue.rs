use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queued task panicked")]
    Panicked,

    #[error("queued task was dropped before it ran")]
    Dropped,
}

/// Runs tasks one at a time per key, in submission order.
///
/// Each key with pending work owns one worker task draining an unbounded
/// inbox. The worker removes its inbox from the map once it is empty, so idle
/// keys hold no memory. Tasks under different keys run concurrently.
#[derive(Clone, Default)]
pub struct SerialQueue {
    inboxes: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl SerialQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after every task previously submitted under `key`.
    ///
    /// The task's result (or panic) goes to this caller only; later tasks
    /// for the same key run regardless.
    pub async fn enqueue<F, T>(&self, key: &str, task: F) -> Result<T, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = AssertUnwindSafe(task).catch_unwind().await;
            let _ = tx.send(result);
        });
        self.submit(key, job);

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                error!(key, "queued task panicked");
                Err(QueueError::Panicked)
            }
            Err(_) => Err(QueueError::Dropped),
        }
    }

    /// Number of keys that currently have a live worker.
    pub fn active_keys(&self) -> usize {
        self.inboxes.len()
    }

    fn submit(&self, key: &str, job: Job) {
        // The entry guard holds the shard lock, which serializes this with a
        // worker's empty-check-and-remove for the same key.
        match self.inboxes.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if let Err(mpsc::error::SendError(job)) = entry.get().send(job) {
                    let tx = self.spawn_worker(key, job);
                    entry.insert(tx);
                }
            }
            Entry::Vacant(entry) => {
                let tx = self.spawn_worker(key, job);
                entry.insert(tx);
            }
        }
    }

    fn spawn_worker(&self, key: &str, first: Job) -> mpsc::UnboundedSender<Job> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(first);
        debug!(key, "starting queue worker");
        tokio::spawn(run_worker(key.to_string(), rx, Arc::clone(&self.inboxes)));
        tx
    }
}

async fn run_worker(
    key: String,
    mut rx: mpsc::UnboundedReceiver<Job>,
    inboxes: Arc<DashMap<String, mpsc::UnboundedSender<Job>>>,
) {
    loop {
        while let Ok(job) = rx.try_recv() {
            job.await;
        }
        if inboxes.remove_if(&key, |_, _| rx.is_empty()).is_some() {
            debug!(key = %key, "queue drained, worker exiting");
            break;
        }
        // A submission raced the drain check.
        match rx.recv().await {
            Some(job) => job.await,
            None => break,
        }
    }
}
