// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thunk queue and worker pool.
//!
//! Ingest work items are deferred closures over an unbounded in-memory
//! queue, drained by a bounded set of cooperative workers. A failing item
//! is re-enqueued at the tail and the worker sleeps `100ms x error_count`;
//! the counter is shared across workers and resets on any success. Items
//! are only dropped on cancellation, never silently.

use futures::future::BoxFuture;
use skyvault_core::Result;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A deferred, re-runnable work item.
pub type Job = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Unbounded queue of thunks with a depth gauge for backpressure.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    depth: Arc<AtomicUsize>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue a thunk at the tail.
    pub fn enqueue(&self, job: Job) {
        self.depth.fetch_add(1, Ordering::Relaxed);
        // receiver lives as long as the queue, send cannot fail
        let _ = self.tx.send(job);
    }

    /// Convenience wrapper building the job from a closure.
    pub fn submit<F, Fut>(&self, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(Arc::new(move || -> BoxFuture<'static, Result<()>> {
            Box::pin(f())
        }));
    }

    /// Current number of queued items.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    async fn dequeue(&self) -> Option<Job> {
        let job = self.rx.lock().await.recv().await;
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        job
    }
}

/// Bounded worker set over one queue.
pub struct WorkerPool {
    error_count: Arc<AtomicU32>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks draining `queue` until cancellation.
    pub fn spawn(queue: WorkQueue, workers: usize, cancel: CancellationToken) -> Self {
        let error_count = Arc::new(AtomicU32::new(0));
        let handles = (0..workers)
            .map(|worker_id| {
                let queue = queue.clone();
                let cancel = cancel.clone();
                let error_count = error_count.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, queue, cancel, error_count).await;
                })
            })
            .collect();

        Self {
            error_count,
            handles,
        }
    }

    /// Consecutive-error counter shared by every worker.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Wait for all workers to exit (after cancellation).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: WorkQueue,
    cancel: CancellationToken,
    error_count: Arc<AtomicU32>,
) {
    debug!(worker_id, "ingest worker started");
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = queue.dequeue() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match job().await {
            Ok(()) => {
                error_count.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                let errors = error_count.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(worker_id, errors, error = %e, "work item failed, re-enqueueing");
                queue.enqueue(job);
                tokio::time::sleep(Duration::from_millis(100 * errors as u64)).await;
            }
        }
    }
    debug!(worker_id, "ingest worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyvault_core::SkyvaultError;

    #[tokio::test]
    async fn jobs_run_to_completion() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(queue.clone(), 4, cancel.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..50 {
            let counter = counter.clone();
            queue.submit(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                }
            });
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::Relaxed) < 50 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("all jobs should complete");

        assert_eq!(queue.depth(), 0);
        assert_eq!(pool.error_count(), 0);

        cancel.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn failing_job_is_retried_at_the_tail() {
        let queue = WorkQueue::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(queue.clone(), 1, cancel.clone());

        let attempts = Arc::new(AtomicUsize::new(0));
        {
            let attempts = attempts.clone();
            queue.submit(move || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(SkyvaultError::Transient("flaky".into()))
                    } else {
                        Ok(())
                    }
                }
            });
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while attempts.load(Ordering::Relaxed) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job should eventually succeed");

        // success resets the shared error counter
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.error_count(), 0);

        cancel.cancel();
        pool.join().await;
    }
}
