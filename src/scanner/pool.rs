//! Bounded worker pool between the walker and the processor.
//!
//! A fixed set of tokio tasks drains boxed async jobs from a bounded
//! channel. The walker submits from a blocking thread, so a full queue
//! blocks submission and publish latency backpressures the walk.

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{ScanError, ScanResult};

/// Default task queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

type Task = Pin<Box<dyn Future<Output = ScanResult<()>> + Send + 'static>>;

/// Handle for submitting work to the pool. Cloneable; one per producer.
#[derive(Clone)]
pub struct TaskSubmitter {
    sender: flume::Sender<Task>,
}

impl TaskSubmitter {
    /// Queue a job, blocking the calling thread while the queue is full.
    pub fn submit<F>(&self, task: F) -> ScanResult<()>
    where
        F: Future<Output = ScanResult<()>> + Send + 'static,
    {
        self.sender
            .send(Box::pin(task))
            .map_err(|_| ScanError::PoolClosed)
    }
}

/// Fixed-size pool of worker tasks over a bounded job queue.
pub struct WorkerPool {
    sender: flume::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Start `workers` tasks draining a queue of the given capacity.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded::<Task>(capacity);

        let workers = (0..workers)
            .map(|id| {
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    while let Ok(task) = receiver.recv_async().await {
                        match task.await {
                            Ok(()) => {}
                            // Cancellation is a normal exit, not a failure
                            Err(ScanError::Cancelled) => {
                                debug!("worker {id} observed cancellation");
                                return;
                            }
                            Err(e) => {
                                error!("worker {id} failed to process task: {e}");
                            }
                        }
                    }
                })
            })
            .collect();

        Self { sender, workers }
    }

    /// Get a submission handle for this pool.
    pub fn submitter(&self) -> TaskSubmitter {
        TaskSubmitter {
            sender: self.sender.clone(),
        }
    }

    /// Close the queue and wait for the workers to drain it.
    pub async fn close(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}
