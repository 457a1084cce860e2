//! Resolution task queue
//!
//! Submissions are fire-and-forget: the caller gets a [`TaskHandle`] and may
//! wait on it with a deadline. Giving up on a handle never cancels the task;
//! the worker still persists and caches whatever it resolves.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use flight_common::FlightQuery;
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::resolver::{FlightResolver, ResolutionOutcome};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("task queue is full")]
    QueueFull,
    #[error("task queue unavailable: {0}")]
    Unavailable(String),
}

/// What waiting on a task produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed(ResolutionOutcome),
    /// The deadline passed; the task keeps running
    TimedOut,
    /// The task could not be submitted or was lost before replying
    DispatchFailed(String),
}

/// Receipt for a submitted task
pub struct TaskHandle {
    id: Uuid,
    result: oneshot::Receiver<ResolutionOutcome>,
}

impl TaskHandle {
    pub fn new(id: Uuid, result: oneshot::Receiver<ResolutionOutcome>) -> Self {
        Self { id, result }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait up to `timeout` for the result.
    pub async fn wait(self, timeout: Duration) -> TaskOutcome {
        match tokio::time::timeout(timeout, self.result).await {
            Ok(Ok(outcome)) => TaskOutcome::Completed(outcome),
            Ok(Err(_)) => TaskOutcome::DispatchFailed(format!(
                "task {} was dropped before it completed",
                self.id
            )),
            Err(_) => TaskOutcome::TimedOut,
        }
    }
}

/// Where resolution tasks are sent to run off the request path.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, query: FlightQuery) -> Result<TaskHandle, DispatchError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Submit `query` and wait for its result for at most `timeout`.
pub async fn dispatch_and_wait(
    queue: &dyn TaskQueue,
    query: FlightQuery,
    timeout: Duration,
) -> TaskOutcome {
    match queue.submit(query) {
        Ok(handle) => {
            debug!("Submitted task {} to {} queue", handle.id(), queue.backend_name());
            handle.wait(timeout).await
        }
        Err(e) => TaskOutcome::DispatchFailed(e.to_string()),
    }
}

struct Job {
    id: Uuid,
    query: FlightQuery,
    reply: oneshot::Sender<ResolutionOutcome>,
}

/// Fixed pool of tokio workers running [`FlightResolver`] jobs
pub struct ResolverWorkerPool {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ResolverWorkerPool {
    /// Spawn `workers` workers sharing a queue of `capacity` pending jobs.
    pub fn start(resolver: Arc<FlightResolver>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                let resolver = resolver.clone();
                let receiver = receiver.clone();
                tokio::spawn(async move {
                    Self::worker_loop(worker_id, resolver, receiver).await;
                })
            })
            .collect();

        info!("Started resolver worker pool ({} workers, capacity {})", workers, capacity.max(1));

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(handles),
        }
    }

    async fn worker_loop(
        worker_id: usize,
        resolver: Arc<FlightResolver>,
        receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    ) {
        loop {
            let job = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };

            let Some(job) = job else {
                debug!("Resolver worker {} stopping, queue closed", worker_id);
                break;
            };

            debug!(
                "Worker {} running task {} for {}{} on {}",
                worker_id,
                job.id,
                job.query.airline_code,
                job.query.flight_number,
                job.query.departure_date
            );

            let outcome = AssertUnwindSafe(resolver.resolve_query(&job.query))
                .catch_unwind()
                .await;

            match outcome {
                Ok(outcome) => {
                    if job.reply.send(outcome).is_err() {
                        debug!(
                            "Caller stopped waiting for task {}, result was still stored",
                            job.id
                        );
                    }
                }
                // dropping the reply sender tells the caller the task was lost
                Err(_) => error!("Task {} panicked in worker {}", job.id, worker_id),
            }
        }
    }

    /// Stop accepting tasks, let workers drain the queue and wait for them.
    pub async fn shutdown(&self) {
        let sender = match self.sender.write() {
            Ok(mut sender) => sender.take(),
            Err(e) => {
                warn!("Worker pool sender lock poisoned: {}", e);
                None
            }
        };
        drop(sender);

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(e) => {
                warn!("Worker pool handle lock poisoned: {}", e);
                Vec::new()
            }
        };

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Resolver worker ended abnormally: {}", e);
            }
        }
        info!("Resolver worker pool stopped");
    }
}

impl TaskQueue for ResolverWorkerPool {
    fn submit(&self, query: FlightQuery) -> Result<TaskHandle, DispatchError> {
        let sender = self
            .sender
            .read()
            .map_err(|e| DispatchError::Unavailable(format!("sender lock poisoned: {}", e)))?;
        let Some(sender) = sender.as_ref() else {
            return Err(DispatchError::Unavailable("worker pool is shut down".to_string()));
        };

        let id = Uuid::new_v4();
        let (reply, result) = oneshot::channel();

        sender
            .try_send(Job { id, query, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => {
                    DispatchError::Unavailable("all workers have stopped".to_string())
                }
            })?;

        Ok(TaskHandle::new(id, result))
    }

    fn backend_name(&self) -> &'static str {
        "worker-pool"
    }
}

/// Queue that refuses everything, so every lookup resolves in-process
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueue;

impl TaskQueue for DisabledQueue {
    fn submit(&self, _query: FlightQuery) -> Result<TaskHandle, DispatchError> {
        Err(DispatchError::Unavailable("task queue disabled".to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}
