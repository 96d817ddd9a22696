use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;

pub type Job = BoxFuture<'static, ()>;

/// Where a submitted job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Queued,
    Burst,
    CallerRan,
}

/// Bounded pool for audit work.
///
/// `core_workers` tasks drain a queue of `queue_capacity` jobs. When the
/// queue is full up to `max_workers - core_workers` extra tasks are spawned,
/// and past that the job runs on the submitting task. Jobs are never dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    burst: Arc<Semaphore>,
    burst_capacity: u32,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn the core workers on the current Tokio runtime.
    pub fn start(config: &PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let core = config.core_workers.max(1);
        let workers = (0..core)
            .map(|id| tokio::spawn(run(id, receiver.clone())))
            .collect::<Vec<_>>();

        let burst_capacity = config.max_workers.saturating_sub(core) as u32;

        tracing::info!(
            "Audit worker pool started ({core} workers, {burst_capacity} burst, queue {})",
            config.queue_capacity
        );

        Self {
            inner: Arc::new(PoolInner {
                sender: RwLock::new(Some(sender)),
                workers: Mutex::new(workers),
                burst: Arc::new(Semaphore::new(burst_capacity as usize)),
                burst_capacity,
                shutdown_timeout: config.shutdown_timeout,
            }),
        }
    }

    pub async fn submit(&self, job: Job) -> Placement {
        let sender = self
            .inner
            .sender
            .read()
            .ok()
            .and_then(|guard| guard.clone());

        let job = match sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => return Placement::Queued,
                Err(mpsc::error::TrySendError::Full(job)) => job,
                Err(mpsc::error::TrySendError::Closed(job)) => job,
            },
            None => job,
        };

        if let Ok(permit) = self.inner.burst.clone().try_acquire_owned() {
            tokio::spawn(async move {
                run_guarded(job).await;
                drop(permit);
            });
            return Placement::Burst;
        }

        tracing::warn!("Audit worker pool saturated, running job on the caller");
        run_guarded(job).await;
        Placement::CallerRan
    }

    /// Stop accepting queued work and wait for pending jobs to finish.
    /// Returns false if the drain timed out.
    pub async fn shutdown(&self) -> bool {
        if let Ok(mut sender) = self.inner.sender.write() {
            sender.take();
        }

        let workers = match self.inner.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };

        let burst = self.inner.burst.clone();
        let burst_capacity = self.inner.burst_capacity;
        let drain = async move {
            for handle in workers {
                let _ = handle.await;
            }
            if burst_capacity > 0 {
                let _ = burst.acquire_many(burst_capacity).await;
            }
        };

        match tokio::time::timeout(self.inner.shutdown_timeout, drain).await {
            Ok(()) => {
                tracing::info!("Audit worker pool stopped");
                true
            }
            Err(_) => {
                tracing::warn!(
                    "Audit worker pool did not drain within {:?}",
                    self.inner.shutdown_timeout
                );
                false
            }
        }
    }
}

async fn run(id: usize, receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>) {
    tracing::debug!("Audit worker {id} started");

    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };

        match job {
            Some(job) => run_guarded(job).await,
            None => break,
        }
    }

    tracing::debug!("Audit worker {id} stopped");
}

async fn run_guarded(job: Job) {
    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
        tracing::error!("Audit job panicked");
    }
}
