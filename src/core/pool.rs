// src/core/pool.rs

//! Bounded worker pools, one per traffic class.
//!
//! Each pool owns a dedicated multi-threaded runtime so handler code never runs on
//! the I/O threads. The queue is bounded; when it is full the submitting task runs
//! the work itself, which slows the reading connection down instead of dropping work.

use crate::config::{PoolConfig, PoolsConfig};
use crate::core::{GateError, metrics};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::{Mutex, RwLock};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use strum_macros::{Display, EnumIter};
use tokio::runtime::Runtime;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A unit of work submitted to a pool.
pub type Task = BoxFuture<'static, ()>;

/// Which pool a handler's work lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Default)]
#[strum(serialize_all = "lowercase")]
pub enum TrafficClass {
    /// Messages originated by players.
    #[default]
    Player,
    /// Administrative and infrastructure messages (heartbeats, GM tools).
    System,
}

/// How a submitted task was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The task waits in the queue for a worker.
    Queued,
    /// The queue was full; the task already ran to completion on the caller.
    RanOnCaller,
}

/// Result of draining a pool on shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    pub pool: String,
    /// Tasks that finished during the drain window.
    pub completed: usize,
    /// Tasks that were still queued or running when the timeout hit.
    pub abandoned: usize,
}

impl DrainOutcome {
    pub fn is_clean(&self) -> bool {
        self.abandoned == 0
    }
}

/// A named pool of workers with a bounded queue and caller-runs saturation.
pub struct WorkerPool {
    name: String,
    runtime: Mutex<Option<Runtime>>,
    sender: RwLock<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    accepting: AtomicBool,
    drained: OnceCell<DrainOutcome>,
}

impl WorkerPool {
    /// Starts `config.size` workers on a runtime whose threads are named `{name}-pool-N`.
    pub fn new(name: impl Into<String>, config: &PoolConfig) -> Result<Self, GateError> {
        let name = name.into();
        if config.size == 0 || config.queue_capacity == 0 {
            return Err(GateError::InvalidConfig(format!(
                "pool '{name}' needs a non-zero size and queue capacity"
            )));
        }

        let thread_counter = Arc::new(AtomicUsize::new(1));
        let thread_prefix = name.clone();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.size)
            .thread_name_fn(move || {
                let n = thread_counter.fetch_add(1, Ordering::Relaxed);
                format!("{thread_prefix}-pool-{n}")
            })
            .enable_all()
            .build()?;

        let (tx, rx) = mpsc::channel::<Task>(config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.size)
            .map(|index| {
                runtime.spawn(worker_loop(
                    name.clone(),
                    index,
                    rx.clone(),
                    pending.clone(),
                ))
            })
            .collect();

        info!(
            "Worker pool '{}' started with {} workers and a queue of {}.",
            name, config.size, config.queue_capacity
        );

        Ok(Self {
            name,
            runtime: Mutex::new(Some(runtime)),
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            pending,
            accepting: AtomicBool::new(true),
            drained: OnceCell::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tasks queued or running right now.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Submits a task.
    ///
    /// When the queue is full the task is awaited here, on the caller, before this
    /// returns `Submission::RanOnCaller`. After `stop_accepting` every submission fails
    /// with `GateError::PoolShutdown`.
    pub async fn submit(&self, task: Task) -> Result<Submission, GateError> {
        if !self.is_accepting() {
            return Err(GateError::PoolShutdown(self.name.clone()));
        }

        let rejected = {
            let guard = self.sender.read();
            let Some(tx) = guard.as_ref() else {
                return Err(GateError::PoolShutdown(self.name.clone()));
            };
            self.pending.fetch_add(1, Ordering::AcqRel);
            match tx.try_send(task) {
                Ok(()) => {
                    self.update_gauge();
                    return Ok(Submission::Queued);
                }
                Err(e) => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                    e
                }
            }
        };

        match rejected {
            mpsc::error::TrySendError::Full(task) => {
                debug!("Pool '{}' queue is full, running task on the caller.", self.name);
                metrics::POOL_CALLER_RUNS_TOTAL
                    .with_label_values(&[self.name.as_str()])
                    .inc();
                run_guarded(&self.name, task).await;
                Ok(Submission::RanOnCaller)
            }
            mpsc::error::TrySendError::Closed(_) => Err(GateError::PoolShutdown(self.name.clone())),
        }
    }

    /// Rejects all further submissions. Already queued tasks still run.
    pub fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            debug!("Pool '{}' stopped accepting tasks.", self.name);
        }
        // Dropping the sender lets workers exit once the queue is empty.
        self.sender.write().take();
    }

    /// Stops accepting and waits up to `timeout` for queued and running tasks. Whatever
    /// is left afterwards is cancelled and reported as abandoned.
    ///
    /// Calling this again returns the outcome of the first drain.
    pub async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        self.drained
            .get_or_init(|| self.drain(timeout))
            .await
            .clone()
    }

    async fn drain(&self, timeout: Duration) -> DrainOutcome {
        self.stop_accepting();
        let pending_at_start = self.pending();
        let workers = std::mem::take(&mut *self.workers.lock());
        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();

        let abandoned = match tokio::time::timeout(timeout, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result
                        && e.is_panic()
                    {
                        error!("A worker of pool '{}' panicked: {e:?}", self.name);
                    }
                }
                0
            }
            Err(_) => {
                let abandoned = self.pending();
                for handle in &abort_handles {
                    handle.abort();
                }
                metrics::POOL_ABANDONED_TASKS_TOTAL
                    .with_label_values(&[self.name.as_str()])
                    .inc_by(abandoned as f64);
                warn!(
                    "{}",
                    GateError::ShutdownDrainTimeout {
                        pool: self.name.clone(),
                        abandoned
                    }
                );
                abandoned
            }
        };

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        self.pending.store(0, Ordering::Release);
        self.update_gauge();

        let outcome = DrainOutcome {
            pool: self.name.clone(),
            completed: pending_at_start.saturating_sub(abandoned),
            abandoned,
        };
        info!(
            "Pool '{}' drained: {} completed, {} abandoned.",
            self.name, outcome.completed, outcome.abandoned
        );
        outcome
    }

    fn update_gauge(&self) {
        metrics::POOL_PENDING_TASKS
            .with_label_values(&[self.name.as_str()])
            .set(self.pending() as f64);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // `shutdown_background` is the only way to drop a runtime from async context.
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

async fn worker_loop(
    pool: String,
    index: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    pending: Arc<AtomicUsize>,
) {
    debug!("Worker {} of pool '{}' started.", index, pool);
    loop {
        let next = { queue.lock().await.recv().await };
        let Some(task) = next else {
            break;
        };
        run_guarded(&pool, task).await;
        pending.fetch_sub(1, Ordering::AcqRel);
        metrics::POOL_PENDING_TASKS
            .with_label_values(&[pool.as_str()])
            .set(pending.load(Ordering::Acquire) as f64);
    }
    debug!("Worker {} of pool '{}' exited.", index, pool);
}

/// Runs a task, containing any panic that escapes it.
async fn run_guarded(pool: &str, task: Task) {
    if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
        error!(
            "Task on pool '{}' panicked: {}",
            pool,
            panic_message(panic.as_ref())
        );
    }
}

/// Extracts the message of a caught panic payload.
pub fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The pools of every traffic class.
pub struct WorkerPools {
    pub player: Arc<WorkerPool>,
    pub system: Arc<WorkerPool>,
}

impl WorkerPools {
    pub fn new(config: &PoolsConfig) -> Result<Self, GateError> {
        Ok(Self {
            player: Arc::new(WorkerPool::new(TrafficClass::Player.to_string(), &config.player)?),
            system: Arc::new(WorkerPool::new(TrafficClass::System.to_string(), &config.system)?),
        })
    }

    pub fn get(&self, class: TrafficClass) -> &Arc<WorkerPool> {
        match class {
            TrafficClass::Player => &self.player,
            TrafficClass::System => &self.system,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<WorkerPool>> {
        [&self.player, &self.system].into_iter()
    }
}
