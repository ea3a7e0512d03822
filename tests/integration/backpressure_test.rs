// tests/integration/backpressure_test.rs

//! Caller-runs saturation: a full pool queue makes the submitting task run the work.

use gatecore::config::PoolConfig;
use gatecore::core::pool::{Submission, WorkerPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_full_queue_runs_task_on_caller_thread() {
    let pool = WorkerPool::new(
        "bp",
        &PoolConfig {
            size: 1,
            queue_capacity: 1,
        },
    )
    .unwrap();

    // Occupy the only worker.
    let (started_tx, started_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let first = pool
        .submit(Box::pin(async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
        }))
        .await
        .unwrap();
    assert_eq!(first, Submission::Queued);
    started_rx.await.unwrap();

    // Fill the queue.
    let queued_ran = Arc::new(AtomicBool::new(false));
    let flag = queued_ran.clone();
    let second = pool
        .submit(Box::pin(async move {
            flag.store(true, Ordering::SeqCst);
        }))
        .await
        .unwrap();
    assert_eq!(second, Submission::Queued);

    // The third submission cannot be queued and runs right here.
    let caller_thread = std::thread::current().id();
    let (thread_tx, thread_rx) = std::sync::mpsc::channel();
    let third = pool
        .submit(Box::pin(async move {
            let current = std::thread::current();
            let _ = thread_tx.send((current.id(), current.name().map(str::to_owned)));
        }))
        .await
        .unwrap();
    assert_eq!(third, Submission::RanOnCaller);

    let (ran_on, name) = thread_rx.try_recv().expect("ran before submit returned");
    assert_eq!(ran_on, caller_thread);
    assert!(!name.unwrap_or_default().starts_with("bp-pool"));
    assert!(!queued_ran.load(Ordering::SeqCst));

    release_tx.send(()).unwrap();
    let outcome = pool.shutdown(Duration::from_secs(5)).await;
    assert!(outcome.is_clean());
    assert!(queued_ran.load(Ordering::SeqCst));
}
