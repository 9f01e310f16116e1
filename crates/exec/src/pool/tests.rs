use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::*;
use crate::fault::Fault;
use crate::interrupt;

const WAIT: Duration = Duration::from_secs(5);

fn pool(name: &str, workers: usize) -> FixedPool {
    FixedPool::new(PoolConfig::named(name, workers)).unwrap()
}

fn priority_pool(name: &str) -> FixedPool {
    let mut config = PoolConfig::named(name, 1);
    config.ordering = QueueOrdering::Priority;
    FixedPool::new(config).unwrap()
}

/// Occupy the pool's only worker until the returned sender is used.
fn block_worker(pool: &FixedPool) -> (mpsc::Sender<()>, JobHandle) {
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let handle = pool
        .submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        })
        .unwrap();
    started_rx.recv_timeout(WAIT).unwrap();
    (release_tx, handle)
}

#[test]
fn runs_every_submitted_job() {
    let pool = pool("runs", 4);
    let count = Arc::new(AtomicUsize::new(0));
    let handles: Vec<JobHandle> = (0..100)
        .map(|_| {
            let count = Arc::clone(&count);
            pool.submit(move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        })
        .collect();

    for h in &handles {
        assert_eq!(h.wait_timeout(WAIT), Some(JobOutcome::Completed));
    }
    assert_eq!(count.load(Ordering::SeqCst), 100);
    assert_eq!(pool.completed_count(), 100);
    assert_eq!(pool.worker_count(), 4);
}

#[test]
fn priority_pool_runs_lowest_value_first() {
    let pool = priority_pool("prio");
    let (release, _) = block_worker(&pool);

    let order = Arc::new(Mutex::new(Vec::new()));
    let handles: Vec<JobHandle> = [5, 1, 3, 1]
        .into_iter()
        .enumerate()
        .map(|(i, p)| {
            let order = Arc::clone(&order);
            pool.submit_prioritized(p, move || order.lock().push((p, i))).unwrap()
        })
        .collect();

    release.send(()).unwrap();
    for h in &handles {
        h.wait_timeout(WAIT).unwrap();
    }
    // Equal priorities keep submission order.
    assert_eq!(*order.lock(), vec![(1, 1), (1, 3), (3, 2), (5, 0)]);
}

#[test]
fn cancelled_job_never_runs() {
    let pool = pool("cancel", 1);
    let (release, _) = block_worker(&pool);

    let ran = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&ran);
    let handle = pool
        .submit(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    assert!(handle.cancel());
    assert!(!handle.cancel(), "second cancel is a no-op");
    assert!(handle.is_cancelled());
    // Plain handles leave the dead entry queued; the worker skips it.
    assert_eq!(pool.queued_count(), 1);

    release.send(()).unwrap();
    pool.join();
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn cancelling_prioritized_job_removes_it_from_queue() {
    let pool = priority_pool("prio-cancel");
    let (release, _) = block_worker(&pool);

    let handles: Vec<JobHandle> = (0..10)
        .map(|i| pool.submit_prioritized(i, || {}).unwrap())
        .collect();
    assert_eq!(pool.queued_count(), 10);

    for h in handles.iter().step_by(2) {
        assert!(h.cancel());
    }
    assert_eq!(pool.queued_count(), 5);

    release.send(()).unwrap();
    for h in handles.iter().skip(1).step_by(2) {
        assert_eq!(h.wait_timeout(WAIT), Some(JobOutcome::Completed));
    }
}

#[test]
fn cancel_after_start_fails() {
    let pool = pool("started", 1);
    let (release, handle) = block_worker(&pool);
    assert!(!handle.cancel());
    release.send(()).unwrap();
    assert_eq!(handle.wait_timeout(WAIT), Some(JobOutcome::Completed));
}

#[test]
fn graceful_shutdown_drains_queue() {
    let pool = pool("drain", 1);
    let (release, _) = block_worker(&pool);

    let count = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
        let count = Arc::clone(&count);
        pool.submit(move || {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();
    assert!(pool.is_shutdown());
    assert!(!pool.is_terminated());

    release.send(()).unwrap();
    assert!(pool.await_termination(WAIT));
    assert!(pool.is_terminated());
    assert_eq!(count.load(Ordering::SeqCst), 5);
}

#[test]
fn submission_after_shutdown_is_rejected() {
    let pool = pool("reject", 1);
    pool.shutdown();
    let err = pool.submit(|| {}).unwrap_err();
    assert!(err.is_rejection());
    assert!(matches!(
        Executor::execute(&pool, Box::new(|| {})),
        Err(ExecError::Rejected { .. })
    ));
}

#[test]
fn suppressed_rejection_returns_cancelled_handle() {
    let mut config = PoolConfig::named("suppress", 1);
    config.suppress_rejections = true;
    let pool = FixedPool::new(config).unwrap();
    pool.shutdown();

    let handle = pool.submit(|| panic!("must not run")).unwrap();
    assert!(handle.is_cancelled());
}

#[test]
fn shutdown_now_returns_pending_and_interrupts_running() {
    let pool = pool("now", 1);

    let (started_tx, started_rx) = mpsc::channel();
    let sleeper = pool
        .submit(move || {
            started_tx.send(()).unwrap();
            let woke_early = interrupt::sleep(Duration::from_secs(30)).is_err();
            assert!(woke_early);
        })
        .unwrap();
    started_rx.recv_timeout(WAIT).unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let queued: Vec<JobHandle> = (0..3)
        .map(|i| {
            let ran = Arc::clone(&ran);
            pool.submit_prioritized(i, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        })
        .collect();

    let start = Instant::now();
    let pending = pool.shutdown_now();
    assert_eq!(pending.len(), 3);

    assert_eq!(sleeper.wait_timeout(WAIT), Some(JobOutcome::Completed));
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(pool.await_termination(WAIT));

    // Returned jobs are still runnable by the caller.
    let mut pending = pending.into_iter();
    pending.next().unwrap().run();
    drop(pending);
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(queued[0].outcome(), Some(JobOutcome::Completed));
    assert_eq!(queued[1].outcome(), Some(JobOutcome::Cancelled));
    assert_eq!(queued[2].outcome(), Some(JobOutcome::Cancelled));
}

#[test]
fn panicking_job_is_reported_and_worker_survives() {
    let faults = Arc::new(Mutex::new(Vec::<Fault>::new()));
    let sink = Arc::clone(&faults);
    let pool = FixedPool::builder(PoolConfig::named("faulty", 1))
        .fault_handler(Arc::new(move |f: &Fault| sink.lock().push(f.clone())))
        .build()
        .unwrap();

    let bad = pool.submit(|| panic!("job exploded")).unwrap();
    assert_eq!(bad.wait_timeout(WAIT), Some(JobOutcome::Panicked));

    let good = pool.submit(|| {}).unwrap();
    assert_eq!(good.wait_timeout(WAIT), Some(JobOutcome::Completed));

    let faults = faults.lock();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].source, "faulty");
    assert_eq!(faults[0].message, "job exploded");
}

#[test]
fn stale_interrupt_does_not_leak_into_next_job() {
    let pool = pool("stale", 1);
    let first = pool
        .submit(|| crate::interrupt::Interrupter::current().interrupt())
        .unwrap();
    first.wait_timeout(WAIT).unwrap();

    let (tx, rx) = mpsc::channel();
    pool.submit(move || tx.send(interrupt::is_interrupted()).unwrap())
        .unwrap();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), false);
}

#[test]
fn dropping_last_handle_shuts_down() {
    let pool = pool("dropped", 2);
    let observer = pool.clone();
    drop(pool);
    assert!(!observer.is_shutdown(), "clone keeps the pool alive");

    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let handle = observer
        .submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    drop(observer);
    assert_eq!(handle.wait_timeout(WAIT), Some(JobOutcome::Completed));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}
