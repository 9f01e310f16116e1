use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::fault;
use crate::interrupt::{self, Interrupter};

use super::handle::JobOutcome;
use super::PoolCore;

/// Worker thread body: drain the queue until it is closed and empty.
pub(super) fn run(core: Arc<PoolCore>, index: usize) {
    let interrupter = Interrupter::current();
    debug!(pool = %core.name, worker = index, "worker started");

    while let Some(queued) = core.queue.take() {
        if !queued.state.try_start() {
            trace!(pool = %core.name, seq = queued.seq, "skipping cancelled job");
            continue;
        }

        // A stale interrupt aimed at the previous job must not leak into this one.
        interrupt::clear();
        core.running.lock().insert(index, interrupter.clone());
        core.active.fetch_add(1, Ordering::SeqCst);

        let completed = fault::run_guarded(&core.name, &core.fault_handler, queued.job);

        core.running.lock().remove(&index);
        core.active.fetch_sub(1, Ordering::SeqCst);
        core.completed.fetch_add(1, Ordering::Relaxed);
        queued.state.finish(if completed {
            JobOutcome::Completed
        } else {
            JobOutcome::Panicked
        });
    }

    debug!(pool = %core.name, worker = index, "worker exiting");
    core.worker_exited();
}
