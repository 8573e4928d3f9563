#![forbid(unsafe_code)]

//! Bounded worker pool: a pre-filled queue drained by a fixed number of
//! blocking workers. `dispatch` returns once every worker has drained the
//! queue, which means every unit has signalled completion.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, info_span};

use crate::metadata::VideoRecord;
use crate::progress::ProgressReporter;
use crate::worker::UnitOutcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub completed: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Default)]
struct PoolState {
    completed: AtomicUsize,
    downloaded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    aborted: AtomicBool,
    fatal: Mutex<Option<anyhow::Error>>,
}

impl PoolState {
    fn record(&self, outcome: UnitOutcome) {
        let counter = match outcome {
            UnitOutcome::Downloaded => &self.downloaded,
            UnitOutcome::DownloadFailed => &self.failed,
            UnitOutcome::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Keeps the first fatal error and tells every worker to stop taking
    /// new units.
    fn abort(&self, err: anyhow::Error) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
        self.aborted.store(true, Ordering::Release);
    }

    fn summary(&self) -> DispatchSummary {
        DispatchSummary {
            completed: self.completed.load(Ordering::Acquire),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Runs `job` once for every unit with at most `workers` jobs in flight.
///
/// Per-unit failures are whatever `UnitOutcome` the job reports. An `Err`
/// from the job is fatal: no further units are started, in-flight units are
/// allowed to finish, and the first such error is returned.
pub async fn dispatch<F>(
    units: Vec<VideoRecord>,
    workers: NonZeroUsize,
    progress: ProgressReporter,
    job: F,
) -> Result<DispatchSummary>
where
    F: Fn(&VideoRecord) -> Result<UnitOutcome> + Send + Sync + 'static,
{
    let total = units.len();
    if total == 0 {
        return Ok(DispatchSummary::default());
    }

    let queue = Arc::new(Mutex::new(VecDeque::from(units)));
    let state = Arc::new(PoolState::default());
    let job = Arc::new(job);
    let pool_size = workers.get().min(total);

    info!("starting {pool_size} workers for {total} units");
    let mut tasks = JoinSet::new();
    for index in 0..pool_size {
        let queue = Arc::clone(&queue);
        let state = Arc::clone(&state);
        let job = Arc::clone(&job);
        let progress = progress.clone();
        tasks.spawn_blocking(move || run_worker(index, &queue, job.as_ref(), &state, &progress));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!(%err, "worker task ended abnormally");
        }
    }

    let fatal = state.fatal.lock().take();
    if let Some(err) = fatal {
        return Err(err);
    }
    Ok(state.summary())
}

fn run_worker<F>(
    index: usize,
    queue: &Mutex<VecDeque<VideoRecord>>,
    job: &F,
    state: &PoolState,
    progress: &ProgressReporter,
) where
    F: Fn(&VideoRecord) -> Result<UnitOutcome>,
{
    let span = info_span!("worker", id = index);
    let _entered = span.enter();

    loop {
        if state.aborted.load(Ordering::Acquire) {
            break;
        }
        let Some(unit) = queue.lock().pop_front() else {
            break;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| job(&unit))) {
            Ok(Ok(outcome)) => state.record(outcome),
            Ok(Err(err)) => {
                error!(video_id = %unit.id, "stopping workers: {err:#}");
                state.abort(err);
            }
            Err(_) => {
                error!(video_id = %unit.id, "download job panicked");
                state.record(UnitOutcome::DownloadFailed);
            }
        }

        state.completed.fetch_add(1, Ordering::AcqRel);
        progress.advance();
    }
}
