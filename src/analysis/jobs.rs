//! Background execution of analysis jobs.
//!
//! Whole-heap analyses (a duplicate scan, a large connection query) take long
//! enough that a presentation layer cannot run them on its own thread. The
//! [`JobQueue`] owns a single background worker consuming a FIFO queue; each job
//! runs to completion on that worker, and its result is handed back through an
//! integration callback that the *caller's* thread executes when it drains the
//! queue.
//!
//! # Semantics
//!
//! - **Coalescing**: enqueuing a job replaces any not-yet-started queued job of
//!   the same [`JobKind`]. Rapid re-triggering (selection changes re-requesting
//!   a connection query) therefore cannot build up a backlog; the latest request
//!   wins.
//! - **Cooperative cancellation**: [`JobQueue::request_stop`] raises a flag the
//!   running job may poll via [`StopToken`] between large loop iterations. This
//!   is advisory, never preemptive.
//! - **Completion order**: results integrate in the order jobs *complete*, not
//!   the order they were submitted; jobs are independent and keyed latest-wins,
//!   so no re-sequencing is needed.
//!
//! The analyzed snapshot is immutable and shared via [`std::sync::Arc`], so jobs
//! and callers need no locking beyond the hand-off queues themselves.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use heapscope::{analysis::jobs::{JobKind, JobQueue}, Snapshot};
//!
//! let snapshot = Arc::new(Snapshot::from_file("capture.heap".as_ref())?);
//! let queue = JobQueue::new();
//!
//! let worker_snapshot = Arc::clone(&snapshot);
//! queue.submit(
//!     JobKind::DuplicateScan,
//!     move |stop| worker_snapshot.find_duplicates(Some(stop.flag())),
//!     |report| println!("{} duplicate groups", report.groups.len()),
//! );
//!
//! // Later, on the caller's thread:
//! queue.drain_completed()?;
//! # Ok::<(), heapscope::Error>(())
//! ```

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex,
};
use std::thread::JoinHandle;

use crate::{Error::LockError, Result};

/// The kinds of analysis jobs, used as the coalescing key.
///
/// Two queued jobs of the same kind are redundant: the later request supersedes
/// the earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Load and parse a snapshot file.
    LoadSnapshot,
    /// Compute the connection set of one entity.
    Connections,
    /// Search the shortest path to a GC root.
    RootPath,
    /// Run a whole-heap duplicate scan.
    DuplicateScan,
    /// Expand a field tree node.
    FieldExpansion,
}

/// Handle a running job polls to honor cancellation requests.
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Arc<AtomicBool>,
}

impl StopToken {
    /// Whether a stop was requested for the running job.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// The underlying flag, for analyses that accept an
    /// [`AtomicBool`][std::sync::atomic::AtomicBool] directly.
    #[must_use]
    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

type Integration = Box<dyn FnOnce() + Send>;
type Work = Box<dyn FnOnce(&StopToken) -> Integration + Send>;

struct PendingJob {
    kind: JobKind,
    work: Work,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingJob>,
    completed: Vec<Integration>,
    shutdown: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    signal: Condvar,
    stop: Arc<AtomicBool>,
}

/// A single-worker FIFO queue for analysis jobs with per-kind coalescing.
///
/// Dropping the queue shuts the worker down: the running job finishes (or
/// observes the stop flag), queued jobs are discarded.
pub struct JobQueue {
    inner: Arc<QueueInner>,
    worker: Option<JoinHandle<()>>,
}

impl JobQueue {
    /// Create the queue and start its worker thread.
    #[must_use]
    pub fn new() -> JobQueue {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            signal: Condvar::new(),
            stop: Arc::new(AtomicBool::new(false)),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name("heapscope-analysis".into())
            .spawn(move || worker_loop(&worker_inner))
            .expect("Failed to spawn analysis worker");

        JobQueue {
            inner,
            worker: Some(worker),
        }
    }

    /// Submit a job.
    ///
    /// `work` runs on the worker thread and may poll the [`StopToken`].
    /// `integrate` runs on whichever thread calls [`JobQueue::drain_completed`],
    /// receiving the work's result.
    ///
    /// Any queued, not-yet-started job of the same kind is replaced by this one.
    pub fn submit<T, W, I>(&self, kind: JobKind, work: W, integrate: I)
    where
        T: Send + 'static,
        W: FnOnce(&StopToken) -> T + Send + 'static,
        I: FnOnce(T) + Send + 'static,
    {
        let job = PendingJob {
            kind,
            work: Box::new(move |token| {
                let result = work(token);
                Box::new(move || integrate(result))
            }),
        };

        {
            let mut state = lock!(self.inner.state);
            // Coalesce: the later request supersedes a queued one of this kind.
            state.pending.retain(|pending| pending.kind != kind);
            state.pending.push_back(job);
        }
        self.inner.signal.notify_one();
    }

    /// Request cancellation of the currently running job.
    ///
    /// Advisory: the job observes the flag at its own pace, and jobs that never
    /// poll it simply run to completion.
    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
    }

    /// Number of queued, not-yet-started jobs.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] when the queue mutex is poisoned.
    pub fn pending_len(&self) -> Result<usize> {
        let state = self.inner.state.lock().map_err(|_| LockError)?;
        Ok(state.pending.len())
    }

    /// Run all completed jobs' integration callbacks on the calling thread.
    ///
    /// Callbacks run in job-completion order. Returns the number integrated.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] when the queue mutex is poisoned.
    pub fn drain_completed(&self) -> Result<usize> {
        let completed = {
            let mut state = self.inner.state.lock().map_err(|_| LockError)?;
            std::mem::take(&mut state.completed)
        };

        let count = completed.len();
        for integration in completed {
            integration();
        }

        Ok(count)
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        {
            let mut state = lock!(self.inner.state);
            state.shutdown = true;
            state.pending.clear();
        }
        self.inner.stop.store(true, Ordering::Relaxed);
        self.inner.signal.notify_all();

        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(inner: &QueueInner) {
    loop {
        let job = {
            let mut state = lock!(inner.state);
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(job) = state.pending.pop_front() {
                    break job;
                }
                state = inner
                    .signal
                    .wait(state)
                    .expect("Failed to acquire lock");
            }
        };

        // A stop request targets the job that was running when it was raised;
        // a fresh job starts with a clear flag.
        inner.stop.store(false, Ordering::Relaxed);
        let token = StopToken {
            flag: Arc::clone(&inner.stop),
        };

        let integration = (job.work)(&token);

        let mut state = lock!(inner.state);
        state.completed.push(integration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn drain_until<F: Fn() -> bool>(queue: &JobQueue, done: F) {
        for _ in 0..200 {
            queue.drain_completed().unwrap();
            if done() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("job did not complete in time");
    }

    #[test]
    fn job_result_integrates_on_caller_thread() {
        let queue = JobQueue::new();
        let result = Arc::new(Mutex::new(None));

        let result_slot = Arc::clone(&result);
        queue.submit(
            JobKind::Connections,
            |_| 21 * 2,
            move |value| *result_slot.lock().unwrap() = Some(value),
        );

        drain_until(&queue, || result.lock().unwrap().is_some());
        assert_eq!(*result.lock().unwrap(), Some(42));
    }

    #[test]
    fn results_integrate_in_completion_order() {
        let queue = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let slow_order = Arc::clone(&order);
        queue.submit(
            JobKind::DuplicateScan,
            |_| std::thread::sleep(Duration::from_millis(30)),
            move |()| slow_order.lock().unwrap().push("slow"),
        );

        let fast_order = Arc::clone(&order);
        queue.submit(
            JobKind::Connections,
            |_| (),
            move |()| fast_order.lock().unwrap().push("fast"),
        );

        drain_until(&queue, || order.lock().unwrap().len() == 2);

        // Single worker, FIFO start order: the slow job started first and
        // completes first.
        assert_eq!(*order.lock().unwrap(), vec!["slow", "fast"]);
    }

    #[test]
    fn queued_job_of_same_kind_is_coalesced() {
        let queue = JobQueue::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        // Occupy the worker so subsequent submissions stay queued.
        let (release, gate) = mpsc::channel::<()>();
        queue.submit(
            JobKind::LoadSnapshot,
            move |_| {
                gate.recv().ok();
            },
            |()| {},
        );
        std::thread::sleep(Duration::from_millis(20));

        for value in [1, 2, 3] {
            let hits = Arc::clone(&hits);
            queue.submit(
                JobKind::DuplicateScan,
                move |_| value,
                move |v| hits.lock().unwrap().push(v),
            );
        }
        assert_eq!(queue.pending_len().unwrap(), 1, "earlier duplicates dropped");

        release.send(()).unwrap();
        drain_until(&queue, || !hits.lock().unwrap().is_empty());

        assert_eq!(*hits.lock().unwrap(), vec![3], "latest submission wins");
    }

    #[test]
    fn stop_flag_reaches_the_running_job() {
        let queue = JobQueue::new();
        let observed = Arc::new(Mutex::new(None));

        let (started_send, started) = mpsc::channel::<()>();
        let observed_clone = Arc::clone(&observed);
        queue.submit(
            JobKind::DuplicateScan,
            move |token| {
                started_send.send(()).unwrap();
                // Poll cooperatively, as a scan would between entities
                for _ in 0..200 {
                    if token.is_stop_requested() {
                        *observed_clone.lock().unwrap() = Some(true);
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
                *observed_clone.lock().unwrap() = Some(false);
            },
            |()| {},
        );

        started.recv().unwrap();
        queue.request_stop();

        drain_until(&queue, || observed.lock().unwrap().is_some());
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[test]
    fn drop_shuts_the_worker_down() {
        let queue = JobQueue::new();
        queue.submit(JobKind::Connections, |_| (), |()| {});
        drop(queue); // must not hang
    }
}
