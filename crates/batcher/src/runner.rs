//! A bounded-concurrency gate for long-running submission jobs.

use anyhow::Result;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// A submission job: a future spawned onto the runtime when started.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Polls for the next runnable job. Must never block; returning `None` means
/// nothing is runnable right now.
type PollFn = Box<dyn FnMut() -> Result<Option<Job>> + Send>;

/// Observes every change to the number of running jobs.
type ChangedFn = Box<dyn Fn(u64) + Send + Sync>;

/// The lock-guarded gate state.
#[derive(Debug, Default)]
struct Gate {
    /// Jobs currently in flight.
    running: u64,
    /// Whether the runner was closed.
    closed: bool,
}

/// State shared with job completion tasks.
struct Shared {
    gate: Mutex<Gate>,
    /// Signalled whenever capacity may have been freed.
    notify: Notify,
    changed: ChangedFn,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Gate> {
        // A poisoned gate means a completion task panicked while holding the
        // lock, which never runs user code; the counter is still consistent.
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Gates the submission rate of long-running jobs to at most `concurrency`
/// in flight (0 means unlimited).
///
/// The caller supplies a non-blocking `poll` that yields runnable jobs and a
/// `changed` observer invoked on every running-count change, under the same
/// lock that [Runner::can] reads. Completion of a job decrements the count
/// and wakes [Runner::wait_start] waiters under that same lock, so a waiter
/// always observes a consistent count.
pub struct Runner {
    concurrency: u64,
    poll: PollFn,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("concurrency", &self.concurrency)
            .field("running", &self.shared.lock().running)
            .finish()
    }
}

impl Runner {
    /// Creates a new [Runner].
    pub fn new(
        concurrency: u64,
        poll: impl FnMut() -> Result<Option<Job>> + Send + 'static,
        changed: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            concurrency,
            poll: Box::new(poll),
            shared: Arc::new(Shared {
                gate: Mutex::new(Gate::default()),
                notify: Notify::new(),
                changed: Box::new(changed),
            }),
        }
    }

    /// Whether another job may start right now.
    pub fn can(&self) -> bool {
        let gate = self.shared.lock();
        self.can_locked(&gate)
    }

    fn can_locked(&self, gate: &Gate) -> bool {
        self.concurrency == 0 || gate.running < self.concurrency
    }

    /// Polls for a job and spawns it if capacity allows. Returns whether a
    /// job was started; a poll error is returned to the caller. After
    /// [Runner::close], no further jobs are accepted.
    pub fn try_start(&mut self) -> Result<bool> {
        let mut gate = self.shared.lock();
        if gate.closed || !self.can_locked(&gate) {
            return Ok(false);
        }

        // The poll is non-blocking by contract, so holding the gate across it
        // keeps the capacity check and the start atomic.
        let Some(job) = (self.poll)()? else {
            return Ok(false);
        };

        gate.running += 1;
        (self.shared.changed)(gate.running);
        trace!(target: "runner", running = gate.running, "Started job");
        drop(gate);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            job.await;
            let mut gate = shared.lock();
            gate.running -= 1;
            (shared.changed)(gate.running);
            trace!(target: "runner", running = gate.running, "Job finished");
            drop(gate);
            shared.notify.notify_waiters();
        });
        Ok(true)
    }

    /// Waits until capacity is available, then behaves as [Runner::try_start].
    pub async fn wait_start(&mut self) -> Result<bool> {
        loop {
            {
                let gate = self.shared.lock();
                if gate.closed {
                    return Ok(false);
                }
                if self.can_locked(&gate) {
                    drop(gate);
                    return self.try_start();
                }
            }

            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // Arm the waiter, then re-check: a completion landing between the
            // check above and the await below would otherwise be missed.
            notified.as_mut().enable();
            {
                let gate = self.shared.lock();
                if gate.closed {
                    return Ok(false);
                }
                if self.can_locked(&gate) {
                    continue;
                }
            }
            notified.await;
        }
    }

    /// Closes the runner and waits for all in-flight jobs to finish. No
    /// further jobs are accepted.
    pub async fn close(&mut self) {
        self.shared.lock().closed = true;
        debug!(target: "runner", "Runner closing, draining in-flight jobs");

        loop {
            if self.shared.lock().running == 0 {
                return;
            }

            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lock().running == 0 {
                return;
            }
            notified.await;
        }
    }
}
