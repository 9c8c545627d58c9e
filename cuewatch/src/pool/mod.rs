//! Work pool.
//!
//! A process-wide bounded work queue with a small fixed set of worker
//! threads. Workers run snapshot fetches and file I/O off the UI thread;
//! each successful task yields a callback which is handed back over a
//! crossbeam channel and executed by the UI thread's event loop. Delivery
//! is blocking-queued: the worker waits for the callback to finish before
//! popping its next unit, so all registry mutation stays serialized on the
//! UI thread.
//!
//! Enqueueing dedupes on label (at most one queued fetch per logical
//! refresh) and drops on overflow, counting drops per label.

pub mod ticker;

pub use ticker::{TickAction, TickScheduler};

use crossbeam::channel;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{debug, warn};

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_MAX_QUEUE: usize = 50;

/// One warning per this many drops of the same label.
const DROP_WARN_EVERY: u64 = 10;

/// Runs on the UI thread after a task succeeds.
pub type UiCallback = Box<dyn FnOnce() + Send>;

/// Worker-side unit: does the blocking work, and on success returns the
/// callback to run on the UI thread (or `None` for fire-and-forget tasks).
pub type Task = Box<dyn FnOnce() -> Result<Option<UiCallback>, String> + Send>;

struct Work {
    label: String,
    task: Task,
}

/// A completed unit waiting for the UI thread.
pub struct Delivery {
    pub label: String,
    callback: UiCallback,
    ack: channel::Sender<()>,
}

impl Delivery {
    /// Run the callback and release the worker that produced it.
    pub fn run(self) {
        (self.callback)();
        // The worker may already be gone during shutdown.
        let _ = self.ack.send(());
    }
}

struct QueueState {
    queue: VecDeque<Work>,
    drops: HashMap<String, u64>,
    workers_started: bool,
    stop: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    available: Condvar,
}

pub struct WorkPool {
    shared: Arc<Shared>,
    delivery_tx: channel::Sender<Delivery>,
    workers: usize,
    max_queue: usize,
}

impl WorkPool {
    /// Create a pool and the delivery channel its workers feed. The UI
    /// event loop owns the receiver and must `run()` everything it gets.
    pub fn new(workers: usize, max_queue: usize) -> (WorkPool, channel::Receiver<Delivery>) {
        let (delivery_tx, delivery_rx) = channel::bounded::<Delivery>(1);
        let pool = WorkPool {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    drops: HashMap::new(),
                    workers_started: false,
                    stop: false,
                }),
                available: Condvar::new(),
            }),
            delivery_tx,
            workers,
            max_queue,
        };
        (pool, delivery_rx)
    }

    pub fn with_defaults() -> (WorkPool, channel::Receiver<Delivery>) {
        Self::new(DEFAULT_WORKERS, DEFAULT_MAX_QUEUE)
    }

    /// Queued units, not counting tasks currently executing.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_queue(&self) -> usize {
        self.max_queue
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.shared.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Enqueue a unit. Returns false when deduped against an identical
    /// queued label or dropped on overflow. Workers start lazily on the
    /// first call.
    pub fn queue(
        &self,
        label: &str,
        task: impl FnOnce() -> Result<Option<UiCallback>, String> + Send + 'static,
    ) -> bool {
        let mut state = self.lock();
        if !state.workers_started {
            state.workers_started = true;
            for n in 0..self.workers {
                let shared = self.shared.clone();
                let delivery_tx = self.delivery_tx.clone();
                thread::Builder::new()
                    .name(format!("cuewatch-worker-{}", n))
                    .spawn(move || worker_loop(shared, delivery_tx))
                    .expect("failed to spawn pool worker");
            }
        }

        if state.queue.iter().any(|w| w.label == label) {
            debug!(label, "deduped queued task");
            return false;
        }
        if state.queue.len() >= self.max_queue {
            let count = state.drops.entry(label.to_string()).or_insert(0);
            *count += 1;
            if *count % DROP_WARN_EVERY == 0 {
                warn!(label, drops = *count, "work queue full, dropping task");
            }
            return false;
        }
        state.queue.push_back(Work {
            label: label.to_string(),
            task: Box::new(task),
        });
        drop(state);
        self.shared.available.notify_one();
        true
    }

    /// Run task and callback synchronously on the caller's thread. Used
    /// where threading is disabled (the admin CLI, some tests).
    pub fn local(
        &self,
        label: &str,
        task: impl FnOnce() -> Result<Option<UiCallback>, String>,
    ) {
        match task() {
            Ok(Some(callback)) => callback(),
            Ok(None) => {}
            Err(err) => warn!(label, %err, "local task failed"),
        }
    }

    /// Total drops recorded for a label.
    pub fn drop_count(&self, label: &str) -> u64 {
        self.lock().drops.get(label).copied().unwrap_or(0)
    }

    /// Stop the workers. Queued, unstarted units are discarded.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.stop = true;
        state.queue.clear();
        drop(state);
        self.shared.available.notify_all();
    }
}

fn worker_loop(shared: Arc<Shared>, delivery_tx: channel::Sender<Delivery>) {
    loop {
        let work = {
            let mut state = shared.state.lock().unwrap_or_else(|p| p.into_inner());
            loop {
                if state.stop {
                    return;
                }
                if let Some(work) = state.queue.pop_front() {
                    break work;
                }
                state = shared
                    .available
                    .wait(state)
                    .unwrap_or_else(|p| p.into_inner());
            }
        };

        match (work.task)() {
            Ok(Some(callback)) => {
                let (ack_tx, ack_rx) = channel::bounded::<()>(1);
                if delivery_tx
                    .send(Delivery {
                        label: work.label,
                        callback,
                        ack: ack_tx,
                    })
                    .is_err()
                {
                    // UI side is gone; nothing left to do.
                    return;
                }
                // Blocking-queued: wait for the UI thread to finish the
                // callback before taking the next unit.
                let _ = ack_rx.recv();
            }
            Ok(None) => {}
            Err(err) => {
                warn!(label = %work.label, %err, "worker task failed");
            }
        }
    }
}
