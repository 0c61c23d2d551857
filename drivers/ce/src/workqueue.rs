//! # Work Queue
//!
//! Process-context deferred work. A [`Work`] item is queued at most once at
//! a time; queueing an item that is already pending is a no-op.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use crate::softirq::RaiseHook;

const WORK_PENDING: u32 = 1 << 0;
const WORK_RUNNING: u32 = 1 << 1;
const WORK_CANCELED: u32 = 1 << 2;

/// Work callback
pub type WorkFn = Box<dyn Fn() + Send + Sync>;

/// A queueable unit of work
pub struct Work {
    state: AtomicU32,
    func: WorkFn,
    queue: Arc<WorkQueue>,
    runs: AtomicU64,
}

impl Work {
    /// Create a work item bound to `queue`
    pub fn new<F>(queue: &Arc<WorkQueue>, func: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: AtomicU32::new(0),
            func: Box::new(func),
            queue: Arc::clone(queue),
            runs: AtomicU64::new(0),
        })
    }

    /// Queue the item; `false` if it was already pending
    pub fn queue(self: &Arc<Self>) -> bool {
        let prev = self.state.fetch_or(WORK_PENDING, Ordering::AcqRel);
        if prev & WORK_PENDING != 0 {
            return false;
        }
        self.state.fetch_and(!WORK_CANCELED, Ordering::AcqRel);
        self.queue.push(Arc::clone(self));
        true
    }

    /// Waiting on the queue
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) & WORK_PENDING != 0
    }

    /// Callback executing
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) & WORK_RUNNING != 0
    }

    /// Completed runs
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Drop a pending run and wait for a running one to finish
    ///
    /// Returns whether a pending run was discarded.
    pub fn cancel_sync(&self) -> bool {
        self.state.fetch_or(WORK_CANCELED, Ordering::AcqRel);
        let prev = self.state.fetch_and(!WORK_PENDING, Ordering::AcqRel);

        while self.is_running() {
            relax();
        }

        prev & WORK_PENDING != 0
    }

    fn execute(&self) -> bool {
        self.state.fetch_or(WORK_RUNNING, Ordering::Acquire);
        let prev = self.state.fetch_and(!WORK_PENDING, Ordering::AcqRel);

        let run = prev & WORK_PENDING != 0 && prev & WORK_CANCELED == 0;
        if run {
            (self.func)();
            self.runs.fetch_add(1, Ordering::Relaxed);
        }

        self.state.fetch_and(!WORK_RUNNING, Ordering::Release);
        run
    }
}

impl fmt::Debug for Work {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Work")
            .field("pending", &self.is_pending())
            .field("running", &self.is_running())
            .field("runs", &self.runs())
            .finish()
    }
}

#[cfg(any(test, feature = "std"))]
fn relax() {
    std::thread::yield_now();
}

#[cfg(not(any(test, feature = "std")))]
fn relax() {
    core::hint::spin_loop();
}

/// FIFO of work items serviced by a worker thread
pub struct WorkQueue {
    items: Mutex<VecDeque<Arc<Work>>>,
    run_lock: Mutex<()>,
    raise_hook: RwLock<Option<RaiseHook>>,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(VecDeque::new()),
            run_lock: Mutex::new(()),
            raise_hook: RwLock::new(None),
        })
    }

    /// Install the hook that wakes the worker
    pub fn set_raise_hook(&self, hook: RaiseHook) {
        *self.raise_hook.write() = Some(hook);
    }

    /// Remove the wake-up hook
    pub fn clear_raise_hook(&self) {
        *self.raise_hook.write() = None;
    }

    /// Items waiting, canceled ones included
    pub fn pending(&self) -> usize {
        self.items.lock().len()
    }

    /// Run queued items in order until the queue is empty
    ///
    /// Returns the number of callbacks executed. Items run one at a time.
    pub fn run(&self) -> usize {
        let _serial = self.run_lock.lock();
        let mut ran = 0;

        loop {
            let next = self.items.lock().pop_front();
            let Some(work) = next else {
                break;
            };
            if work.execute() {
                ran += 1;
            }
        }

        ran
    }

    fn push(&self, work: Arc<Work>) {
        self.items.lock().push_back(work);
        let hook = self.raise_hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
