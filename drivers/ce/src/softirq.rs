//! # Tasklets
//!
//! A tasklet is a deferred function that runs soon, on some executor, and
//! never concurrently with itself. Scheduling is allowed from interrupt
//! context and never blocks.
//!
//! ## State
//!
//! Each tasklet carries one atomic state word:
//!
//! - `SCHED`: a run is pending on the tasklet's lane
//! - `RUN`: the callback is executing
//! - `KILLED`: the tasklet refuses new schedules
//!
//! A schedule while `RUN` is set queues exactly one more run, which starts
//! after the current one returns.
//!
//! ## Lanes
//!
//! [`SoftIrq`] owns two FIFO lanes. [`SoftIrq::run`] always empties the high
//! lane before it looks at the normal one, so engines marked high priority
//! are never stuck behind normal ones.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::{Mutex, RwLock};

const TASKLET_STATE_SCHED: u32 = 1 << 0;
const TASKLET_STATE_RUN: u32 = 1 << 1;
const TASKLET_STATE_KILLED: u32 = 1 << 2;

/// Tasklet callback
pub type TaskletFn = Box<dyn Fn() + Send + Sync>;

/// Executor wake-up hook
pub type RaiseHook = Arc<dyn Fn() + Send + Sync>;

/// Priority lane of a tasklet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Serviced first
    High,
    /// Serviced after the high lane is empty
    Normal,
}

// =============================================================================
// Tasklet
// =============================================================================

/// Self-serialising deferred function
pub struct Tasklet {
    state: AtomicU32,
    lane: Lane,
    func: TaskletFn,
    softirq: Arc<SoftIrq>,
    runs: AtomicU64,
}

impl Tasklet {
    /// Create a tasklet bound to `softirq` on `lane`
    pub fn new<F>(softirq: &Arc<SoftIrq>, lane: Lane, func: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self {
            state: AtomicU32::new(0),
            lane,
            func: Box::new(func),
            softirq: Arc::clone(softirq),
            runs: AtomicU64::new(0),
        })
    }

    /// Queue a run
    ///
    /// Returns `false` if a run was already pending or the tasklet is killed.
    pub fn schedule(self: &Arc<Self>) -> bool {
        let prev = self.state.fetch_or(TASKLET_STATE_SCHED, Ordering::AcqRel);
        if prev & TASKLET_STATE_SCHED != 0 {
            return false;
        }
        if prev & TASKLET_STATE_KILLED != 0 {
            self.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
            return false;
        }

        self.softirq.enqueue(self.lane, Arc::clone(self));
        true
    }

    /// A run is pending and has not started yet
    pub fn is_scheduled(&self) -> bool {
        self.state.load(Ordering::Acquire) & TASKLET_STATE_SCHED != 0
    }

    /// The callback is executing
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) & TASKLET_STATE_RUN != 0
    }

    /// Scheduled or running
    pub fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) & (TASKLET_STATE_SCHED | TASKLET_STATE_RUN) != 0
    }

    /// Whether the tasklet refuses schedules
    pub fn is_killed(&self) -> bool {
        self.state.load(Ordering::Acquire) & TASKLET_STATE_KILLED != 0
    }

    /// Lane the tasklet runs on
    pub fn lane(&self) -> Lane {
        self.lane
    }

    /// Completed runs
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Stop the tasklet
    ///
    /// Refuses further schedules, waits for a running callback to return and
    /// discards a pending run. Blocks; never call it from the tasklet itself
    /// or from interrupt context.
    pub fn kill(&self) {
        self.state.fetch_or(TASKLET_STATE_KILLED, Ordering::AcqRel);

        while self.is_running() {
            relax();
        }

        self.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
    }

    /// Accept schedules again after [`kill`](Self::kill)
    pub fn revive(&self) {
        self.state.fetch_and(!TASKLET_STATE_KILLED, Ordering::AcqRel);
    }

    /// Try to execute one pending run
    ///
    /// Returns `None` when another executor holds the tasklet, otherwise
    /// whether the callback ran.
    fn try_run(&self) -> Option<bool> {
        if self.state.fetch_or(TASKLET_STATE_RUN, Ordering::Acquire) & TASKLET_STATE_RUN != 0 {
            return None;
        }

        let prev = self.state.fetch_and(!TASKLET_STATE_SCHED, Ordering::AcqRel);
        let ran = prev & TASKLET_STATE_SCHED != 0 && prev & TASKLET_STATE_KILLED == 0;
        if ran {
            (self.func)();
            self.runs.fetch_add(1, Ordering::Relaxed);
        }

        self.state.fetch_and(!TASKLET_STATE_RUN, Ordering::Release);
        Some(ran)
    }
}

impl fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasklet")
            .field("lane", &self.lane)
            .field("scheduled", &self.is_scheduled())
            .field("running", &self.is_running())
            .field("killed", &self.is_killed())
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

// =============================================================================
// SoftIrq
// =============================================================================

/// Two-lane tasklet queue serviced by an executor
pub struct SoftIrq {
    high: Mutex<VecDeque<Arc<Tasklet>>>,
    normal: Mutex<VecDeque<Arc<Tasklet>>>,
    raise_hook: RwLock<Option<RaiseHook>>,
    raised: AtomicU64,
}

impl SoftIrq {
    /// Create an empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            high: Mutex::new(VecDeque::new()),
            normal: Mutex::new(VecDeque::new()),
            raise_hook: RwLock::new(None),
            raised: AtomicU64::new(0),
        })
    }

    /// Install the hook that wakes the executor
    pub fn set_raise_hook(&self, hook: RaiseHook) {
        *self.raise_hook.write() = Some(hook);
    }

    /// Remove the wake-up hook
    pub fn clear_raise_hook(&self) {
        *self.raise_hook.write() = None;
    }

    /// Entries queued on a lane, stale ones included
    pub fn pending(&self, lane: Lane) -> usize {
        self.lane(lane).lock().len()
    }

    /// Whether either lane has entries
    pub fn has_pending(&self) -> bool {
        self.pending(Lane::High) + self.pending(Lane::Normal) > 0
    }

    /// Number of times the executor was raised
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }

    /// Service one snapshot of both lanes, high lane first
    ///
    /// Returns the number of callbacks executed. Runs queued by those
    /// callbacks are left for the next call.
    pub fn run(&self) -> usize {
        self.run_lane(Lane::High) + self.run_lane(Lane::Normal)
    }

    /// Call [`run`](Self::run) until the lanes are empty or `max_rounds` is hit
    pub fn run_until_idle(&self, max_rounds: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_rounds {
            if !self.has_pending() {
                break;
            }
            total += self.run();
        }
        total
    }

    fn lane(&self, lane: Lane) -> &Mutex<VecDeque<Arc<Tasklet>>> {
        match lane {
            Lane::High => &self.high,
            Lane::Normal => &self.normal,
        }
    }

    fn enqueue(&self, lane: Lane, tasklet: Arc<Tasklet>) {
        self.lane(lane).lock().push_back(tasklet);
        self.raise();
    }

    fn raise(&self) {
        self.raised.fetch_add(1, Ordering::Relaxed);
        let hook = self.raise_hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn run_lane(&self, lane: Lane) -> usize {
        // Take the batch so callbacks can requeue without contending
        let batch = core::mem::take(&mut *self.lane(lane).lock());
        let mut ran = 0;

        for tasklet in batch {
            match tasklet.try_run() {
                Some(true) => ran += 1,
                Some(false) => {},
                None => {
                    // Running on another executor: retry later
                    self.enqueue(lane, tasklet);
                },
            }
        }

        ran
    }
}

impl fmt::Debug for SoftIrq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftIrq")
            .field("high", &self.pending(Lane::High))
            .field("normal", &self.pending(Lane::Normal))
            .field("raised", &self.raised())
            .finish()
    }
}
