//! # Copy Engine Device
//!
//! The per-device dispatch context. Everything the top and bottom halves
//! share lives here: the entry table, the in-flight counter, the device
//! state flags and the instrumentation.
//!
//! ## Lifecycle
//!
//! ```text
//! attach -> init(mask) -> register_irqs(mask) -> ... interrupts ...
//!        -> unregister_irqs(mask) -> drain_all() -> teardown()
//! ```
//!
//! [`CeDevice`] is a cheap handle; clones share the same device.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use hif_hal::{IrqLine, IrqReturn};
use spin::Mutex;

use crate::config::{DispatchConfig, DrainBudget};
use crate::detect::LatencyDetector;
use crate::entry::TaskletEntry;
use crate::error::{CeError, CeResult};
use crate::history::{CeEvent, CeEventKind, CeHistory};
use crate::latency::LatencyTracker;
use crate::platform::CePlatform;
use crate::ratelimit::RateLimit;
use crate::softirq::{Lane, SoftIrq, Tasklet};
use crate::stats::{CeStats, CeStatsSnapshot};
use crate::workqueue::{Work, WorkQueue};
use crate::{dispatch, drain, irq, scheduler, worker, CeId, CeMask, CE_COUNT_MAX};

// =============================================================================
// Device State
// =============================================================================

/// Shared device state
pub(crate) struct DeviceInner {
    /// Attach-time configuration
    pub(crate) config: DispatchConfig,
    /// Platform collaborators
    pub(crate) platform: CePlatform,
    /// Tasklet executor queues
    pub(crate) softirq: Arc<SoftIrq>,
    /// Fallback work queue
    pub(crate) workqueue: Arc<WorkQueue>,
    /// Dispatch entries, indexed by engine
    pub(crate) entries: [TaskletEntry; CE_COUNT_MAX],
    /// Fallback reschedule work, indexed by engine
    pub(crate) reschedule_work: [Arc<Work>; CE_COUNT_MAX],
    /// Admitted bottom-half runs not yet retired
    pub(crate) active_tasklet_cnt: AtomicI32,
    /// Bus link is suspended; interrupts must not fire
    pub(crate) link_suspended: AtomicBool,
    /// Target is being reset
    pub(crate) target_reset: AtomicBool,
    /// Interrupt lines were released globally
    pub(crate) free_irq_done: AtomicBool,
    /// Driver initialization completed
    pub(crate) init_done: AtomicBool,
    /// Engines with a live line registration
    pub(crate) register_irq_done: Mutex<CeMask>,
    /// Interrupt counters
    pub(crate) stats: CeStats,
    /// Latency buckets, when enabled
    pub(crate) latency: Option<LatencyTracker>,
    /// Event history
    pub(crate) history: CeHistory,
    /// Delay detection, when enabled
    pub(crate) detect: Option<LatencyDetector>,
    /// Limits the channel-mismatch error
    pub(crate) mismatch_log: RateLimit,
}

impl DeviceInner {
    pub(crate) fn now_us(&self) -> u64 {
        self.platform.clock.now_us()
    }

    pub(crate) fn current_cpu(&self) -> usize {
        self.platform.irq.current_cpu()
    }

    pub(crate) fn entry(&self, ce: CeId) -> &TaskletEntry {
        &self.entries[ce.index()]
    }

    pub(crate) fn record_event(&self, ce: CeId, kind: CeEventKind) {
        self.history
            .record(ce, kind, self.now_us(), self.current_cpu());
    }

    pub(crate) fn inc_active(&self) {
        self.active_tasklet_cnt.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_active(&self) {
        self.active_tasklet_cnt.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn active(&self) -> i32 {
        self.active_tasklet_cnt.load(Ordering::Acquire)
    }

    pub(crate) fn is_link_suspended(&self) -> bool {
        self.link_suspended.load(Ordering::Acquire)
    }
}

// =============================================================================
// Device Handle
// =============================================================================

/// Copy engine dispatch device
#[derive(Clone)]
pub struct CeDevice {
    inner: Arc<DeviceInner>,
}

impl CeDevice {
    /// Build the dispatch context for one device
    ///
    /// Every entry starts uninitialized; call [`init`](Self::init) with the
    /// engines in use.
    pub fn attach(config: DispatchConfig, platform: CePlatform) -> CeResult<Self> {
        if config.ce_count > CE_COUNT_MAX {
            return Err(CeError::InvalidChannel(config.ce_count));
        }

        let softirq = SoftIrq::new();
        let workqueue = WorkQueue::new();

        let inner = Arc::new_cyclic(|weak: &Weak<DeviceInner>| {
            let entries = core::array::from_fn(|i| {
                let ce = CeId(i as u8);
                let lane = if config.attrs[i].hi_tasklet() {
                    Lane::High
                } else {
                    Lane::Normal
                };
                let owner = weak.clone();
                let tasklet = Tasklet::new(&softirq, lane, move || {
                    if let Some(dev) = owner.upgrade() {
                        worker::run(&dev, ce);
                    }
                });
                TaskletEntry::new(ce, tasklet, weak.clone())
            });

            let reschedule_work = core::array::from_fn(|i| {
                let ce = CeId(i as u8);
                let owner = weak.clone();
                Work::new(&workqueue, move || scheduler::reschedule_work_handler(&owner, ce))
            });

            DeviceInner {
                mismatch_log: RateLimit::new(
                    "ce_dispatch_interrupt",
                    config.mismatch_log_burst,
                    config.mismatch_log_interval_ms,
                ),
                latency: config.latency_stats.then(LatencyTracker::new),
                detect: config.latency_detect.map(LatencyDetector::new),
                config,
                platform,
                softirq: Arc::clone(&softirq),
                workqueue: Arc::clone(&workqueue),
                entries,
                reschedule_work,
                active_tasklet_cnt: AtomicI32::new(0),
                link_suspended: AtomicBool::new(false),
                target_reset: AtomicBool::new(false),
                free_irq_done: AtomicBool::new(false),
                init_done: AtomicBool::new(false),
                register_irq_done: Mutex::new(CeMask::empty()),
                stats: CeStats::new(),
                history: CeHistory::new(),
            }
        });

        log::debug!("ce dispatch attached: {} engines", inner.config.ce_count);
        Ok(Self { inner })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Initialize the entries of the engines in `mask`
    pub fn init(&self, mask: CeMask) {
        for ce in mask.ids() {
            let entry = self.inner.entry(ce);
            entry.tasklet().revive();
            entry.set_inited(true);
        }
        self.inner.init_done.store(true, Ordering::Release);
    }

    /// Stop every initialized engine and reset the in-flight counter
    ///
    /// Blocks until running bottom halves return. Process context only.
    pub fn teardown(&self) {
        self.inner.init_done.store(false, Ordering::Release);
        drain::kill_tasklets(&self.inner);
    }

    /// Cancel every pending fallback reschedule
    pub fn deinit_workers(&self) {
        for work in &self.inner.reschedule_work {
            work.cancel_sync();
        }
    }

    /// Register interrupt lines for the engines in `mask`
    ///
    /// On failure every line registered by this call is released again.
    pub fn register_irqs(&self, mask: CeMask) -> CeResult<()> {
        irq::register_irqs(&self.inner, mask)
    }

    /// Release interrupt lines for the engines in `mask`
    pub fn unregister_irqs(&self, mask: CeMask) {
        irq::unregister_irqs(&self.inner, mask);
    }

    /// Engines with a live line registration
    pub fn registered_irqs(&self) -> CeMask {
        *self.inner.register_irq_done.lock()
    }

    // -------------------------------------------------------------------------
    // Interrupt Entry Points
    // -------------------------------------------------------------------------

    /// Interrupt handler registered for every engine line
    pub fn handle_irq(&self, line: IrqLine, cookie: CeId) -> IrqReturn {
        irq::handle_irq(&self.inner, line, cookie)
    }

    /// Top half for engine `entry` given the id the line resolved to
    pub fn dispatch_interrupt(&self, ce_id: u32, entry: CeId) -> IrqReturn {
        dispatch::dispatch(&self.inner, ce_id, self.inner.entry(entry))
    }

    // -------------------------------------------------------------------------
    // Deferred Work
    // -------------------------------------------------------------------------

    /// Ask the fallback work queue to reschedule `ce`
    ///
    /// Returns `Ok(false)` if a reschedule was already queued.
    pub fn reschedule_from_work(&self, ce: CeId) -> CeResult<bool> {
        if !self.is_initialized(ce) {
            return Err(CeError::NotInitialized(ce));
        }
        Ok(self.inner.reschedule_work[ce.index()].queue())
    }

    /// The polling backend finished the run it was handed for `ce`
    pub fn poll_complete(&self, ce: CeId) {
        log::trace!("{} poll complete", ce);
        self.inner.dec_active();
    }

    /// Wait for in-flight bottom halves to finish
    pub fn drain_all(&self, budget: DrainBudget) -> CeResult<()> {
        drain::drain_tasklets(&self.inner, budget)
    }

    /// [`drain_all`](Self::drain_all) with the configured budget
    pub fn drain_tasklets(&self) -> CeResult<()> {
        drain::drain_tasklets(&self.inner, self.inner.config.drain)
    }

    /// Reap the firmware diagnostic engine once by polling
    pub fn drain_fw_diag_ce(&self) -> CeResult<()> {
        drain::drain_fw_diag_ce(&self.inner)
    }

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------

    /// Copy of the statistics
    pub fn stats(&self) -> CeStatsSnapshot {
        self.inner.stats.snapshot(self.inner.latency.as_ref())
    }

    /// Log the statistics
    pub fn display_stats(&self) {
        log::debug!("{}", self.stats());
    }

    /// Zero the statistics
    pub fn clear_stats(&self) {
        self.inner.stats.clear();
        if let Some(latency) = &self.inner.latency {
            latency.clear();
        }
    }

    /// The ring of `ce` was found full
    pub fn record_ring_full(&self, ce: CeId) {
        self.inner.stats.record_ring_full(ce);
    }

    /// Recent events of `ce`, newest first
    pub fn history(&self, ce: CeId) -> Vec<CeEvent> {
        self.inner.history.events(ce)
    }

    /// Log every dispatch entry
    pub fn dump_entries(&self) {
        drain::dump_entries(&self.inner);
    }

    /// Tasklet delays detected on the watched engine
    pub fn latency_delays_detected(&self) -> u64 {
        self.inner.detect.as_ref().map_or(0, LatencyDetector::detected)
    }

    // -------------------------------------------------------------------------
    // Device State
    // -------------------------------------------------------------------------

    /// Mark the bus link suspended or resumed
    pub fn set_link_suspended(&self, suspended: bool) {
        self.inner.link_suspended.store(suspended, Ordering::Release);
    }

    /// Mark the target as being reset
    pub fn set_target_reset(&self, reset: bool) {
        self.inner.target_reset.store(reset, Ordering::Release);
    }

    /// Record that interrupt lines were released globally
    pub fn set_irqs_freed(&self, freed: bool) {
        self.inner.free_irq_done.store(freed, Ordering::Release);
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Admitted bottom-half runs not yet retired
    pub fn active_tasklet_count(&self) -> i32 {
        self.inner.active()
    }

    /// Whether the entry of `ce` is initialized
    pub fn is_initialized(&self, ce: CeId) -> bool {
        self.inner.entry(ce).is_inited()
    }

    /// Whether `ce` is serviced from the high priority lane
    pub fn is_high_priority(&self, ce: CeId) -> bool {
        self.inner.entry(ce).is_hi_tasklet()
    }

    /// Dispatch entry of `ce`, the cookie its line is registered with
    pub fn entry(&self, ce: CeId) -> &TaskletEntry {
        self.inner.entry(ce)
    }

    /// Whether the tasklet of `ce` has a pending run
    pub fn is_scheduled(&self, ce: CeId) -> bool {
        self.inner.entry(ce).tasklet().is_scheduled()
    }

    /// Attach-time configuration
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Tasklet queues, for the executor
    pub fn softirq(&self) -> &Arc<SoftIrq> {
        &self.inner.softirq
    }

    /// Fallback work queue, for the executor
    pub fn workqueue(&self) -> &Arc<WorkQueue> {
        &self.inner.workqueue
    }
}

impl fmt::Debug for CeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeDevice")
            .field("ce_count", &self.inner.config.ce_count)
            .field("active", &self.inner.active())
            .field("registered", &self.registered_irqs())
            .finish_non_exhaustive()
    }
}
