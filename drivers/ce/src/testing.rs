//! Mock platform for unit tests.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use hif_hal::{Clock, IrqError, IrqFlags, IrqLine};
use spin::Mutex;

use crate::platform::{CeIrqChip, CePlatform, CeTarget, NapiBackend, TestResume};
use crate::{CeDevice, CeId, CeMask, DispatchConfig, CE_COUNT_MAX};

type Hook = Arc<dyn Fn() + Send + Sync>;

fn counters() -> [AtomicU32; CE_COUNT_MAX] {
    core::array::from_fn(|_| AtomicU32::new(0))
}

// =============================================================================
// IRQ Chip
// =============================================================================

#[derive(Default)]
struct LineTable {
    registered: CeMask,
    names: [Option<&'static str>; CE_COUNT_MAX],
    flags: [Option<IrqFlags>; CE_COUNT_MAX],
    fail: [Option<IrqError>; CE_COUNT_MAX],
    requests: u32,
    frees: u32,
}

/// Recording interrupt controller with failure injection
pub(crate) struct MockIrqChip {
    lines: Mutex<LineTable>,
    enables: [AtomicU32; CE_COUNT_MAX],
    disables: [AtomicU32; CE_COUNT_MAX],
    cpu: AtomicUsize,
}

impl MockIrqChip {
    fn new() -> Self {
        Self {
            lines: Mutex::new(LineTable::default()),
            enables: counters(),
            disables: counters(),
            cpu: AtomicUsize::new(0),
        }
    }

    pub(crate) fn fail_on(&self, ce: CeId, err: IrqError) {
        self.lines.lock().fail[ce.index()] = Some(err);
    }

    pub(crate) fn registered(&self) -> CeMask {
        self.lines.lock().registered
    }

    pub(crate) fn name(&self, ce: CeId) -> Option<&'static str> {
        self.lines.lock().names[ce.index()]
    }

    pub(crate) fn flags(&self, ce: CeId) -> Option<IrqFlags> {
        self.lines.lock().flags[ce.index()]
    }

    pub(crate) fn requests(&self) -> u32 {
        self.lines.lock().requests
    }

    pub(crate) fn frees(&self) -> u32 {
        self.lines.lock().frees
    }

    pub(crate) fn enables(&self, ce: CeId) -> u32 {
        self.enables[ce.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn disables(&self, ce: CeId) -> u32 {
        self.disables[ce.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn set_cpu(&self, cpu: usize) {
        self.cpu.store(cpu, Ordering::SeqCst);
    }
}

impl CeIrqChip for MockIrqChip {
    fn request_irq(&self, ce: CeId, name: &'static str, flags: IrqFlags) -> Result<(), IrqError> {
        let mut lines = self.lines.lock();
        lines.requests += 1;
        if let Some(err) = lines.fail[ce.index()] {
            return Err(err);
        }
        if lines.registered.has(ce) {
            return Err(IrqError::AlreadyRegistered);
        }
        lines.registered.insert(CeMask::of(ce));
        lines.names[ce.index()] = Some(name);
        lines.flags[ce.index()] = Some(flags);
        Ok(())
    }

    fn free_irq(&self, ce: CeId) -> Result<(), IrqError> {
        let mut lines = self.lines.lock();
        lines.frees += 1;
        if !lines.registered.has(ce) {
            return Err(IrqError::NotRegistered);
        }
        lines.registered.remove(CeMask::of(ce));
        lines.names[ce.index()] = None;
        lines.flags[ce.index()] = None;
        Ok(())
    }

    fn disable(&self, ce: CeId) {
        self.disables[ce.index()].fetch_add(1, Ordering::SeqCst);
    }

    fn enable(&self, ce: CeId) {
        self.enables[ce.index()].fetch_add(1, Ordering::SeqCst);
    }

    fn line_to_ce(&self, line: IrqLine) -> u32 {
        line.raw()
    }

    fn current_cpu(&self) -> usize {
        self.cpu.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Target
// =============================================================================

/// Target whose service results are scripted per engine
///
/// An engine with an empty script reports no pending frames.
pub(crate) struct MockTarget {
    scripts: Mutex<[VecDeque<bool>; CE_COUNT_MAX]>,
    hooks: Mutex<[Option<Hook>; CE_COUNT_MAX]>,
    services: [AtomicU32; CE_COUNT_MAX],
    register_access: AtomicBool,
    polling_disabled: Mutex<CeMask>,
}

impl MockTarget {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(core::array::from_fn(|_| VecDeque::new())),
            hooks: Mutex::new(core::array::from_fn(|_| None)),
            services: counters(),
            register_access: AtomicBool::new(true),
            polling_disabled: Mutex::new(CeMask::empty()),
        }
    }

    pub(crate) fn script(&self, ce: CeId, results: &[bool]) {
        self.scripts.lock()[ce.index()].extend(results.iter().copied());
    }

    pub(crate) fn on_service<F>(&self, ce: CeId, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.lock()[ce.index()] = Some(Arc::new(hook));
    }

    pub(crate) fn services(&self, ce: CeId) -> u32 {
        self.services[ce.index()].load(Ordering::SeqCst)
    }

    pub(crate) fn total_services(&self) -> u32 {
        self.services.iter().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    pub(crate) fn set_register_access(&self, allowed: bool) {
        self.register_access.store(allowed, Ordering::SeqCst);
    }

    pub(crate) fn polling_disabled(&self) -> CeMask {
        *self.polling_disabled.lock()
    }
}

impl CeTarget for MockTarget {
    fn service(&self, ce: CeId) -> bool {
        self.services[ce.index()].fetch_add(1, Ordering::SeqCst);

        let hook = self.hooks.lock()[ce.index()].clone();
        if let Some(hook) = hook {
            hook();
        }

        self.scripts.lock()[ce.index()].pop_front().unwrap_or(false)
    }

    fn register_access_allowed(&self) -> bool {
        self.register_access.load(Ordering::SeqCst)
    }

    fn disable_polling(&self, ce: CeId) {
        self.polling_disabled.lock().insert(CeMask::of(ce));
    }
}

// =============================================================================
// Clock
// =============================================================================

/// Clock that only moves when told to; sleeping advances it
pub(crate) struct ManualClock {
    now_us: AtomicU64,
    sleeps: AtomicU32,
    slept_ms: AtomicU64,
    on_sleep: Mutex<Option<Hook>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
            sleeps: AtomicU32::new(0),
            slept_ms: AtomicU64::new(0),
            on_sleep: Mutex::new(None),
        }
    }

    pub(crate) fn set(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::SeqCst);
    }

    pub(crate) fn sleeps(&self) -> u32 {
        self.sleeps.load(Ordering::SeqCst)
    }

    pub(crate) fn slept_ms(&self) -> u64 {
        self.slept_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn on_sleep<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_sleep.lock() = Some(Arc::new(hook));
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.slept_ms.fetch_add(u64::from(ms), Ordering::SeqCst);
        self.advance(u64::from(ms) * 1000);

        let hook = self.on_sleep.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

// =============================================================================
// NAPI and Test Resume
// =============================================================================

struct MockNapi {
    enabled: CeMask,
    scheduled: Mutex<CeMask>,
    schedules: [AtomicU32; CE_COUNT_MAX],
    state_events: AtomicU32,
    fail_code: Mutex<Option<i32>>,
}

impl NapiBackend for MockNapi {
    fn enabled(&self, ce: CeId) -> bool {
        self.enabled.has(ce)
    }

    fn is_scheduled(&self, ce: CeId) -> bool {
        self.scheduled.lock().has(ce)
    }

    fn schedule(&self, ce: CeId) -> bool {
        self.schedules[ce.index()].fetch_add(1, Ordering::SeqCst);
        let mut scheduled = self.scheduled.lock();
        if scheduled.has(ce) {
            return false;
        }
        scheduled.insert(CeMask::of(ce));
        true
    }

    fn irq_state_changed(&self, _enabled: bool) -> Result<(), i32> {
        self.state_events.fetch_add(1, Ordering::SeqCst);
        match *self.fail_code.lock() {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }
}

struct MockResume {
    trigger: CeId,
    resumes: AtomicU32,
}

impl TestResume for MockResume {
    fn is_resume_trigger(&self, ce: CeId) -> bool {
        ce == self.trigger
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Mock platform plus accessors for what it recorded
pub(crate) struct Harness {
    pub(crate) irq: Arc<MockIrqChip>,
    pub(crate) target: Arc<MockTarget>,
    pub(crate) clock: Arc<ManualClock>,
    napi: Option<Arc<MockNapi>>,
    resume: Option<Arc<MockResume>>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            irq: Arc::new(MockIrqChip::new()),
            target: Arc::new(MockTarget::new()),
            clock: Arc::new(ManualClock::new()),
            napi: None,
            resume: None,
        }
    }

    /// Serve the engines in `enabled` from a fake polling backend
    pub(crate) fn with_napi(mut self, enabled: CeMask) -> Self {
        self.napi = Some(Arc::new(MockNapi {
            enabled,
            scheduled: Mutex::new(CeMask::empty()),
            schedules: counters(),
            state_events: AtomicU32::new(0),
            fail_code: Mutex::new(None),
        }));
        self
    }

    /// Resume the target on interrupts of `trigger`
    pub(crate) fn with_test_resume(mut self, trigger: CeId) -> Self {
        self.resume = Some(Arc::new(MockResume {
            trigger,
            resumes: AtomicU32::new(0),
        }));
        self
    }

    pub(crate) fn platform(&self) -> CePlatform {
        let mut platform = CePlatform::new(
            Arc::clone(&self.irq) as Arc<dyn CeIrqChip>,
            Arc::clone(&self.target) as Arc<dyn CeTarget>,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
        );
        if let Some(napi) = &self.napi {
            platform = platform.with_napi(Arc::clone(napi) as Arc<dyn NapiBackend>);
        }
        if let Some(resume) = &self.resume {
            platform = platform.with_test_resume(Arc::clone(resume) as Arc<dyn TestResume>);
        }
        platform
    }

    pub(crate) fn device(&self, config: DispatchConfig) -> CeDevice {
        CeDevice::attach(config, self.platform()).expect("attach")
    }

    pub(crate) fn resumes(&self) -> u32 {
        self.resume
            .as_ref()
            .map_or(0, |r| r.resumes.load(Ordering::SeqCst))
    }

    pub(crate) fn napi_schedules(&self, ce: CeId) -> u32 {
        self.napi
            .as_ref()
            .map_or(0, |n| n.schedules[ce.index()].load(Ordering::SeqCst))
    }

    /// The fake poll for `ce` finished
    pub(crate) fn napi_complete(&self, ce: CeId) {
        if let Some(napi) = &self.napi {
            napi.scheduled.lock().remove(CeMask::of(ce));
        }
    }

    pub(crate) fn fail_napi_state_events(&self, code: i32) {
        if let Some(napi) = &self.napi {
            *napi.fail_code.lock() = Some(code);
        }
    }

    pub(crate) fn napi_state_events(&self) -> u32 {
        self.napi
            .as_ref()
            .map_or(0, |n| n.state_events.load(Ordering::SeqCst))
    }
}
