//! # Dispatch Entries
//!
//! One entry per copy engine, owned by the device. The entry is what the
//! interrupt line is registered with: the top half receives it as cookie
//! and reaches the device through its weak back-reference.

use alloc::sync::{Arc, Weak};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Mutex, MutexGuard};

use crate::device::DeviceInner;
use crate::softirq::{Lane, Tasklet};
use crate::CeId;

/// Per-engine dispatch descriptor
pub struct TaskletEntry {
    /// Engine this entry serves
    ce_id: CeId,
    /// Set by init, cleared by teardown
    inited: AtomicBool,
    /// Serviced from the high priority lane
    hi_tasklet: bool,
    /// The engine's bottom half
    tasklet: Arc<Tasklet>,
    /// Guards the top-half admission check and the interrupt mask
    intr_lock: Mutex<()>,
    /// Owning device
    owner: Weak<DeviceInner>,
}

impl TaskletEntry {
    pub(crate) fn new(ce_id: CeId, tasklet: Arc<Tasklet>, owner: Weak<DeviceInner>) -> Self {
        Self {
            ce_id,
            inited: AtomicBool::new(false),
            hi_tasklet: tasklet.lane() == Lane::High,
            tasklet,
            intr_lock: Mutex::new(()),
            owner,
        }
    }

    /// Engine id
    pub fn ce_id(&self) -> CeId {
        self.ce_id
    }

    /// Whether the entry accepts scheduling
    pub fn is_inited(&self) -> bool {
        self.inited.load(Ordering::Acquire)
    }

    /// Whether the engine uses the high priority lane
    pub fn is_hi_tasklet(&self) -> bool {
        self.hi_tasklet
    }

    /// The engine's tasklet
    pub fn tasklet(&self) -> &Arc<Tasklet> {
        &self.tasklet
    }

    pub(crate) fn set_inited(&self, inited: bool) {
        self.inited.store(inited, Ordering::Release);
    }

    pub(crate) fn lock_intr(&self) -> MutexGuard<'_, ()> {
        self.intr_lock.lock()
    }

    pub(crate) fn owner(&self) -> Option<Arc<DeviceInner>> {
        self.owner.upgrade()
    }
}

impl fmt::Debug for TaskletEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskletEntry")
            .field("ce_id", &self.ce_id)
            .field("inited", &self.is_inited())
            .field("hi_tasklet", &self.hi_tasklet)
            .field("tasklet", &self.tasklet)
            .finish()
    }
}

impl fmt::Display for TaskletEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ce_id={}, inited={}, hi_tasklet_ce={}",
            self.ce_id.raw(),
            u8::from(self.is_inited()),
            u8::from(self.hi_tasklet)
        )
    }
}
