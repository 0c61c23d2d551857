//! # Platform Interfaces
//!
//! The collaborators the dispatch core calls out to. The core never touches
//! hardware itself: masking, line requests, ring servicing and the polling
//! backend all go through these traits.

use alloc::sync::Arc;
use core::fmt;

use hif_hal::{Clock, IrqError, IrqFlags, IrqLine};

use crate::CeId;

/// Interrupt controller glue for copy engine lines
pub trait CeIrqChip: Send + Sync {
    /// Request the engine's line; the platform routes it to
    /// [`CeDevice::handle_irq`](crate::CeDevice::handle_irq) with `ce` as cookie
    fn request_irq(&self, ce: CeId, name: &'static str, flags: IrqFlags) -> Result<(), IrqError>;

    /// Release the engine's line
    fn free_irq(&self, ce: CeId) -> Result<(), IrqError>;

    /// Mask the engine's interrupt source
    fn disable(&self, ce: CeId);

    /// Unmask the engine's interrupt source
    fn enable(&self, ce: CeId);

    /// Copy engine id a delivered line belongs to
    fn line_to_ce(&self, line: IrqLine) -> u32;

    /// CPU the caller is running on
    fn current_cpu(&self) -> usize;
}

/// The target side of the copy engines
pub trait CeTarget: Send + Sync {
    /// Service one engine as far as the ring allows
    ///
    /// Returns `true` if frames are still pending afterwards.
    fn service(&self, ce: CeId) -> bool;

    /// Whether target registers may be touched (false during reset)
    fn register_access_allowed(&self) -> bool {
        true
    }

    /// Stop target-side polling of an engine
    fn disable_polling(&self, _ce: CeId) {}
}

/// Alternate high-throughput receive backend
///
/// When enabled for an engine, admitted interrupts are handed here instead
/// of to the tasklet. The backend retires each admission with
/// [`CeDevice::poll_complete`](crate::CeDevice::poll_complete).
pub trait NapiBackend: Send + Sync {
    /// Whether the engine is serviced by polling
    fn enabled(&self, ce: CeId) -> bool;

    /// Whether a poll is already scheduled for the engine
    fn is_scheduled(&self, ce: CeId) -> bool;

    /// Schedule a poll; `false` if one was already scheduled
    fn schedule(&self, ce: CeId) -> bool;

    /// Interrupt delivery is being enabled or torn down
    fn irq_state_changed(&self, enabled: bool) -> Result<(), i32>;
}

/// Unit-test suspend/resume hook
pub trait TestResume: Send + Sync {
    /// Whether an interrupt on `ce` should wake the target
    fn is_resume_trigger(&self, ce: CeId) -> bool;

    /// Resume the target
    fn resume(&self);
}

/// Bundle of platform collaborators handed to a device at attach
#[derive(Clone)]
pub struct CePlatform {
    /// Interrupt controller
    pub irq: Arc<dyn CeIrqChip>,
    /// Target ring service
    pub target: Arc<dyn CeTarget>,
    /// Monotonic clock
    pub clock: Arc<dyn Clock>,
    /// Optional polling backend
    pub napi: Option<Arc<dyn NapiBackend>>,
    /// Optional unit-test resume hook
    pub test_resume: Option<Arc<dyn TestResume>>,
}

impl CePlatform {
    /// Platform without polling backend or test hooks
    pub fn new(
        irq: Arc<dyn CeIrqChip>,
        target: Arc<dyn CeTarget>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            irq,
            target,
            clock,
            napi: None,
            test_resume: None,
        }
    }

    /// Attach a polling backend
    pub fn with_napi(mut self, napi: Arc<dyn NapiBackend>) -> Self {
        self.napi = Some(napi);
        self
    }

    /// Attach a unit-test resume hook
    pub fn with_test_resume(mut self, hook: Arc<dyn TestResume>) -> Self {
        self.test_resume = Some(hook);
        self
    }
}

impl fmt::Debug for CePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CePlatform")
            .field("napi", &self.napi.is_some())
            .field("test_resume", &self.test_resume.is_some())
            .finish_non_exhaustive()
    }
}
