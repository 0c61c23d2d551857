//! # HIF Copy Engine Dispatch
//!
//! Interrupt-to-tasklet dispatch core for the copy engines (CE) of a WLAN
//! target. Each copy engine is an independent completion ring with its own
//! interrupt source; this crate takes an interrupt from the platform, masks
//! the source, hands the ring to a tasklet and re-arms the source once the
//! ring is drained.
//!
//! ## Components
//!
//! - **Top half** ([`dispatch`]): interrupt context admission and masking
//! - **Scheduler** ([`scheduler`]): counted tasklet scheduling, fallback work
//! - **Bottom half** ([`worker`]): ring draining and re-arm
//! - **Drain** ([`drain`]): quiescence wait, teardown, diagnostic reap
//! - **IRQ** ([`irq`]): batch registration with rollback
//! - **Runtime** ([`softirq`], [`workqueue`]): the deferred-work primitives
//! - **Instrumentation** ([`latency`], [`stats`], [`history`], [`detect`])
//!
//! ## Accounting
//!
//! Every admitted interrupt increments the device's in-flight counter
//! exactly once and exactly one decrement retires it. The counter reaching
//! zero is the quiescence signal the suspend path waits for.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert;

/// Fatal contract check
///
/// Logs the message and aborts the subsystem when `$cond` is false.
macro_rules! ce_bug {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            log::error!($($arg)*);
            panic!($($arg)*);
        }
    };
}

pub mod config;
pub mod detect;
pub mod device;
pub mod dispatch;
pub mod drain;
pub mod entry;
pub mod error;
pub mod history;
pub mod irq;
pub mod latency;
pub mod platform;
pub mod ratelimit;
pub mod scheduler;
pub mod softirq;
pub mod stats;
pub mod worker;
pub mod workqueue;

#[cfg(feature = "std")]
pub mod daemon;

#[cfg(test)]
mod testing;

pub use config::{CeAttr, CeAttrFlags, DispatchConfig, DrainBudget, LatencyDetectConfig};
pub use device::CeDevice;
pub use dispatch::dispatch_interrupt;
pub use entry::TaskletEntry;
pub use error::{CeError, CeResult};
pub use history::{CeEvent, CeEventKind};
pub use platform::{CeIrqChip, CePlatform, CeTarget, NapiBackend, TestResume};
pub use softirq::{Lane, SoftIrq, Tasklet};
pub use stats::CeStatsSnapshot;
pub use workqueue::{Work, WorkQueue};

#[cfg(feature = "std")]
pub use daemon::SoftIrqDaemon;

// =============================================================================
// Limits
// =============================================================================

/// Maximum number of copy engines on a target
pub const CE_COUNT_MAX: usize = 16;

/// CPUs tracked by the per-CPU interrupt counters
pub const MAX_CPUS: usize = 8;

/// Raw latency records kept per copy engine
pub const HIF_REQUESTED_EVENTS: usize = 20;

const_assert!(CE_COUNT_MAX <= 32);
const_assert!(HIF_REQUESTED_EVENTS > 0);

/// Interrupt names, indexed by copy engine
const CE_NAME: [&str; CE_COUNT_MAX] = [
    "WLAN_CE_0",
    "WLAN_CE_1",
    "WLAN_CE_2",
    "WLAN_CE_3",
    "WLAN_CE_4",
    "WLAN_CE_5",
    "WLAN_CE_6",
    "WLAN_CE_7",
    "WLAN_CE_8",
    "WLAN_CE_9",
    "WLAN_CE_10",
    "WLAN_CE_11",
    "WLAN_CE_12",
    "WLAN_CE_13",
    "WLAN_CE_14",
    "WLAN_CE_15",
];

// =============================================================================
// Copy Engine Identity
// =============================================================================

/// Copy engine identifier, always below [`CE_COUNT_MAX`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CeId(u8);

impl CeId {
    /// Create an id, `None` if out of range
    pub const fn new(id: usize) -> Option<Self> {
        if id < CE_COUNT_MAX {
            Some(Self(id as u8))
        } else {
            None
        }
    }

    /// Table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw id
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Interrupt name used when requesting the line
    pub const fn name(self) -> &'static str {
        CE_NAME[self.0 as usize]
    }

    /// Iterate over every possible copy engine id
    pub fn all() -> impl Iterator<Item = CeId> {
        (0..CE_COUNT_MAX).map(|id| CeId(id as u8))
    }
}

impl fmt::Display for CeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CE{}", self.0)
    }
}

bitflags! {
    /// Set of copy engines, one bit per engine
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CeMask: u32 {
        /// Copy engine 0
        const CE0 = 1 << 0;
        /// Copy engine 1
        const CE1 = 1 << 1;
        /// Copy engine 2
        const CE2 = 1 << 2;
        /// Copy engine 3
        const CE3 = 1 << 3;
        /// Copy engine 4
        const CE4 = 1 << 4;
        /// Copy engine 5
        const CE5 = 1 << 5;
        /// Copy engine 6
        const CE6 = 1 << 6;
        /// Copy engine 7
        const CE7 = 1 << 7;
        /// Copy engine 8
        const CE8 = 1 << 8;
        /// Copy engine 9
        const CE9 = 1 << 9;
        /// Copy engine 10
        const CE10 = 1 << 10;
        /// Copy engine 11
        const CE11 = 1 << 11;
        /// Copy engine 12
        const CE12 = 1 << 12;
        /// Copy engine 13
        const CE13 = 1 << 13;
        /// Copy engine 14
        const CE14 = 1 << 14;
        /// Copy engine 15
        const CE15 = 1 << 15;
    }
}

impl CeMask {
    /// Mask holding a single engine
    pub const fn of(ce: CeId) -> Self {
        Self::from_bits_retain(1 << ce.0)
    }

    /// Mask holding engines `0..count`
    pub const fn first(count: usize) -> Self {
        if count >= CE_COUNT_MAX {
            Self::all()
        } else {
            Self::from_bits_retain((1 << count) - 1)
        }
    }

    /// Whether `ce` is in the set
    pub const fn has(self, ce: CeId) -> bool {
        self.bits() & (1 << ce.0) != 0
    }

    /// Engines in the set, lowest id first
    pub fn ids(self) -> impl Iterator<Item = CeId> {
        CeId::all().filter(move |ce| self.has(*ce))
    }
}

impl From<CeId> for CeMask {
    fn from(ce: CeId) -> Self {
        Self::of(ce)
    }
}
