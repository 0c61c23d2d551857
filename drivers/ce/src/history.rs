//! # Copy Engine Event History
//!
//! A small per-engine ring of recent dispatch events for post-mortem
//! debugging. When full, the oldest event is overwritten.

use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::{CeId, CE_COUNT_MAX};

/// Events kept per engine
pub const HIF_CE_HISTORY_MAX: usize = 32;

/// Dispatch event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CeEventKind {
    /// Interrupt admitted by the top half
    IrqEvent,
    /// Tasklet entered
    TaskletEntry,
    /// Tasklet rescheduled itself
    TaskletReschedule,
    /// Tasklet finished draining
    TaskletExit,
    /// Polled reap started
    ReapEntry,
    /// Polled reap finished
    ReapExit,
}

impl fmt::Display for CeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IrqEvent => "IRQ_EVENT",
            Self::TaskletEntry => "TASKLET_ENTRY",
            Self::TaskletReschedule => "TASKLET_RESCHEDULE",
            Self::TaskletExit => "TASKLET_EXIT",
            Self::ReapEntry => "REAP_ENTRY",
            Self::ReapExit => "REAP_EXIT",
        };
        f.write_str(name)
    }
}

/// One history record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CeEvent {
    /// What happened
    pub kind: CeEventKind,
    /// When, in microseconds
    pub timestamp_us: u64,
    /// CPU it happened on
    pub cpu: usize,
}

impl fmt::Display for CeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (secs, usecs) = hif_hal::split_timestamp_us(self.timestamp_us);
        write!(f, "[{}.{:06}] cpu{} {}", secs, usecs, self.cpu, self.kind)
    }
}

/// Overwriting ring buffer
struct EventRing {
    /// Storage
    buffer: [Option<CeEvent>; HIF_CE_HISTORY_MAX],
    /// Next write position
    write_pos: usize,
    /// Number of valid records
    count: usize,
}

impl EventRing {
    const fn new() -> Self {
        Self {
            buffer: [None; HIF_CE_HISTORY_MAX],
            write_pos: 0,
            count: 0,
        }
    }

    fn push(&mut self, event: CeEvent) {
        self.buffer[self.write_pos] = Some(event);
        self.write_pos = (self.write_pos + 1) % HIF_CE_HISTORY_MAX;
        if self.count < HIF_CE_HISTORY_MAX {
            self.count += 1;
        }
    }

    fn newest_first(&self) -> Vec<CeEvent> {
        (1..=self.count)
            .filter_map(|back| {
                let index = (self.write_pos + HIF_CE_HISTORY_MAX - back) % HIF_CE_HISTORY_MAX;
                self.buffer[index]
            })
            .collect()
    }
}

/// Event history of every engine
pub struct CeHistory {
    rings: [Mutex<EventRing>; CE_COUNT_MAX],
}

impl CeHistory {
    /// Empty history
    pub fn new() -> Self {
        Self {
            rings: core::array::from_fn(|_| Mutex::new(EventRing::new())),
        }
    }

    /// Append an event for `ce`
    pub fn record(&self, ce: CeId, kind: CeEventKind, timestamp_us: u64, cpu: usize) {
        self.rings[ce.index()].lock().push(CeEvent {
            kind,
            timestamp_us,
            cpu,
        });
    }

    /// Events of `ce`, newest first
    pub fn events(&self, ce: CeId) -> Vec<CeEvent> {
        self.rings[ce.index()].lock().newest_first()
    }

    /// Forget everything
    pub fn clear(&self) {
        for ring in &self.rings {
            *ring.lock() = EventRing::new();
        }
    }
}

impl Default for CeHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CeHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeHistory").finish_non_exhaustive()
    }
}
