//! # Copy Engine Statistics
//!
//! Interrupt counters per engine and CPU, ring-full counters, and an owned
//! snapshot that renders the classic statistics dump.

use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::latency::{ChannelLatency, LatencyTracker};
use crate::{CeId, CE_COUNT_MAX, MAX_CPUS};

/// Live counters
pub struct CeStats {
    per_cpu: [[AtomicU32; MAX_CPUS]; CE_COUNT_MAX],
    ring_full: [AtomicU32; CE_COUNT_MAX],
}

impl CeStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self {
            per_cpu: core::array::from_fn(|_| core::array::from_fn(|_| AtomicU32::new(0))),
            ring_full: core::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    /// Count one interrupt taken on `cpu`
    ///
    /// CPUs beyond [`MAX_CPUS`] are not tracked.
    pub fn increment_interrupt(&self, ce: CeId, cpu: usize) {
        if let Some(counter) = self.per_cpu[ce.index()].get(cpu) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Interrupts taken by `ce` on `cpu`
    pub fn interrupts(&self, ce: CeId, cpu: usize) -> u32 {
        self.per_cpu[ce.index()]
            .get(cpu)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Interrupts taken by `ce` on every CPU
    pub fn total_interrupts(&self, ce: CeId) -> u64 {
        self.per_cpu[ce.index()]
            .iter()
            .map(|c| u64::from(c.load(Ordering::Relaxed)))
            .sum()
    }

    /// The ring of `ce` was found full
    pub fn record_ring_full(&self, ce: CeId) {
        self.ring_full[ce.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Forget ring-full events of `ce`
    pub fn reset_ring_full(&self, ce: CeId) {
        self.ring_full[ce.index()].store(0, Ordering::Relaxed);
    }

    /// Ring-full events of `ce`
    pub fn ring_full(&self, ce: CeId) -> u32 {
        self.ring_full[ce.index()].load(Ordering::Relaxed)
    }

    /// Zero every counter
    pub fn clear(&self) {
        for row in &self.per_cpu {
            for counter in row {
                counter.store(0, Ordering::Relaxed);
            }
        }
        for counter in &self.ring_full {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Copy the counters, and the latency state if one is kept
    pub fn snapshot(&self, latency: Option<&LatencyTracker>) -> CeStatsSnapshot {
        let mut per_cpu = [[0u32; MAX_CPUS]; CE_COUNT_MAX];
        let mut ring_full = [0u32; CE_COUNT_MAX];

        for ce in CeId::all() {
            for (cpu, slot) in per_cpu[ce.index()].iter_mut().enumerate() {
                *slot = self.interrupts(ce, cpu);
            }
            ring_full[ce.index()] = self.ring_full(ce);
        }

        CeStatsSnapshot {
            per_cpu,
            ring_full,
            latency: latency.map(|tracker| CeId::all().map(|ce| tracker.channel(ce)).collect()),
        }
    }
}

impl Default for CeStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CeStats").finish_non_exhaustive()
    }
}

/// Point-in-time copy of the statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CeStatsSnapshot {
    /// Interrupts per engine and CPU
    pub per_cpu: [[u32; MAX_CPUS]; CE_COUNT_MAX],
    /// Ring-full events per engine
    pub ring_full: [u32; CE_COUNT_MAX],
    /// Latency state per engine, when latency stats are enabled
    pub latency: Option<Vec<ChannelLatency>>,
}

impl CeStatsSnapshot {
    /// Interrupts taken by `ce` on every CPU
    pub fn total_interrupts(&self, ce: CeId) -> u64 {
        self.per_cpu[ce.index()].iter().map(|&c| u64::from(c)).sum()
    }
}

impl fmt::Display for CeStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CE interrupt statistics:")?;
        for (ce, row) in self.per_cpu.iter().enumerate() {
            write!(f, "CE id[{:2}] - ", ce)?;
            for (cpu, count) in row.iter().enumerate() {
                write!(f, "[{}]:{} ", cpu, count)?;
            }
            writeln!(f)?;
        }

        if let Some(latency) = &self.latency {
            writeln!(f, "\tCE TASKLET ARRIVAL AND EXECUTION STATS")?;
            for (ce, channel) in latency.iter().enumerate() {
                channel.write_report(f, ce)?;
            }
        }
        Ok(())
    }
}
