//! # Tasklet Delay Detection
//!
//! Watches a single copy engine and warns when its tasklet starts long
//! after it was scheduled.

use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::LatencyDetectConfig;
use crate::CeId;

/// Delay detector for one engine
#[derive(Debug)]
pub struct LatencyDetector {
    config: LatencyDetectConfig,
    sched_cpu: AtomicUsize,
    sched_time_us: AtomicU64,
    exec_time_us: AtomicU64,
    detected: AtomicU64,
}

impl LatencyDetector {
    /// Detector for the configured engine and threshold
    pub fn new(config: LatencyDetectConfig) -> Self {
        Self {
            config,
            sched_cpu: AtomicUsize::new(0),
            sched_time_us: AtomicU64::new(0),
            exec_time_us: AtomicU64::new(0),
            detected: AtomicU64::new(0),
        }
    }

    /// Watched engine
    pub fn watched(&self) -> CeId {
        self.config.ce
    }

    /// Tasklet of `ce` was scheduled on `cpu` at `now_us`
    pub fn tasklet_sched(&self, ce: CeId, cpu: usize, now_us: u64) {
        if ce != self.watched() {
            return;
        }
        self.sched_cpu.store(cpu, Ordering::Relaxed);
        self.sched_time_us.store(now_us, Ordering::Release);
    }

    /// Tasklet of `ce` started at `now_us`
    ///
    /// Returns `true` if the delay since scheduling crossed the threshold.
    pub fn tasklet_exec(&self, ce: CeId, now_us: u64) -> bool {
        if ce != self.watched() {
            return false;
        }
        self.exec_time_us.store(now_us, Ordering::Relaxed);

        let sched = self.sched_time_us.load(Ordering::Acquire);
        let delay_us = now_us.saturating_sub(sched);
        if delay_us <= u64::from(self.config.threshold_ms) * 1000 {
            return false;
        }

        self.detected.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "{} tasklet latency {}us exceeds {}ms (scheduled on cpu{})",
            ce,
            delay_us,
            self.config.threshold_ms,
            self.sched_cpu.load(Ordering::Relaxed)
        );
        true
    }

    /// Delays detected so far
    pub fn detected(&self) -> u64 {
        self.detected.load(Ordering::Relaxed)
    }

    /// Last recorded schedule time, in microseconds
    pub fn last_sched_us(&self) -> u64 {
        self.sched_time_us.load(Ordering::Relaxed)
    }

    /// Last recorded execution time, in microseconds
    pub fn last_exec_us(&self) -> u64 {
        self.exec_time_us.load(Ordering::Relaxed)
    }
}
