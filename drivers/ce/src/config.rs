//! # Dispatch Configuration
//!
//! Everything that varies between targets is chosen here at attach time:
//! engine count, drain budget and the optional instrumentation layers.

use bitflags::bitflags;

use crate::{CeId, CE_COUNT_MAX};

/// Default number of copy engines in use
pub const DEFAULT_CE_COUNT: usize = 12;

/// Default number of drain polls before giving up
pub const HIF_CE_DRAIN_WAIT_CNT: u32 = 20;

/// Default sleep between drain polls
pub const HIF_CE_DRAIN_WAIT_MS: u32 = 10;

/// Copy engine watched by latency detection unless told otherwise
pub const DEFAULT_DETECT_CE: u8 = 2;

// =============================================================================
// Per-Engine Attributes
// =============================================================================

bitflags! {
    /// Host-side copy engine attribute flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CeAttrFlags: u32 {
        /// Service this engine from the high priority tasklet lane
        const HI_TASKLET = 1 << 0;
        /// Engine carries firmware diagnostic logs
        const DIAG       = 1 << 2;
    }
}

/// Host configuration of one copy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CeAttr {
    /// Attribute flags
    pub flags: CeAttrFlags,
}

impl CeAttr {
    /// Attribute with the given flags
    pub const fn new(flags: CeAttrFlags) -> Self {
        Self { flags }
    }

    /// Whether the engine uses the high priority lane
    pub const fn hi_tasklet(&self) -> bool {
        self.flags.contains(CeAttrFlags::HI_TASKLET)
    }
}

// =============================================================================
// Drain Budget
// =============================================================================

/// Bounded wait used when draining tasklets before suspend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
    /// Polls allowed after the first one
    pub wait_count: u32,
    /// Sleep between polls, in milliseconds
    pub interval_ms: u32,
}

impl DrainBudget {
    /// Budget with an explicit retry count and interval
    pub const fn new(wait_count: u32, interval_ms: u32) -> Self {
        Self {
            wait_count,
            interval_ms,
        }
    }

    /// Worst case time spent waiting, in milliseconds
    pub const fn max_wait_ms(&self) -> u64 {
        self.wait_count as u64 * self.interval_ms as u64
    }
}

impl Default for DrainBudget {
    fn default() -> Self {
        Self::new(HIF_CE_DRAIN_WAIT_CNT, HIF_CE_DRAIN_WAIT_MS)
    }
}

// =============================================================================
// Latency Detection
// =============================================================================

/// Tasklet delay detection on a single copy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyDetectConfig {
    /// Engine to watch
    pub ce: CeId,
    /// Delay between schedule and execution that triggers a warning
    pub threshold_ms: u32,
}

impl Default for LatencyDetectConfig {
    fn default() -> Self {
        Self {
            ce: CeId(DEFAULT_DETECT_CE),
            threshold_ms: 2000,
        }
    }
}

// =============================================================================
// Dispatch Configuration
// =============================================================================

/// Attach-time configuration of the dispatch core
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of copy engines in use (at most [`CE_COUNT_MAX`])
    pub ce_count: usize,
    /// Host attributes, indexed by copy engine
    pub attrs: [CeAttr; CE_COUNT_MAX],
    /// Drain wait used by suspend
    pub drain: DrainBudget,
    /// Keep per-engine tasklet latency buckets
    pub latency_stats: bool,
    /// Clear the ring-full counter whenever a tasklet is scheduled
    pub reset_full_count: bool,
    /// Optional tasklet delay detection
    pub latency_detect: Option<LatencyDetectConfig>,
    /// Mismatch errors allowed per rate limit window
    pub mismatch_log_burst: u32,
    /// Rate limit window for mismatch errors, in milliseconds
    pub mismatch_log_interval_ms: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            ce_count: DEFAULT_CE_COUNT,
            attrs: [CeAttr::default(); CE_COUNT_MAX],
            drain: DrainBudget::default(),
            latency_stats: false,
            reset_full_count: false,
            latency_detect: None,
            mismatch_log_burst: 10,
            mismatch_log_interval_ms: 5000,
        }
    }
}

impl DispatchConfig {
    /// Set the number of copy engines in use
    pub fn with_ce_count(mut self, ce_count: usize) -> Self {
        self.ce_count = ce_count;
        self
    }

    /// Set the attributes of one engine
    pub fn with_attr(mut self, ce: CeId, attr: CeAttr) -> Self {
        self.attrs[ce.index()] = attr;
        self
    }

    /// Set the drain budget
    pub fn with_drain(mut self, drain: DrainBudget) -> Self {
        self.drain = drain;
        self
    }

    /// Enable or disable latency buckets
    pub fn with_latency_stats(mut self, enabled: bool) -> Self {
        self.latency_stats = enabled;
        self
    }

    /// Enable or disable ring-full counter reset on schedule
    pub fn with_reset_full_count(mut self, enabled: bool) -> Self {
        self.reset_full_count = enabled;
        self
    }

    /// Enable tasklet delay detection
    pub fn with_latency_detect(mut self, detect: LatencyDetectConfig) -> Self {
        self.latency_detect = Some(detect);
        self
    }

    /// Engine carrying firmware diagnostics, if any engine in use has one
    pub fn fw_diag_ce(&self) -> Option<CeId> {
        CeId::all()
            .take(self.ce_count)
            .find(|ce| self.attrs[ce.index()].flags.contains(CeAttrFlags::DIAG))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.ce_count, DEFAULT_CE_COUNT);
        assert_eq!(config.drain.wait_count, 20);
        assert_eq!(config.drain.interval_ms, 10);
        assert!(!config.latency_stats);
        assert!(config.latency_detect.is_none());
    }

    #[test]
    fn test_drain_budget_max_wait() {
        assert_eq!(DrainBudget::default().max_wait_ms(), 200);
        assert_eq!(DrainBudget::new(3, 7).max_wait_ms(), 21);
    }

    #[test]
    fn test_fw_diag_lookup() {
        let diag = CeId::new(7).unwrap();
        let config = DispatchConfig::default()
            .with_attr(diag, CeAttr::new(CeAttrFlags::DIAG));
        assert_eq!(config.fw_diag_ce(), Some(diag));

        let config = config.with_ce_count(4);
        assert_eq!(config.fw_diag_ce(), None);
    }

    #[test]
    fn test_hi_tasklet_attr() {
        assert!(CeAttr::new(CeAttrFlags::HI_TASKLET | CeAttrFlags::DIAG).hi_tasklet());
        assert!(!CeAttr::default().hi_tasklet());
    }
}
