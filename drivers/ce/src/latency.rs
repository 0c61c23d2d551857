//! # Tasklet Latency Buckets
//!
//! Per-engine histograms of two quantities:
//!
//! - **sched**: time from tasklet schedule to tasklet entry
//! - **exec**: time from tasklet entry to the bucket update
//!
//! Each histogram has six fixed buckets. Bucket counts only grow until an
//! explicit clear. The last [`HIF_REQUESTED_EVENTS`] raw samples are kept in
//! a ring that overwrites the oldest entry.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{CeId, CE_COUNT_MAX, HIF_REQUESTED_EVENTS};

/// Number of latency buckets
pub const CE_BUCKET_MAX: usize = 6;

/// Latency bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LatencyBucket {
    /// Up to 0.5 ms
    Us500 = 0,
    /// 0.5 ms to 1 ms
    Ms1 = 1,
    /// 1 ms to 2 ms
    Ms2 = 2,
    /// 2 ms to 5 ms
    Ms5 = 3,
    /// 5 ms to 10 ms
    Ms10 = 4,
    /// Above 10 ms
    Beyond = 5,
}

impl LatencyBucket {
    /// All buckets, shortest first
    pub const ALL: [LatencyBucket; CE_BUCKET_MAX] = [
        Self::Us500,
        Self::Ms1,
        Self::Ms2,
        Self::Ms5,
        Self::Ms10,
        Self::Beyond,
    ];

    /// Bucket for a duration in microseconds
    ///
    /// Millisecond thresholds compare whole milliseconds, so 2999 us still
    /// lands in [`Ms2`](Self::Ms2).
    pub const fn classify(us: u64) -> Self {
        let ms = us / 1000;
        if ms > 10 {
            Self::Beyond
        } else if ms > 5 {
            Self::Ms10
        } else if ms > 2 {
            Self::Ms5
        } else if ms > 1 {
            Self::Ms2
        } else if us > 500 {
            Self::Ms1
        } else {
            Self::Us500
        }
    }

    /// Table index
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Range label used in the statistics dump
    pub const fn label(self) -> &'static str {
        match self {
            Self::Us500 => "0 - 0.5",
            Self::Ms1 => "0.5 - 1",
            Self::Ms2 => "1  -  2",
            Self::Ms5 => "2  -  5",
            Self::Ms10 => "5  - 10",
            Self::Beyond => "  >  10",
        }
    }
}

/// One histogram bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounter {
    /// Samples that fell in this bucket
    pub count: u64,
    /// Timestamp of the last sample, in microseconds
    pub last_update_us: u64,
}

impl BucketCounter {
    fn hit(&mut self, now_us: u64) {
        self.count += 1;
        self.last_update_us = now_us;
    }
}

/// One raw sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyRecord {
    /// Execution time, in microseconds
    pub exec_us: u64,
    /// Schedule-to-entry time, in microseconds
    pub sched_us: u64,
}

/// Latency state of one engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLatency {
    /// Execution time histogram
    pub exec: [BucketCounter; CE_BUCKET_MAX],
    /// Schedule-to-entry histogram
    pub sched: [BucketCounter; CE_BUCKET_MAX],
    /// Raw samples
    pub records: [LatencyRecord; HIF_REQUESTED_EVENTS],
    /// Slot of the newest sample
    pub record_index: usize,
}

impl Default for ChannelLatency {
    fn default() -> Self {
        Self {
            exec: [BucketCounter::default(); CE_BUCKET_MAX],
            sched: [BucketCounter::default(); CE_BUCKET_MAX],
            records: [LatencyRecord::default(); HIF_REQUESTED_EVENTS],
            record_index: 0,
        }
    }
}

impl ChannelLatency {
    fn update(&mut self, record: LatencyRecord, now_us: u64) {
        self.record_index = (self.record_index + 1) % HIF_REQUESTED_EVENTS;
        self.records[self.record_index] = record;

        self.exec[LatencyBucket::classify(record.exec_us).index()].hit(now_us);
        self.sched[LatencyBucket::classify(record.sched_us).index()].hit(now_us);
    }

    /// Count in one execution bucket
    pub fn exec_count(&self, bucket: LatencyBucket) -> u64 {
        self.exec[bucket.index()].count
    }

    /// Count in one schedule bucket
    pub fn sched_count(&self, bucket: LatencyBucket) -> u64 {
        self.sched[bucket.index()].count
    }

    /// Every ring slot, newest first
    pub fn records_newest_first(&self) -> impl Iterator<Item = LatencyRecord> + '_ {
        (0..HIF_REQUESTED_EVENTS).map(move |back| {
            let index = (self.record_index + HIF_REQUESTED_EVENTS - back) % HIF_REQUESTED_EVENTS;
            self.records[index]
        })
    }

    /// Write the bucket tables and records of engine `ce`
    pub(crate) fn write_report(&self, f: &mut fmt::Formatter<'_>, ce: usize) -> fmt::Result {
        writeln!(f, "\n\t\tCE Ring {} Tasklet Execution Bucket", ce)?;
        for bucket in LatencyBucket::ALL {
            let counter = self.exec[bucket.index()];
            let (secs, usecs) = hif_hal::split_timestamp_us(counter.last_update_us);
            writeln!(
                f,
                "\t Bucket {}ms :{}\t last update:{:>8}.{:06}",
                bucket.label(),
                counter.count,
                secs,
                usecs
            )?;
        }

        writeln!(f, "\n\t\tCE Ring {} Tasklet Scheduled Bucket", ce)?;
        for bucket in LatencyBucket::ALL {
            let counter = self.sched[bucket.index()];
            let (secs, usecs) = hif_hal::split_timestamp_us(counter.last_update_us);
            writeln!(
                f,
                "\t Bucket {}ms :{}\t last update :{:>8}.{:06}",
                bucket.label(),
                counter.count,
                secs,
                usecs
            )?;
        }

        writeln!(f, "\n\t\t CE RING {} Last {} time records", ce, HIF_REQUESTED_EVENTS)?;
        for record in self.records_newest_first() {
            writeln!(
                f,
                "\tExecution time: {}us Total Scheduled time: {}us",
                record.exec_us, record.sched_us
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Latency state of every engine
///
/// Entry timestamps are atomics because the schedule side runs in interrupt
/// context. Histograms sit behind a lock only the bottom half and readers
/// take.
pub struct LatencyTracker {
    sched_entry_us: [AtomicU64; CE_COUNT_MAX],
    exec_entry_us: [AtomicU64; CE_COUNT_MAX],
    channels: [Mutex<ChannelLatency>; CE_COUNT_MAX],
}

impl LatencyTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self {
            sched_entry_us: core::array::from_fn(|_| AtomicU64::new(0)),
            exec_entry_us: core::array::from_fn(|_| AtomicU64::new(0)),
            channels: core::array::from_fn(|_| Mutex::new(ChannelLatency::default())),
        }
    }

    /// The engine's tasklet was scheduled at `now_us`
    pub fn record_sched(&self, ce: CeId, now_us: u64) {
        self.sched_entry_us[ce.index()].store(now_us, Ordering::Relaxed);
    }

    /// The engine's tasklet was entered at `now_us`
    pub fn record_exec_entry(&self, ce: CeId, now_us: u64) {
        self.exec_entry_us[ce.index()].store(now_us, Ordering::Relaxed);
    }

    /// Close one tasklet pass at `now_us` and bucket its sample
    pub fn update_bucket(&self, ce: CeId, now_us: u64) -> LatencyRecord {
        let exec_entry = self.exec_entry_us[ce.index()].load(Ordering::Relaxed);
        let sched_entry = self.sched_entry_us[ce.index()].load(Ordering::Relaxed);

        let record = LatencyRecord {
            exec_us: now_us.saturating_sub(exec_entry),
            sched_us: exec_entry.saturating_sub(sched_entry),
        };
        self.channels[ce.index()].lock().update(record, now_us);
        record
    }

    /// Copy of one engine's state
    pub fn channel(&self, ce: CeId) -> ChannelLatency {
        self.channels[ce.index()].lock().clone()
    }

    /// Reset every engine
    pub fn clear(&self) {
        for ce in CeId::all() {
            self.sched_entry_us[ce.index()].store(0, Ordering::Relaxed);
            self.exec_entry_us[ce.index()].store(0, Ordering::Relaxed);
            *self.channels[ce.index()].lock() = ChannelLatency::default();
        }
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatencyTracker").finish_non_exhaustive()
    }
}
