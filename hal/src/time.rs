//! # Time
//!
//! Monotonic clock abstraction used for latency bookkeeping and for the
//! bounded waits of suspend paths.

/// Microseconds per second
pub const USEC_PER_SEC: u64 = 1_000_000;

/// Monotonic time source
///
/// `now_us` must never go backwards. `sleep_ms` may block and is only called
/// from contexts where blocking is permitted.
pub trait Clock: Send + Sync {
    /// Current monotonic time in microseconds
    fn now_us(&self) -> u64;

    /// Block the calling context for roughly `ms` milliseconds
    fn sleep_ms(&self, ms: u32);
}

/// Split a microsecond timestamp into whole seconds and the remainder
pub const fn split_timestamp_us(ts_us: u64) -> (u64, u64) {
    (ts_us / USEC_PER_SEC, ts_us % USEC_PER_SEC)
}
