//! # Log Rate Limiting
//!
//! Token bucket that refills once per window. Used to keep interrupt
//! context error messages from flooding the log.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

/// Token bucket state
#[derive(Debug, Clone)]
struct TokenBucket {
    /// Tokens granted per window
    capacity: u32,
    /// Tokens left in the current window
    tokens: u32,
    /// Window start (us); zero before the first check
    window_start_us: u64,
    /// Checks refused in the current window
    suppressed: u64,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            capacity,
            tokens: capacity,
            window_start_us: 0,
            suppressed: 0,
        }
    }

    /// Start a new window if the current one expired; returns the
    /// suppressed count of the window that ended
    fn refill(&mut self, now_us: u64, window_us: u64) -> u64 {
        if self.window_start_us == 0 {
            self.window_start_us = now_us.max(1);
            return 0;
        }

        if now_us.saturating_sub(self.window_start_us) < window_us {
            return 0;
        }

        self.window_start_us = now_us.max(1);
        self.tokens = self.capacity;
        core::mem::take(&mut self.suppressed)
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            self.suppressed += 1;
            false
        }
    }
}

/// Rate limiter for one message site
pub struct RateLimit {
    name: &'static str,
    window_us: u64,
    bucket: Mutex<TokenBucket>,
    suppressed_total: AtomicU64,
}

impl RateLimit {
    /// Allow `burst` messages per `interval_ms`
    pub fn new(name: &'static str, burst: u32, interval_ms: u32) -> Self {
        Self {
            name,
            window_us: u64::from(interval_ms) * 1000,
            bucket: Mutex::new(TokenBucket::new(burst)),
            suppressed_total: AtomicU64::new(0),
        }
    }

    /// Whether a message may be emitted at `now_us`
    ///
    /// Never blocks: contention on the bucket counts as suppression.
    pub fn check(&self, now_us: u64) -> bool {
        let Some(mut bucket) = self.bucket.try_lock() else {
            self.suppressed_total.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let missed = bucket.refill(now_us, self.window_us);
        if missed > 0 {
            log::warn!("{}: {} callbacks suppressed", self.name, missed);
        }

        let allowed = bucket.try_consume();
        if !allowed {
            self.suppressed_total.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Messages refused since creation
    pub fn suppressed(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimit")
            .field("name", &self.name)
            .field("window_us", &self.window_us)
            .field("suppressed", &self.suppressed())
            .finish()
    }
}
