//! # Host Executor
//!
//! Runs tasklets and fallback work on OS threads. Each thread parks until
//! the queues are raised, then services the tasklet lanes until they are
//! empty. Only the first thread runs the work queue, so work items keep
//! their FIFO order.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use std::io;
use std::sync::{Condvar, Mutex};
use std::thread::{self, JoinHandle};

use crate::softirq::SoftIrq;
use crate::workqueue::WorkQueue;
use crate::CeDevice;

/// Upper bound on executor threads
pub const MAX_DAEMON_THREADS: usize = 8;

struct Shared {
    softirq: Arc<SoftIrq>,
    workqueue: Arc<WorkQueue>,
    raised: Mutex<u64>,
    wake: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn raise(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(|e| e.into_inner());
        *raised = raised.wrapping_add(1);
        self.wake.notify_all();
    }

    /// Block until raised past `seen`; `None` once stopped
    fn wait(&self, seen: u64) -> Option<u64> {
        let mut raised = self.raised.lock().unwrap_or_else(|e| e.into_inner());
        while *raised == seen && !self.stop.load(Ordering::Acquire) {
            raised = self.wake.wait(raised).unwrap_or_else(|e| e.into_inner());
        }
        if self.stop.load(Ordering::Acquire) {
            None
        } else {
            Some(*raised)
        }
    }

    fn idle(&self, runs_work: bool) -> bool {
        !self.softirq.has_pending() && (!runs_work || self.workqueue.pending() == 0)
    }

    fn work_loop(&self, runs_work: bool) {
        let mut seen = 0;
        while let Some(raised) = self.wait(seen) {
            seen = raised;
            loop {
                self.softirq.run();
                if runs_work {
                    self.workqueue.run();
                }
                if self.idle(runs_work) || self.stop.load(Ordering::Acquire) {
                    break;
                }
                thread::yield_now();
            }
        }
    }
}

/// Thread pool servicing one set of tasklet and work queues
pub struct SoftIrqDaemon {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl SoftIrqDaemon {
    /// Start `workers` threads (clamped to `1..=MAX_DAEMON_THREADS`)
    pub fn spawn(
        softirq: Arc<SoftIrq>,
        workqueue: Arc<WorkQueue>,
        workers: usize,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            softirq,
            workqueue,
            raised: Mutex::new(0),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let mut daemon = Self {
            shared: Arc::clone(&shared),
            threads: Vec::new(),
        };

        for id in 0..workers.clamp(1, MAX_DAEMON_THREADS) {
            let worker = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(alloc::format!("ce-softirq/{}", id))
                .spawn(move || worker.work_loop(id == 0));
            match handle {
                Ok(handle) => daemon.threads.push(handle),
                Err(err) => {
                    daemon.stop();
                    return Err(err);
                },
            }
        }

        let hook = Arc::downgrade(&shared);
        shared.softirq.set_raise_hook(raise_hook(hook.clone()));
        shared.workqueue.set_raise_hook(raise_hook(hook));

        // Pick up anything queued before the hooks were installed
        shared.raise();

        log::debug!("softirq daemon started: {} threads", daemon.threads.len());
        Ok(daemon)
    }

    /// Start an executor for a device's queues
    pub fn for_device(dev: &CeDevice, workers: usize) -> io::Result<Self> {
        Self::spawn(Arc::clone(dev.softirq()), Arc::clone(dev.workqueue()), workers)
    }

    /// Number of running threads
    pub fn threads(&self) -> usize {
        self.threads.len()
    }

    /// Stop and join every thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.softirq.clear_raise_hook();
        self.shared.workqueue.clear_raise_hook();
        self.shared.stop.store(true, Ordering::Release);
        self.shared.raise();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("softirq daemon thread panicked");
            }
        }
    }
}

fn raise_hook(shared: Weak<Shared>) -> crate::softirq::RaiseHook {
    Arc::new(move || {
        if let Some(shared) = shared.upgrade() {
            shared.raise();
        }
    })
}

impl Drop for SoftIrqDaemon {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.stop();
        }
    }
}

impl fmt::Debug for SoftIrqDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftIrqDaemon")
            .field("threads", &self.threads.len())
            .field("stopped", &self.shared.stop.load(Ordering::Relaxed))
            .finish()
    }
}
