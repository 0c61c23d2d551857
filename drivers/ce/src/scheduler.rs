//! # Tasklet Scheduler
//!
//! Counted scheduling of engine tasklets. Callers increment the device's
//! in-flight counter before calling [`schedule`]; a rejected schedule
//! decrements it again, so every admission is retired exactly once.
//!
//! The fallback work item per engine re-issues a counted schedule from
//! process context.

use alloc::sync::Weak;

use crate::device::DeviceInner;
use crate::entry::TaskletEntry;
use crate::CeId;

/// Whether the engine already has a run pending on its backend
pub(crate) fn is_busy(dev: &DeviceInner, entry: &TaskletEntry) -> bool {
    let ce = entry.ce_id();
    match &dev.platform.napi {
        Some(napi) if napi.enabled(ce) => napi.is_scheduled(ce),
        _ => entry.tasklet().is_scheduled(),
    }
}

/// Schedule the engine's tasklet, retiring the caller's admission on rejection
///
/// Returns `false` if the entry is not initialized or a run is already
/// pending. Safe in interrupt context.
pub(crate) fn schedule(dev: &DeviceInner, entry: &TaskletEntry) -> bool {
    let ce = entry.ce_id();

    if !entry.is_inited() {
        log::debug!("{} tasklet not initialized, return", ce);
        dev.dec_active();
        return false;
    }

    if entry.tasklet().is_scheduled() {
        log::debug!("{} tasklet scheduled, return", ce);
        dev.dec_active();
        return false;
    }

    // Stamp before queueing: another executor may pick the run up at once
    let now = dev.now_us();
    if let Some(detect) = &dev.detect {
        detect.tasklet_sched(ce, dev.current_cpu(), now);
    }
    if let Some(latency) = &dev.latency {
        latency.record_sched(ce, now);
    }

    if !entry.tasklet().schedule() {
        log::debug!("{} tasklet schedule lost, return", ce);
        dev.dec_active();
        return false;
    }

    if dev.config.reset_full_count {
        dev.stats.reset_ring_full(ce);
    }
    true
}

/// Make sure the engine's tasklet will not run again until revived
///
/// Blocks while the tasklet is running.
pub(crate) fn cancel(entry: &TaskletEntry) {
    entry.tasklet().kill();
}

/// Fallback work body for engine `ce`
pub(crate) fn reschedule_work_handler(owner: &Weak<DeviceInner>, ce: CeId) {
    let Some(dev) = owner.upgrade() else {
        log::error!("{} reschedule work: device is gone", ce);
        return;
    };

    if !dev.init_done.load(core::sync::atomic::Ordering::Acquire) {
        log::error!("wlan driver is unloaded");
        return;
    }

    let entry = dev.entry(ce);
    if entry.is_inited() {
        dev.inc_active();
        schedule(&dev, entry);
    }
}
