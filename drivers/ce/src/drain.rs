//! # Drain and Teardown
//!
//! Suspend and unload paths. These run in process context and are the only
//! dispatch operations allowed to sleep or block.

use core::sync::atomic::Ordering;

use crate::config::DrainBudget;
use crate::device::DeviceInner;
use crate::error::{CeError, CeResult};
use crate::history::CeEventKind;
use crate::scheduler;

/// Poll the in-flight counter until it reaches zero or the budget runs out
///
/// Sleeps `interval_ms` between polls and gives up after `wait_count`
/// sleeps.
pub(crate) fn drain_tasklets(dev: &DeviceInner, budget: DrainBudget) -> CeResult<()> {
    let mut wait_cnt = 0u32;

    loop {
        let outstanding = dev.active();
        if outstanding == 0 {
            return Ok(());
        }

        if wait_cnt >= budget.wait_count {
            log::error!("CE still not done with access: {}", outstanding);
            return Err(CeError::DrainTimeout { outstanding });
        }
        wait_cnt += 1;

        log::info!("Waiting for CE to finish access");
        dev.platform.clock.sleep_ms(budget.interval_ms);
    }
}

/// Stop every initialized engine, then force the in-flight counter to zero
pub(crate) fn kill_tasklets(dev: &DeviceInner) {
    for entry in &dev.entries {
        if !entry.is_inited() {
            continue;
        }

        {
            let _intr = entry.lock_intr();
            entry.set_inited(false);
        }

        // Work first: it could otherwise schedule the tasklet after the kill
        dev.reschedule_work[entry.ce_id().index()].cancel_sync();
        scheduler::cancel(entry);
    }

    dev.active_tasklet_cnt.store(0, Ordering::Release);
}

/// Service the firmware diagnostic engine once by polling
///
/// Meant for bus suspend, after interrupts are disabled and tasklets are
/// drained. Succeeds without doing anything when no engine carries
/// diagnostics.
pub(crate) fn drain_fw_diag_ce(dev: &DeviceInner) -> CeResult<()> {
    let Some(ce) = dev.config.fw_diag_ce() else {
        return Ok(());
    };

    if let Some(latency) = &dev.latency {
        latency.record_exec_entry(ce, dev.now_us());
    }
    dev.record_event(ce, CeEventKind::ReapEntry);

    if dev.platform.target.service(ce) {
        log::warn!("{} frames still pending after reap", ce);
        return Err(CeError::ReapBusy { ce });
    }

    dev.record_event(ce, CeEventKind::ReapExit);
    if let Some(latency) = &dev.latency {
        latency.update_bucket(ce, dev.now_us());
    }
    Ok(())
}

/// Log every dispatch entry
pub(crate) fn dump_entries(dev: &DeviceInner) {
    for (i, entry) in dev.entries.iter().enumerate() {
        log::info!("{:02}: {}", i, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CeAttr, CeAttrFlags, DispatchConfig};
    use crate::testing::Harness;
    use crate::{CeId, CeMask};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn ce(id: usize) -> CeId {
        CeId::new(id).unwrap()
    }

    #[test]
    fn test_drain_when_idle() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));

        assert_eq!(dev.drain_tasklets(), Ok(()));
        assert_eq!(harness.clock.sleeps(), 0);
    }

    #[test]
    fn test_drain_times_out_after_budget() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));

        let err = dev.drain_all(DrainBudget::default()).unwrap_err();
        assert_eq!(err, CeError::DrainTimeout { outstanding: 1 });
        assert_eq!(harness.clock.sleeps(), 20);
        assert_eq!(harness.clock.slept_ms(), 200);
    }

    #[test]
    fn test_drain_custom_budget() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));
        dev.dispatch_interrupt(4, ce(4));

        let err = dev.drain_all(DrainBudget::new(3, 7)).unwrap_err();
        assert_eq!(err, CeError::DrainTimeout { outstanding: 2 });
        assert_eq!(harness.clock.sleeps(), 3);
        assert_eq!(harness.clock.slept_ms(), 21);
    }

    #[test]
    fn test_drain_zero_budget_fails_without_sleeping() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));

        let err = dev.drain_all(DrainBudget::new(0, 10)).unwrap_err();
        assert_eq!(err, CeError::DrainTimeout { outstanding: 1 });
        assert_eq!(harness.clock.sleeps(), 0);
    }

    #[test]
    fn test_drain_unbounded_budget() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));

        let softirq = Arc::clone(dev.softirq());
        let sleeps = harness.clock.clone();
        harness.clock.on_sleep(move || {
            if sleeps.sleeps() == 3 {
                softirq.run();
            }
        });

        assert_eq!(dev.drain_all(DrainBudget::new(u32::MAX, 1)), Ok(()));
        assert_eq!(harness.clock.sleeps(), 3);
    }

    #[test]
    fn test_drain_completes_when_worker_runs() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));

        let softirq = Arc::clone(dev.softirq());
        harness.clock.on_sleep(move || {
            softirq.run();
        });

        assert_eq!(dev.drain_tasklets(), Ok(()));
        assert_eq!(harness.clock.sleeps(), 1);
    }

    #[test]
    fn test_teardown_resets_state() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.dispatch_interrupt(3, ce(3));
        dev.dispatch_interrupt(7, ce(7));

        dev.teardown();

        assert_eq!(dev.active_tasklet_count(), 0);
        for id in CeId::all() {
            assert!(!dev.is_initialized(id));
            assert!(!dev.is_scheduled(id));
        }
        assert_eq!(dev.softirq().run(), 0);
        assert_eq!(harness.target.services(ce(3)), 0);
    }

    #[test]
    fn test_reinit_after_teardown() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));
        dev.teardown();
        dev.init(CeMask::first(12));

        dev.dispatch_interrupt(3, ce(3));
        assert!(dev.is_scheduled(ce(3)));
        assert_eq!(dev.softirq().run(), 1);
        assert_eq!(dev.active_tasklet_count(), 0);
    }

    #[test]
    fn test_teardown_waits_for_running_worker() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        dev.init(CeMask::first(12));

        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        {
            let entered = Arc::clone(&entered);
            let release = Arc::clone(&release);
            harness.target.on_service(ce(2), move || {
                entered.wait();
                release.wait();
            });
        }
        harness.target.script(ce(2), &[true]);

        dev.dispatch_interrupt(2, ce(2));

        let softirq = Arc::clone(dev.softirq());
        let worker = thread::spawn(move || softirq.run());
        entered.wait();

        let teardown_dev = dev.clone();
        let teardown = thread::spawn(move || teardown_dev.teardown());

        // Teardown cannot finish while the worker is inside service()
        while dev.is_initialized(ce(2)) {
            thread::yield_now();
        }
        assert!(!teardown.is_finished());
        assert!(dev.entry(ce(2)).tasklet().is_running());

        release.wait();
        teardown.join().unwrap();
        assert_eq!(worker.join().unwrap(), 1);

        assert_eq!(dev.active_tasklet_count(), 0);
        assert!(!dev.is_initialized(ce(2)));
        assert!(!dev.is_scheduled(ce(2)));
    }

    #[test]
    fn test_fw_diag_reap() {
        let harness = Harness::new();
        let diag = ce(7);
        let config = DispatchConfig::default()
            .with_attr(diag, CeAttr::new(CeAttrFlags::DIAG))
            .with_latency_stats(true);
        let dev = harness.device(config);
        dev.init(CeMask::first(12));

        assert_eq!(dev.drain_fw_diag_ce(), Ok(()));
        assert_eq!(harness.target.services(diag), 1);
        let kinds: alloc::vec::Vec<_> = dev.history(diag).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [CeEventKind::ReapExit, CeEventKind::ReapEntry]);

        harness.target.script(diag, &[true]);
        assert_eq!(dev.drain_fw_diag_ce(), Err(CeError::ReapBusy { ce: diag }));
    }

    #[test]
    fn test_fw_diag_reap_without_diag_engine() {
        let harness = Harness::new();
        let dev = harness.device(DispatchConfig::default());
        assert_eq!(dev.drain_fw_diag_ce(), Ok(()));
        assert_eq!(harness.target.total_services(), 0);
    }
}
