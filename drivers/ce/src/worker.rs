//! # Bottom Half
//!
//! Tasklet body of every engine. One pass services the ring, then either
//! queues another pass (frames still pending) or re-arms the interrupt and
//! retires the admission.
//!
//! ```text
//!            dispatch                      service() == more
//!   Idle ---------------> Draining <-----------------------+
//!    ^                       |                             |
//!    |   enable + retire     |  reschedule (still counted) |
//!    +-----------------------+-----------------------------+
//! ```

use crate::device::DeviceInner;
use crate::history::CeEventKind;
use crate::CeId;

/// Run one tasklet pass for `ce`
pub(crate) fn run(dev: &DeviceInner, ce: CeId) {
    let entry = dev.entry(ce);

    dev.record_event(ce, CeEventKind::TaskletEntry);

    let now = dev.now_us();
    if let Some(latency) = &dev.latency {
        latency.record_exec_entry(ce, now);
    }
    if let Some(detect) = &dev.detect {
        detect.tasklet_exec(ce, now);
    }

    ce_bug!(
        !dev.is_link_suspended(),
        "ce {} tasklet fired after link suspend",
        ce.raw()
    );

    let more = dev.platform.target.service(ce);

    if more && entry.is_inited() {
        // Frames pending: keep the interrupt masked and go again
        if !entry.tasklet().schedule() {
            log::info!("ce_id{} tasklet was scheduled, return", ce.raw());
            dev.dec_active();
            return;
        }

        dev.record_event(ce, CeEventKind::TaskletReschedule);
        let now = dev.now_us();
        if let Some(latency) = &dev.latency {
            latency.update_bucket(ce, now);
        }

        // The new run cannot start before this one returns
        if let Some(detect) = &dev.detect {
            detect.tasklet_sched(ce, dev.current_cpu(), now);
        }
        if dev.config.reset_full_count {
            dev.stats.reset_ring_full(ce);
        }
        if let Some(latency) = &dev.latency {
            latency.record_sched(ce, now);
        }
        return;
    }

    dev.record_event(ce, CeEventKind::TaskletExit);
    if let Some(latency) = &dev.latency {
        latency.update_bucket(ce, dev.now_us());
    }

    let target_reset = dev.target_reset.load(core::sync::atomic::Ordering::Acquire);
    let irqs_freed = dev.free_irq_done.load(core::sync::atomic::Ordering::Acquire);
    if !target_reset && !irqs_freed {
        dev.platform.irq.enable(ce);
    }

    dev.dec_active();
}
