//! # Top Half
//!
//! Interrupt context admission. The handler never blocks: it validates the
//! engine, checks under the entry's interrupt lock whether a run is already
//! pending, masks the source and hands the engine to the polling backend or
//! the tasklet scheduler.
//!
//! Each admission increments the device's in-flight counter once. The
//! matching decrement happens wherever that admission is retired.

use hif_hal::IrqReturn;

use crate::device::DeviceInner;
use crate::drain;
use crate::entry::TaskletEntry;
use crate::history::CeEventKind;
use crate::scheduler;

/// Dispatch an interrupt for `entry`, given the engine id its line resolved to
///
/// This is the form used when only the registration cookie is at hand.
pub fn dispatch_interrupt(ce_id: u32, entry: &TaskletEntry) -> IrqReturn {
    match entry.owner() {
        Some(dev) => dispatch(&dev, ce_id, entry),
        None => IrqReturn::NotHandled,
    }
}

pub(crate) fn dispatch(dev: &DeviceInner, ce_id: u32, entry: &TaskletEntry) -> IrqReturn {
    let ce = entry.ce_id();

    if u32::from(ce.raw()) != ce_id {
        if dev.mismatch_log.check(dev.now_us()) {
            log::error!(
                "ce_id (expect {}, received {}) does not match, inited={}, ce_count={}",
                ce.raw(),
                ce_id,
                entry.is_inited(),
                dev.config.ce_count
            );
            drain::dump_entries(dev);
        }
        return IrqReturn::NotHandled;
    }

    if ce.index() >= dev.config.ce_count {
        log::error!("ce_id={} >= ce_count={}", ce.raw(), dev.config.ce_count);
        return IrqReturn::NotHandled;
    }

    ce_bug!(
        !dev.is_link_suspended(),
        "{} interrupt fired after link suspend",
        ce
    );

    let _intr = entry.lock_intr();
    if scheduler::is_busy(dev, entry) {
        return IrqReturn::NotHandled;
    }

    dev.platform.irq.disable(ce);

    if !dev.platform.target.register_access_allowed() {
        return IrqReturn::Handled;
    }

    let cpu = dev.current_cpu();
    dev.history.record(ce, CeEventKind::IrqEvent, dev.now_us(), cpu);
    dev.stats.increment_interrupt(ce, cpu);

    if let Some(hook) = &dev.platform.test_resume {
        if hook.is_resume_trigger(ce) {
            log::info!("{} interrupt triggers unit-test resume", ce);
            hook.resume();
            dev.platform.irq.enable(ce);
            return IrqReturn::Handled;
        }
    }

    dev.inc_active();

    match &dev.platform.napi {
        Some(napi) if napi.enabled(ce) => {
            if !napi.schedule(ce) {
                log::debug!("{} napi already scheduled", ce);
                dev.dec_active();
            }
        },
        _ => {
            scheduler::schedule(dev, entry);
        },
    }

    IrqReturn::Handled
}
