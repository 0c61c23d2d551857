//! # Interrupt Line Registration
//!
//! Batch (un)registration of engine lines. Registration of a batch is all
//! or nothing: a failure releases every line the batch had already taken.
//! Lifecycle callers serialize these operations.

use hif_hal::{IrqFlags, IrqLine, IrqReturn};

use crate::device::DeviceInner;
use crate::dispatch;
use crate::error::{CeError, CeResult};
use crate::{CeId, CeMask};

/// Lines are requested rising-edge
const CE_IRQ_FLAGS: IrqFlags = IrqFlags::TRIGGER_RISING;

/// Engines in `mask` below `ce_count` whose entry is initialized
fn eligible(dev: &DeviceInner, mask: CeMask) -> impl Iterator<Item = CeId> + '_ {
    (mask & CeMask::first(dev.config.ce_count))
        .ids()
        .filter(move |&ce| dev.entry(ce).is_inited())
}

pub(crate) fn register_irqs(dev: &DeviceInner, mask: CeMask) -> CeResult<()> {
    let registered = *dev.register_irq_done.lock();
    let mut done_mask = CeMask::empty();

    for ce in eligible(dev, mask.difference(registered)) {
        if let Err(cause) = dev.platform.irq.request_irq(ce, ce.name(), CE_IRQ_FLAGS) {
            log::error!("cannot register CE {} irq handler, ret = {}", ce.raw(), cause);
            release_lines(dev, done_mask);
            return Err(CeError::IrqRegistration { ce, cause });
        }
        done_mask |= CeMask::of(ce);
    }

    dev.register_irq_done.lock().insert(done_mask);
    log::debug!("registered ce irqs {:#x}", done_mask.bits());
    Ok(())
}

/// Undo the requests of a failed batch
fn release_lines(dev: &DeviceInner, mask: CeMask) {
    for ce in mask.ids() {
        if let Err(err) = dev.platform.irq.free_irq(ce) {
            log::error!("rollback of CE {} irq failed: {}", ce.raw(), err);
        }
    }
}

pub(crate) fn unregister_irqs(dev: &DeviceInner, mask: CeMask) {
    // Interrupts are going away: stop polling first
    if let Some(napi) = &dev.platform.napi {
        if let Err(code) = napi.irq_state_changed(false) {
            log::error!("{}", CeError::Napi(code));
        }
    }

    let mask = mask & *dev.register_irq_done.lock();

    for ce in CeId::all().take(dev.config.ce_count) {
        if mask.has(ce) && dev.entry(ce).is_inited() {
            if let Err(err) = dev.platform.irq.free_irq(ce) {
                log::error!("unregister irq error - ce_id = {}, ret = {}", ce.raw(), err);
            }
        }
        dev.platform.target.disable_polling(ce);
    }

    dev.register_irq_done.lock().remove(mask);
}

pub(crate) fn handle_irq(dev: &DeviceInner, line: IrqLine, cookie: CeId) -> IrqReturn {
    let ce_id = dev.platform.irq.line_to_ce(line);
    dispatch::dispatch(dev, ce_id, dev.entry(cookie))
}
