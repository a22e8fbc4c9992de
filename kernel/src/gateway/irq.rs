//! Interrupt dispatch.
//!
//! The generic interrupt controller's register-level programming is
//! treated as an external collaborator here: this module exposes only
//! the abstract contract the gateway depends on — "register a handler
//! for source N; the handler is invoked with N in IRQ context" — and
//! leaves the controller's own distributor/CPU-interface/redistributor
//! sequencing to `gic::init`.

use super::config::MAX_DEVICES;

pub type IrqHandler = fn(u32);

struct Slot {
    irq: u32,
    handler: Option<IrqHandler>,
}

/// A handful of slots is enough: one per network device plus headroom.
const MAX_HANDLERS: usize = MAX_DEVICES + 2;

static mut HANDLERS: [Slot; MAX_HANDLERS] = [
    Slot { irq: 0, handler: None },
    Slot { irq: 0, handler: None },
    Slot { irq: 0, handler: None },
    Slot { irq: 0, handler: None },
];

/// Registers `handler` to be invoked whenever IRQ `source` fires.
///
/// # Safety
/// Must be called from a single-threaded boot context, before
/// interrupts are unmasked.
pub unsafe fn register_handler(source: u32, handler: IrqHandler) {
    unsafe {
        for slot in HANDLERS.iter_mut() {
            if slot.handler.is_none() {
                slot.irq = source;
                slot.handler = Some(handler);
                return;
            }
        }
    }
    log::warn!(target: "gic", "no free IRQ handler slot for source {}", source);
}

/// Invoked by the exception vector's IRQ path with the acknowledged
/// interrupt ID. Dispatches to whichever handler registered for it.
pub fn dispatch(source: u32) {
    unsafe {
        for slot in HANDLERS.iter() {
            if slot.irq == source {
                if let Some(handler) = slot.handler {
                    handler(source);
                    return;
                }
            }
        }
    }
    log::warn!(target: "gic", "unhandled IRQ {}", source);
}
