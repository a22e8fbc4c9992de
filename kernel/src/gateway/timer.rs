//! Monotonic timebase.
//!
//! The ARM generic timer's own register sequence is external-collaborator
//! scaffolding (spec's out-of-scope list); this module exposes only the
//! 1ms-resolution tick counter the rest of the gateway depends on.

use core::arch::asm;
use core::sync::atomic::{AtomicU32, Ordering};

use super::config::TICK_HZ;

static TICKS: AtomicU32 = AtomicU32::new(0);
static TICKS_PER_MS: AtomicU32 = AtomicU32::new(0);

/// Programs the EL1 physical timer for a periodic 1ms interrupt and
/// resets the tick counter.
///
/// # Safety
/// Must run once during boot, before interrupts are unmasked.
pub unsafe fn init() {
    let freq: u64;
    unsafe {
        asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nomem, nostack));
    }
    let per_ms = (freq / TICK_HZ as u64).max(1);
    TICKS_PER_MS.store(per_ms as u32, Ordering::Relaxed);
    TICKS.store(0, Ordering::Relaxed);
    arm_next_tick(per_ms);
    unsafe {
        asm!("msr cntp_ctl_el0, {}", in(reg) 1u64, options(nomem, nostack));
    }
}

fn arm_next_tick(interval: u64) {
    unsafe {
        let now: u64;
        asm!("mrs {}, cntpct_el0", out(reg) now, options(nomem, nostack));
        asm!("msr cntp_cval_el0, {}", in(reg) now + interval, options(nomem, nostack));
    }
}

/// Called from the timer IRQ handler. Advances the tick counter and
/// rearms the comparator for the next millisecond.
pub fn on_tick_irq() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let per_ms = TICKS_PER_MS.load(Ordering::Relaxed) as u64;
    if per_ms > 0 {
        arm_next_tick(per_ms);
    }
}

/// Current tick count, 1ms resolution, wrapping at 2^32.
pub fn ticks() -> u32 {
    TICKS.load(Ordering::Relaxed)
}
