//! Gateway entry point for the 64-bit ARM `virt` machine.
//!
//! Brings up the CPU (exception vectors, GIC), the PL011 console, the
//! EL1 physical timer, and every virtio-net device QEMU exposes, then
//! hands off to the gateway's control loop forever. There is no
//! scheduler and no userspace here: this binary *is* the gateway.

#![no_std]
#![no_main]

use splax_kernel::arch::aarch64::gic;
use splax_kernel::gateway::{self, config, control::Gateway, virtio_net::VirtioNetDriver};

core::arch::global_asm!(include_str!("arch/aarch64/boot.S"));

/// Registered with `gateway::irq` for the timer's SPI; advances the
/// tick counter the control loop paces itself against.
fn timer_irq_handler(_source: u32) {
    gateway::timer::on_tick_irq();
}

/// Entry point called by `boot.S` once BSS is cleared and the stack is
/// live.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_entry() -> ! {
    // SAFETY: called once, before interrupts are unmasked. Brings up
    // the PL011 UART and installs it as the `log` sink.
    unsafe {
        gateway::logger::init(log::LevelFilter::Info);
    }

    log::info!(target: "boot", "splax gateway v{} starting", splax_kernel::VERSION);

    // SAFETY: single-threaded boot context, interrupts still masked.
    unsafe {
        splax_kernel::arch::init();
        gateway::timer::init();
        gateway::irq::register_handler(gic::irq::TIMER, timer_irq_handler);
    }
    gic::gic().enable_irq(gic::irq::TIMER);

    let devices = gateway::virtio_net::init_all();
    log::info!(target: "boot", "{} network device(s) online", devices);
    if devices < 2 {
        log::warn!(target: "boot", "expected a LAN and a WAN device, found {}", devices);
    }

    splax_kernel::arch::aarch64::exceptions::enable_interrupts();

    let mut gw = Gateway::new(config::LAN_PEER_IP, config::WAN_PEER_IP);
    let driver = VirtioNetDriver;

    log::info!(target: "boot", "entering sweep loop");
    let mut next_sweep = gateway::timer::ticks().wrapping_add(config::SWEEP_DELAY_MS);
    loop {
        let now = gateway::timer::ticks();
        if now.wrapping_sub(next_sweep) as i32 >= 0 {
            gw.sweep(&driver, now);
            next_sweep = now.wrapping_add(config::SWEEP_DELAY_MS);
        }
        splax_kernel::arch::halt();
    }
}
