//! Paravirtualized (VirtIO-MMIO) network device driver.
//!
//! Covers discovery across the fixed bank of candidate MMIO windows,
//! feature negotiation, virtqueue setup, non-blocking transmit, and the
//! interrupt-driven receive-completion pipeline described in the device
//! contract. IRQ-context code here touches only this module's own
//! per-device state; it never calls into the forwarding engine or the
//! NAT table.

use core::arch::asm;
use core::sync::atomic::{AtomicU16, Ordering};

use super::config::{BUFFER_SIZE, MAX_DEVICES, QUEUE_SIZE};
use super::driver::NetDriver;
use super::error::GatewayError;
use super::mmio::Mmio;

const VIRTIO_MAGIC: u32 = 0x7472_6976;
const DEVICE_ID_NETWORK: u32 = 1;

/// First candidate MMIO window on QEMU's `virt` machine.
const MMIO_BASE: usize = 0x0A00_0000;
/// Stride between candidate windows.
const MMIO_STRIDE: usize = 0x200;
/// Number of candidate windows probed at boot.
const MMIO_SLOTS: usize = 16;
/// SPI interrupt ID paired with slot 0; slot *i* uses `IRQ_BASE + i`.
const IRQ_BASE: u32 = 48;

mod reg {
    pub const MAGIC: usize = 0x000;
    pub const VERSION: usize = 0x004;
    pub const DEVICE_ID: usize = 0x008;
    pub const DEVICE_FEATURES: usize = 0x010;
    pub const DEVICE_FEATURES_SEL: usize = 0x014;
    pub const DRIVER_FEATURES: usize = 0x020;
    pub const DRIVER_FEATURES_SEL: usize = 0x024;
    pub const QUEUE_SEL: usize = 0x030;
    pub const QUEUE_NUM_MAX: usize = 0x034;
    pub const QUEUE_NUM: usize = 0x038;
    pub const QUEUE_READY: usize = 0x044;
    pub const QUEUE_NOTIFY: usize = 0x050;
    pub const INTERRUPT_STATUS: usize = 0x060;
    pub const INTERRUPT_ACK: usize = 0x064;
    pub const STATUS: usize = 0x070;
    pub const QUEUE_DESC_LOW: usize = 0x080;
    pub const QUEUE_DESC_HIGH: usize = 0x084;
    pub const QUEUE_AVAIL_LOW: usize = 0x090;
    pub const QUEUE_AVAIL_HIGH: usize = 0x094;
    pub const QUEUE_USED_LOW: usize = 0x0A0;
    pub const QUEUE_USED_HIGH: usize = 0x0A4;
}

mod status_bit {
    pub const ACKNOWLEDGE: u32 = 1;
    pub const DRIVER: u32 = 2;
    pub const DRIVER_OK: u32 = 4;
    pub const FEATURES_OK: u32 = 8;
}

const FEATURE_MAC: u32 = 1 << 5;

const RXQ: usize = 0;
const TXQ: usize = 1;

const DEVICE_HEADER_LEN: usize = 10;
/// Ethernet max frame (1518) plus the device header.
const MAX_FRAME_LEN: usize = 1518;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Desc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

const DESC_F_NEXT: u16 = 1;
const DESC_F_WRITE: u16 = 2;

#[repr(C, align(4096))]
struct Virtqueue {
    desc: [Desc; QUEUE_SIZE],
    avail_flags: u16,
    avail_idx: u16,
    avail_ring: [u16; QUEUE_SIZE],
    avail_used_event: u16,
    used_flags: u16,
    used_idx: u16,
    used_ring: [UsedElem; QUEUE_SIZE],
    used_avail_event: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct UsedElem {
    id: u32,
    len: u32,
}

impl Virtqueue {
    const fn zeroed() -> Self {
        Self {
            desc: [Desc { addr: 0, len: 0, flags: 0, next: 0 }; QUEUE_SIZE],
            avail_flags: 0,
            avail_idx: 0,
            avail_ring: [0; QUEUE_SIZE],
            avail_used_event: 0,
            used_flags: 0,
            used_idx: 0,
            used_ring: [UsedElem { id: 0, len: 0 }; QUEUE_SIZE],
            used_avail_event: 0,
        }
    }
}

#[repr(C, align(64))]
struct Buffer([u8; BUFFER_SIZE]);

/// Per-device DMA-visible memory: two virtqueues plus their buffer pools.
/// Static, fixed-size, 4KiB-aligned for the queues and 64-byte aligned
/// for the buffers, per the resource policy.
struct DeviceMemory {
    rxq: Virtqueue,
    txq: Virtqueue,
    rx_buffers: [Buffer; QUEUE_SIZE],
    tx_buffers: [Buffer; QUEUE_SIZE],
}

impl DeviceMemory {
    const fn zeroed() -> Self {
        Self {
            rxq: Virtqueue::zeroed(),
            txq: Virtqueue::zeroed(),
            rx_buffers: [const { Buffer([0; BUFFER_SIZE]) }; QUEUE_SIZE],
            tx_buffers: [const { Buffer([0; BUFFER_SIZE]) }; QUEUE_SIZE],
        }
    }
}

static mut MEMORY: [DeviceMemory; MAX_DEVICES] =
    [const { DeviceMemory::zeroed() }; MAX_DEVICES];

/// One completed receive: which descriptor, and how many bytes the
/// device wrote into it (including the device header).
#[derive(Clone, Copy)]
struct Completion {
    desc_id: u16,
    total_len: u16,
}

/// Bounded FIFO shared between the IRQ handler (producer) and the
/// control loop (consumer), guarded by masking IRQs on the consumer
/// side only — the producer already runs with IRQs masked.
struct CompletionRing {
    buf: [Completion; QUEUE_SIZE],
    head: u16,
    tail: u16,
    count: u16,
}

impl CompletionRing {
    const fn new() -> Self {
        Self {
            buf: [Completion { desc_id: 0, total_len: 0 }; QUEUE_SIZE],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn push(&mut self, c: Completion) -> bool {
        if self.count as usize == QUEUE_SIZE {
            return false;
        }
        self.buf[self.tail as usize] = c;
        self.tail = (self.tail + 1) % QUEUE_SIZE as u16;
        self.count += 1;
        true
    }

    fn pop(&mut self) -> Option<Completion> {
        if self.count == 0 {
            return None;
        }
        let c = self.buf[self.head as usize];
        self.head = (self.head + 1) % QUEUE_SIZE as u16;
        self.count -= 1;
        Some(c)
    }
}

pub struct NetDevice {
    mmio: Mmio,
    irq: u32,
    slot: usize,
    mac: [u8; 6],
    tx_last_used: AtomicU16,
    completions: spin::Mutex<CompletionRing>,
    ready: bool,
}

unsafe impl Sync for NetDevice {}

static mut DEVICES: [Option<NetDevice>; MAX_DEVICES] = [const { None }; MAX_DEVICES];
static mut DEVICE_COUNT: usize = 0;

fn daif_mask_irq() -> u64 {
    let saved: u64;
    unsafe {
        asm!("mrs {0}, daif", out(reg) saved, options(nomem, nostack));
        asm!("msr daifset, #2", options(nomem, nostack));
    }
    saved
}

fn daif_restore(saved: u64) {
    unsafe {
        asm!("msr daif, {0}", in(reg) saved, options(nomem, nostack));
    }
}

/// Probes every candidate MMIO window and brings up each device found
/// to be present and network-class. A failure on one slot never stops
/// the scan of the remaining slots.
pub fn init_all() -> usize {
    unsafe {
        DEVICE_COUNT = 0;
        for slot in 0..MMIO_SLOTS {
            if DEVICE_COUNT >= MAX_DEVICES {
                break;
            }
            let base = MMIO_BASE + slot * MMIO_STRIDE;
            let irq = IRQ_BASE + slot as u32;
            match init_one(slot, base, irq) {
                Ok(dev) => {
                    log::info!(
                        target: "virtio-net",
                        "device {} up at {:#x}, irq {}, mac {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                        DEVICE_COUNT, base, irq,
                        dev.mac[0], dev.mac[1], dev.mac[2], dev.mac[3], dev.mac[4], dev.mac[5]
                    );
                    DEVICES[DEVICE_COUNT] = Some(dev);
                    DEVICE_COUNT += 1;
                }
                Err(GatewayError::DeviceAbsent) => {
                    // Quiet: most candidate slots are simply unused.
                }
                Err(e) => {
                    log::warn!(target: "virtio-net", "slot {} init failed: {}", slot, e);
                }
            }
        }
        DEVICE_COUNT
    }
}

fn init_one(slot: usize, base: usize, irq: u32) -> Result<NetDevice, GatewayError> {
    let mmio = unsafe { Mmio::new(base) };

    if mmio.read32(reg::MAGIC) != VIRTIO_MAGIC {
        return Err(GatewayError::DeviceAbsent);
    }
    // A zero device-id is a legacy/transitional quirk meaning "any
    // class"; per the discovery rule, treat it the same as an
    // explicit network-class match rather than skipping the slot.
    let device_id = mmio.read32(reg::DEVICE_ID);
    if device_id != DEVICE_ID_NETWORK && device_id != 0 {
        return Err(GatewayError::NotNetworkClass);
    }

    mmio.write32(reg::STATUS, 0);
    mmio.write32(reg::STATUS, status_bit::ACKNOWLEDGE);
    mmio.write32(reg::STATUS, status_bit::ACKNOWLEDGE | status_bit::DRIVER);

    mmio.write32(reg::DEVICE_FEATURES_SEL, 0);
    let device_features = mmio.read32(reg::DEVICE_FEATURES);
    let accepted = device_features & FEATURE_MAC;
    mmio.write32(reg::DRIVER_FEATURES_SEL, 0);
    mmio.write32(reg::DRIVER_FEATURES, accepted);

    mmio.write32(
        reg::STATUS,
        status_bit::ACKNOWLEDGE | status_bit::DRIVER | status_bit::FEATURES_OK,
    );
    if mmio.read32(reg::STATUS) & status_bit::FEATURES_OK == 0 {
        log::warn!(target: "virtio-net", "slot {}: FEATURES_OK did not latch, continuing", slot);
    }

    let mut mac = [0u8; 6];
    if accepted & FEATURE_MAC != 0 {
        for (i, b) in mac.iter_mut().enumerate() {
            *b = mmio.read_config_u8(i);
        }
    }

    setup_queue(&mmio, slot, RXQ)?;
    setup_queue(&mmio, slot, TXQ)?;
    post_rx_buffers(slot);

    mmio.write32(
        reg::STATUS,
        status_bit::ACKNOWLEDGE
            | status_bit::DRIVER
            | status_bit::FEATURES_OK
            | status_bit::DRIVER_OK,
    );

    unsafe {
        super::irq::register_handler(irq, irq_handler);
    }
    crate::arch::aarch64::gic::gic().enable_irq(irq);

    Ok(NetDevice {
        mmio,
        irq,
        slot,
        mac,
        tx_last_used: AtomicU16::new(0),
        completions: spin::Mutex::new(CompletionRing::new()),
        ready: true,
    })
}

fn setup_queue(mmio: &Mmio, slot: usize, which: usize) -> Result<(), GatewayError> {
    mmio.write32(reg::QUEUE_SEL, which as u32);
    let max = mmio.read32(reg::QUEUE_NUM_MAX);
    if max == 0 {
        return Err(GatewayError::QueueUnavailable);
    }
    let size = (QUEUE_SIZE as u32).min(max);
    mmio.write32(reg::QUEUE_NUM, size);

    let queue = unsafe {
        let mem = &mut MEMORY[slot];
        if which == RXQ { &mut mem.rxq } else { &mut mem.txq }
    };
    *queue = Virtqueue::zeroed();

    let desc_addr = queue.desc.as_ptr() as u64;
    let avail_addr = &queue.avail_flags as *const u16 as u64;
    let used_addr = &queue.used_flags as *const u16 as u64;

    mmio.write64_split(reg::QUEUE_DESC_LOW, reg::QUEUE_DESC_HIGH, desc_addr);
    mmio.write64_split(reg::QUEUE_AVAIL_LOW, reg::QUEUE_AVAIL_HIGH, avail_addr);
    mmio.write64_split(reg::QUEUE_USED_LOW, reg::QUEUE_USED_HIGH, used_addr);
    mmio.write32(reg::QUEUE_READY, 1);

    Ok(())
}

fn post_rx_buffers(slot: usize) {
    unsafe {
        let mem = &mut MEMORY[slot];
        for i in 0..QUEUE_SIZE {
            mem.rxq.desc[i] = Desc {
                addr: mem.rx_buffers[i].0.as_ptr() as u64,
                len: BUFFER_SIZE as u32,
                flags: DESC_F_WRITE,
                next: 0,
            };
            mem.rxq.avail_ring[i] = i as u16;
        }
        mem.rxq.avail_idx = QUEUE_SIZE as u16;
    }
    let dev_mmio = unsafe { Mmio::new(MMIO_BASE + slot * MMIO_STRIDE) };
    dev_mmio.write32(reg::QUEUE_NOTIFY, RXQ as u32);
}

/// Called from the IRQ vector once the controller has identified which
/// source fired. Touches only this device's own state: drains the RX
/// used ring into the completion FIFO and reclaims TX completions.
/// Never calls into the forwarding engine or NAT table.
fn irq_handler(irq: u32) {
    unsafe {
        for dev in DEVICES.iter() {
            let Some(dev) = dev else { continue };
            if dev.irq != irq {
                continue;
            }
            let status = dev.mmio.read32(reg::INTERRUPT_STATUS);
            if status & 0x1 != 0 {
                service_device(dev);
            }
            dev.mmio.write32(reg::INTERRUPT_ACK, status);
            return;
        }
    }
}

fn service_device(dev: &NetDevice) {
    unsafe {
        let mem = &mut MEMORY[dev.slot];

        let tx_used = mem.txq.used_idx;
        dev.tx_last_used.store(tx_used, Ordering::Release);

        let mut recycle_needed = false;
        let mut completions = dev.completions.lock();
        loop {
            let cur_used = mem.rxq.used_idx;
            let cur_cached = rx_last_used_of(dev.slot);
            if cur_used == cur_cached {
                break;
            }
            let elem = mem.rxq.used_ring[(cur_cached as usize) % QUEUE_SIZE];
            set_rx_last_used(dev.slot, cur_cached.wrapping_add(1));

            if elem.id as usize >= QUEUE_SIZE {
                continue;
            }
            let completion = Completion {
                desc_id: elem.id as u16,
                total_len: elem.len as u16,
            };
            if !completions.push(completion) {
                // No room in the completion FIFO: recycle the
                // descriptor immediately so the device keeps making
                // progress and notify once we're done draining.
                recycle_descriptor(dev.slot, completion.desc_id);
                recycle_needed = true;
            }
        }
        drop(completions);

        if recycle_needed {
            dev.mmio.write32(reg::QUEUE_NOTIFY, RXQ as u32);
        }
    }
}

// Per-device cached consumer cursor into the RX used ring. Kept
// outside `NetDevice` so the IRQ handler can mutate it without a
// `&mut` borrow across the static array.
static mut RX_LAST_USED: [u16; MAX_DEVICES] = [0; MAX_DEVICES];

fn rx_last_used_of(slot: usize) -> u16 {
    unsafe { RX_LAST_USED[slot] }
}

fn set_rx_last_used(slot: usize, v: u16) {
    unsafe { RX_LAST_USED[slot] = v };
}

fn recycle_descriptor(slot: usize, desc_id: u16) {
    unsafe {
        let mem = &mut MEMORY[slot];
        let idx = (mem.rxq.avail_idx as usize) % QUEUE_SIZE;
        mem.rxq.avail_ring[idx] = desc_id;
        mem.rxq.avail_idx = mem.rxq.avail_idx.wrapping_add(1);
    }
}

pub fn count() -> usize {
    unsafe { DEVICE_COUNT }
}

pub fn mac(index: usize) -> [u8; 6] {
    unsafe { DEVICES[index].as_ref().map(|d| d.mac).unwrap_or([0; 6]) }
}

pub fn has_pending(index: usize) -> bool {
    unsafe {
        DEVICES[index]
            .as_ref()
            .map(|d| {
                let saved = daif_mask_irq();
                let pending = d.completions.lock().count > 0;
                daif_restore(saved);
                pending
            })
            .unwrap_or(false)
    }
}

/// Non-blocking enqueue of one outbound frame.
pub fn send(index: usize, frame: &[u8]) -> Result<(), GatewayError> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(GatewayError::InvalidFrameLen);
    }
    let dev = unsafe { DEVICES[index].as_ref() }.ok_or(GatewayError::DeviceAbsent)?;

    unsafe {
        let mem = &mut MEMORY[dev.slot];
        let tx_last_used = dev.tx_last_used.load(Ordering::Acquire);
        if mem.txq.avail_idx.wrapping_sub(tx_last_used) as usize == QUEUE_SIZE {
            return Err(GatewayError::TxQueueFull);
        }

        let slot_idx = (mem.txq.avail_idx as usize) % QUEUE_SIZE;
        let buf = &mut mem.tx_buffers[slot_idx].0;
        for b in buf[..DEVICE_HEADER_LEN].iter_mut() {
            *b = 0;
        }
        buf[DEVICE_HEADER_LEN..DEVICE_HEADER_LEN + frame.len()].copy_from_slice(frame);

        mem.txq.desc[slot_idx] = Desc {
            addr: buf.as_ptr() as u64,
            len: (DEVICE_HEADER_LEN + frame.len()) as u32,
            flags: 0,
            next: 0,
        };
        mem.txq.avail_ring[slot_idx] = slot_idx as u16;
        mem.txq.avail_idx = mem.txq.avail_idx.wrapping_add(1);
    }

    dev.mmio.write32(reg::QUEUE_NOTIFY, TXQ as u32);
    Ok(())
}

/// Non-blocking dequeue of one completed receive into `out`. Returns
/// `Ok(Some(len))` with the Ethernet-frame length (device header
/// stripped), `Ok(None)` if nothing is pending.
pub fn poll(index: usize, out: &mut [u8]) -> Result<Option<usize>, GatewayError> {
    let dev = unsafe { DEVICES[index].as_ref() }.ok_or(GatewayError::DeviceAbsent)?;

    let completion = {
        let saved = daif_mask_irq();
        let c = dev.completions.lock().pop();
        daif_restore(saved);
        match c {
            Some(c) => c,
            None => return Ok(None),
        }
    };

    if completion.total_len as usize <= DEVICE_HEADER_LEN {
        recycle_descriptor(dev.slot, completion.desc_id);
        dev.mmio.write32(reg::QUEUE_NOTIFY, RXQ as u32);
        return Ok(Some(0));
    }

    let payload_len = completion.total_len as usize - DEVICE_HEADER_LEN;
    let copy_len = payload_len.min(out.len());
    unsafe {
        let mem = &MEMORY[dev.slot];
        let buf = &mem.rx_buffers[completion.desc_id as usize].0;
        out[..copy_len].copy_from_slice(&buf[DEVICE_HEADER_LEN..DEVICE_HEADER_LEN + copy_len]);
    }

    recycle_descriptor(dev.slot, completion.desc_id);
    dev.mmio.write32(reg::QUEUE_NOTIFY, RXQ as u32);
    Ok(Some(copy_len))
}

/// The [`NetDriver`] the forwarding engine and control loop run
/// against in production; a zero-sized handle onto this module's
/// static device table.
pub struct VirtioNetDriver;

impl NetDriver for VirtioNetDriver {
    fn count(&self) -> usize {
        count()
    }

    fn mac(&self, index: usize) -> [u8; 6] {
        mac(index)
    }

    fn has_pending(&self, index: usize) -> bool {
        has_pending(index)
    }

    fn send(&self, index: usize, frame: &[u8]) -> Result<(), GatewayError> {
        send(index, frame)
    }

    fn poll(&self, index: usize, out: &mut [u8]) -> Result<Option<usize>, GatewayError> {
        poll(index, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_ring_fifo_order() {
        let mut ring = CompletionRing::new();
        assert!(ring.push(Completion { desc_id: 1, total_len: 64 }));
        assert!(ring.push(Completion { desc_id: 2, total_len: 128 }));
        assert_eq!(ring.pop().unwrap().desc_id, 1);
        assert_eq!(ring.pop().unwrap().desc_id, 2);
        assert!(ring.pop().is_none());
    }

    #[test]
    fn completion_ring_rejects_when_full() {
        let mut ring = CompletionRing::new();
        for i in 0..QUEUE_SIZE {
            assert!(ring.push(Completion { desc_id: i as u16, total_len: 64 }));
        }
        assert!(!ring.push(Completion { desc_id: 99, total_len: 64 }));
    }
}
