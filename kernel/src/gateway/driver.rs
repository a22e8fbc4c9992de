//! The abstract network device contract the forwarding engine and
//! control loop depend on (§4.1). Production code runs against
//! [`super::virtio_net`]'s implementation; tests run against an
//! in-memory fake so the protocol logic is verifiable on the host.

use super::error::GatewayError;

pub trait NetDriver {
    fn count(&self) -> usize;
    fn mac(&self, index: usize) -> [u8; 6];
    fn has_pending(&self, index: usize) -> bool;
    fn send(&self, index: usize, frame: &[u8]) -> Result<(), GatewayError>;
    /// Copies one pending frame into `out`, returning its length, or
    /// `None` if nothing is pending.
    fn poll(&self, index: usize, out: &mut [u8]) -> Result<Option<usize>, GatewayError>;
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use core::cell::RefCell;

    const MAX_QUEUED: usize = 16;
    const MAX_FRAME: usize = 1518;

    struct Queues {
        rx: [([u8; MAX_FRAME], usize); MAX_QUEUED],
        rx_count: usize,
        tx: [([u8; MAX_FRAME], usize); MAX_QUEUED],
        tx_count: usize,
    }

    impl Queues {
        fn new() -> Self {
            Self {
                rx: [([0u8; MAX_FRAME], 0); MAX_QUEUED],
                rx_count: 0,
                tx: [([0u8; MAX_FRAME], 0); MAX_QUEUED],
                tx_count: 0,
            }
        }
    }

    /// A single fake device: a MAC address plus two in-memory FIFOs,
    /// one the test pushes frames into (consumed by `poll`), one the
    /// code under test pushes frames into via `send` (inspected by
    /// the test afterward).
    pub struct FakeDevice {
        mac: [u8; 6],
        queues: RefCell<Queues>,
    }

    impl FakeDevice {
        pub fn new(mac: [u8; 6]) -> Self {
            Self { mac, queues: RefCell::new(Queues::new()) }
        }

        /// Test-side: enqueue a frame as if the device had received it.
        pub fn push_rx(&self, frame: &[u8]) {
            let mut q = self.queues.borrow_mut();
            assert!(q.rx_count < MAX_QUEUED, "fake RX queue overflow");
            let slot = q.rx_count;
            q.rx[slot].0[..frame.len()].copy_from_slice(frame);
            q.rx[slot].1 = frame.len();
            q.rx_count += 1;
        }

        /// Test-side: pop the next frame the code under test sent.
        pub fn pop_tx(&self) -> Option<alloc::vec::Vec<u8>> {
            let mut q = self.queues.borrow_mut();
            if q.tx_count == 0 {
                return None;
            }
            let (buf, len) = q.tx[0];
            for i in 1..q.tx_count {
                q.tx[i - 1] = q.tx[i];
            }
            q.tx_count -= 1;
            Some(buf[..len].to_vec())
        }
    }

    pub struct FakeDriver<'a> {
        devices: &'a [FakeDevice],
    }

    impl<'a> FakeDriver<'a> {
        pub fn new(devices: &'a [FakeDevice]) -> Self {
            Self { devices }
        }
    }

    impl<'a> NetDriver for FakeDriver<'a> {
        fn count(&self) -> usize {
            self.devices.len()
        }

        fn mac(&self, index: usize) -> [u8; 6] {
            self.devices[index].mac
        }

        fn has_pending(&self, index: usize) -> bool {
            self.devices[index].queues.borrow().rx_count > 0
        }

        fn send(&self, index: usize, frame: &[u8]) -> Result<(), GatewayError> {
            if frame.len() > MAX_FRAME {
                return Err(GatewayError::InvalidFrameLen);
            }
            let mut q = self.devices[index].queues.borrow_mut();
            if q.tx_count >= MAX_QUEUED {
                return Err(GatewayError::TxQueueFull);
            }
            let slot = q.tx_count;
            q.tx[slot].0[..frame.len()].copy_from_slice(frame);
            q.tx[slot].1 = frame.len();
            q.tx_count += 1;
            Ok(())
        }

        fn poll(&self, index: usize, out: &mut [u8]) -> Result<Option<usize>, GatewayError> {
            let mut q = self.devices[index].queues.borrow_mut();
            if q.rx_count == 0 {
                return Ok(None);
            }
            let (buf, len) = q.rx[0];
            for i in 1..q.rx_count {
                q.rx[i - 1] = q.rx[i];
            }
            q.rx_count -= 1;
            let n = len.min(out.len());
            out[..n].copy_from_slice(&buf[..n]);
            Ok(Some(n))
        }
    }
}
