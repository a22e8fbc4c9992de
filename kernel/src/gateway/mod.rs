//! The dual-homed NAT gateway: a paravirtualized network device
//! driver, an Ethernet/ARP/IPv4 forwarding engine, a NAT session
//! table, and the control loop that drives them.
//!
//! Pure protocol and table logic (this module's majority) carries no
//! architecture dependency and is unit-tested on the host. Only the
//! MMIO/virtqueue driver, the PL011 sink and the EL1 timer touch real
//! hardware and are built for `aarch64` alone — mirroring how
//! [`crate::arch`] gates its own hardware-facing code.

pub mod byteorder;
pub mod checksum;
pub mod config;
pub mod error;

pub mod arp;
pub mod arp_cache;
pub mod ethernet;
pub mod icmp;
pub mod interface;
pub mod ipv4;
pub mod transport;

pub mod driver;
pub mod nat;
pub mod timebase;

pub mod forwarding;
pub mod control;

pub mod irq;

#[cfg(target_arch = "aarch64")]
pub mod logger;
#[cfg(target_arch = "aarch64")]
pub mod mmio;
#[cfg(target_arch = "aarch64")]
pub mod timer;
#[cfg(target_arch = "aarch64")]
pub mod uart;
#[cfg(target_arch = "aarch64")]
pub mod virtio_net;

pub use control::Gateway;
pub use error::GatewayError;
