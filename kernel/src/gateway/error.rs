//! Unified error type for the NAT gateway's data-path operations.
//!
//! Every fallible operation returns `Result<T, GatewayError>`. No error
//! here is fatal to the process: the control loop logs and moves on.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    /// No device answered at this MMIO probe window.
    DeviceAbsent,
    /// Magic register did not read the VirtIO magic value.
    BadMagic,
    /// Device class is neither `network` nor the legacy zero value.
    NotNetworkClass,
    /// Device did not accept the requested feature set.
    FeaturesNotAccepted,
    /// A virtqueue could not be sized or armed.
    QueueUnavailable,
    /// TX ring has no free descriptor slot.
    TxQueueFull,
    /// Frame length exceeds the device's maximum.
    InvalidFrameLen,
    /// A used-ring element referenced a descriptor outside the ring.
    RxDescOutOfRange,
    /// The per-device RX completion queue is full.
    RxCompletionFull,
    /// NAT table has no free session slot.
    NatTableFull,
    /// No NAT session matches this inbound tuple.
    NatNoMatch,
    /// No ARP cache entry for the next-hop address.
    ArpMiss,
    /// Packet failed structural validation during parsing.
    MalformedPacket,
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DeviceAbsent => "device absent",
            Self::BadMagic => "bad magic value",
            Self::NotNetworkClass => "not a network-class device",
            Self::FeaturesNotAccepted => "features not accepted",
            Self::QueueUnavailable => "queue unavailable",
            Self::TxQueueFull => "tx queue full",
            Self::InvalidFrameLen => "invalid frame length",
            Self::RxDescOutOfRange => "rx descriptor out of range",
            Self::RxCompletionFull => "rx completion queue full",
            Self::NatTableFull => "nat table full",
            Self::NatNoMatch => "no nat session match",
            Self::ArpMiss => "arp cache miss",
            Self::MalformedPacket => "malformed packet",
        };
        f.write_str(s)
    }
}
