//! Compile-time configuration for the NAT gateway.
//!
//! Every value here is a fixed constant rather than something parsed at
//! boot; the gateway has no dynamic configuration surface.

/// First three octets of the LAN subnet (a /24).
pub const LAN_SUBNET_PREFIX: [u8; 3] = [192, 168, 1];

/// Gateway's LAN-facing address.
pub const GATEWAY_LAN_IP: [u8; 4] = [192, 168, 1, 1];

/// Gateway's WAN-facing address.
pub const GATEWAY_WAN_IP: [u8; 4] = [10, 3, 5, 99];

/// LAN peer solicited by gratuitous ARP and test pings. There is no
/// dynamic configuration surface, so the gateway tracks exactly one
/// peer per side, fixed at build time.
pub const LAN_PEER_IP: [u8; 4] = [192, 168, 1, 100];
/// WAN-side next hop solicited the same way.
pub const WAN_PEER_IP: [u8; 4] = [10, 3, 5, 1];

/// First port handed out by the NAT port allocator.
pub const NAT_PORT_RANGE_START: u16 = 20000;
/// Last port handed out by the NAT port allocator (inclusive).
pub const NAT_PORT_RANGE_END: u16 = 30000;

/// Maximum simultaneous NAT sessions.
pub const NAT_TABLE_SIZE: usize = 64;
/// Reverse-lookup hash bucket count. Must stay a power of two.
pub const NAT_HASH_SIZE: usize = 128;

/// Maximum ARP cache entries.
pub const ARP_TABLE_SIZE: usize = 32;
/// ARP entry aging threshold, in seconds.
pub const ARP_TIMEOUT_S: u32 = 300;

/// Number of network devices the driver can own.
pub const MAX_DEVICES: usize = 2;
/// Virtqueue depth, per queue, per device.
pub const QUEUE_SIZE: usize = 8;
/// Per-buffer capacity in bytes (device header + Ethernet frame).
pub const BUFFER_SIZE: usize = 2048;
/// Maximum Ethernet frame the forwarding engine will build or copy,
/// excluding the device header.
pub const MAX_FRAME_LEN: usize = 1518;

/// Tick frequency maintained by the timebase, in Hz.
pub const TICK_HZ: u32 = 1000;

/// Session timeout classes, in seconds.
pub const NAT_TIMEOUT_ICMP_S: u32 = 60;
pub const NAT_TIMEOUT_UDP_S: u32 = 120;
pub const NAT_TIMEOUT_TCP_INIT_S: u32 = 300;

/// Control loop pacing.
pub const SWEEP_DELAY_MS: u32 = 100;
pub const IDLE_ITERATIONS_PER_GRATUITOUS_ARP: u32 = 10;
pub const ITERATIONS_PER_TEST_PING: u32 = 5;

const _: () = assert!(NAT_HASH_SIZE.is_power_of_two());
const _: () = assert!((NAT_PORT_RANGE_END - NAT_PORT_RANGE_START) as usize >= NAT_TABLE_SIZE);
