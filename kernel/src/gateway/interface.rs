//! Interface bindings: the LAN and WAN sides of the gateway, each tied
//! to one network device, a local address, and a peer to solicit via
//! ARP. Interfaces are created once at initialization and never torn
//! down.

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Lan,
    Wan,
}

pub struct Interface {
    pub side: Side,
    pub name: &'static str,
    /// Index into the device driver's table.
    pub device: usize,
    pub local_ip: [u8; 4],
    pub peer_ip: [u8; 4],
    pub peer_mac: [u8; 6],
    pub peer_mac_valid: bool,
    /// Iteration counters the control loop uses to pace gratuitous ARP
    /// and test-ping traffic.
    pub idle_iterations: u32,
    pub success_iterations: u32,
}

impl Interface {
    pub const fn new(side: Side, name: &'static str, device: usize, local_ip: [u8; 4], peer_ip: [u8; 4]) -> Self {
        Self {
            side,
            name,
            device,
            local_ip,
            peer_ip,
            peer_mac: [0; 6],
            peer_mac_valid: false,
            idle_iterations: 0,
            success_iterations: 0,
        }
    }

    pub fn latch_peer_mac(&mut self, mac: [u8; 6]) {
        self.peer_mac = mac;
        self.peer_mac_valid = true;
    }
}
