//! ARP packet parsing and in-place reply/request construction.
//!
//! Distinct from [`super::arp_cache`], which holds the learned
//! IP-to-MAC bindings; this module only handles the wire format.

pub const HEADER_LEN: usize = 28;

pub const HTYPE_ETHERNET: u16 = 1;
pub const PTYPE_IPV4: u16 = 0x0800;

pub const OP_REQUEST: u16 = 1;
pub const OP_REPLY: u16 = 2;

/// A checked, read-only view of an ARP packet (the Ethernet payload).
pub struct ArpPacket<'a> {
    buf: &'a [u8],
}

impl<'a> ArpPacket<'a> {
    /// Returns `None` if `buf` is too short, or the packet is not an
    /// Ethernet/IPv4 ARP packet.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let pkt = Self { buf };
        if pkt.hardware_type() != HTYPE_ETHERNET
            || pkt.protocol_type() != PTYPE_IPV4
            || pkt.hw_addr_len() != 6
            || pkt.proto_addr_len() != 4
        {
            return None;
        }
        Some(pkt)
    }

    pub fn hardware_type(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    pub fn protocol_type(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    pub fn hw_addr_len(&self) -> u8 {
        self.buf[4]
    }

    pub fn proto_addr_len(&self) -> u8 {
        self.buf[5]
    }

    pub fn operation(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]])
    }

    pub fn sender_mac(&self) -> [u8; 6] {
        self.buf[8..14].try_into().unwrap()
    }

    pub fn sender_ip(&self) -> [u8; 4] {
        self.buf[14..18].try_into().unwrap()
    }

    pub fn target_mac(&self) -> [u8; 6] {
        self.buf[18..24].try_into().unwrap()
    }

    pub fn target_ip(&self) -> [u8; 4] {
        self.buf[24..28].try_into().unwrap()
    }
}

/// Writes an ARP request into `buf` (at least `HEADER_LEN` bytes),
/// asking who has `target_ip`.
pub fn write_request(buf: &mut [u8], sender_mac: [u8; 6], sender_ip: [u8; 4], target_ip: [u8; 4]) {
    write(buf, OP_REQUEST, sender_mac, sender_ip, [0u8; 6], target_ip);
}

/// Writes an ARP reply into `buf`, answering that `sender_ip` is at
/// `sender_mac`, addressed to `target_mac`/`target_ip`.
pub fn write_reply(
    buf: &mut [u8],
    sender_mac: [u8; 6],
    sender_ip: [u8; 4],
    target_mac: [u8; 6],
    target_ip: [u8; 4],
) {
    write(buf, OP_REPLY, sender_mac, sender_ip, target_mac, target_ip);
}

fn write(
    buf: &mut [u8],
    operation: u16,
    sender_mac: [u8; 6],
    sender_ip: [u8; 4],
    target_mac: [u8; 6],
    target_ip: [u8; 4],
) {
    buf[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
    buf[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
    buf[4] = 6;
    buf[5] = 4;
    buf[6..8].copy_from_slice(&operation.to_be_bytes());
    buf[8..14].copy_from_slice(&sender_mac);
    buf[14..18].copy_from_slice(&sender_ip);
    buf[18..24].copy_from_slice(&target_mac);
    buf[24..28].copy_from_slice(&target_ip);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let mut buf = [0u8; HEADER_LEN];
        write_request(&mut buf, [1, 2, 3, 4, 5, 6], [192, 168, 1, 1], [192, 168, 1, 103]);
        let pkt = ArpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.operation(), OP_REQUEST);
        assert_eq!(pkt.sender_mac(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(pkt.sender_ip(), [192, 168, 1, 1]);
        assert_eq!(pkt.target_ip(), [192, 168, 1, 103]);
        assert_eq!(pkt.target_mac(), [0; 6]);
    }

    #[test]
    fn reply_round_trip() {
        let mut buf = [0u8; HEADER_LEN];
        write_reply(
            &mut buf,
            [1, 2, 3, 4, 5, 6],
            [192, 168, 1, 1],
            [9, 9, 9, 9, 9, 9],
            [192, 168, 1, 103],
        );
        let pkt = ArpPacket::parse(&buf).unwrap();
        assert_eq!(pkt.operation(), OP_REPLY);
        assert_eq!(pkt.target_mac(), [9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn parse_rejects_non_ethernet_ipv4() {
        let mut buf = [0u8; HEADER_LEN];
        write_request(&mut buf, [0; 6], [0; 4], [0; 4]);
        buf[0..2].copy_from_slice(&7u16.to_be_bytes()); // bogus hardware type
        assert!(ArpPacket::parse(&buf).is_none());
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(ArpPacket::parse(&[0u8; HEADER_LEN - 1]).is_none());
    }
}
