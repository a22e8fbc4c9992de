//! The Ethernet/ARP/IPv4/ICMP/TCP/UDP forwarding engine: local
//! termination, NAT outbound and inbound, and ARP-cache learning.
//!
//! Every entry point takes a read-only frame and, at most, emits one
//! reply frame through the supplied [`NetDriver`] — no other side
//! effects beyond updating the ARP cache, the NAT table and an
//! interface's latched peer MAC.

use super::arp;
use super::arp_cache::ArpCache;
use super::config::{GATEWAY_LAN_IP, GATEWAY_WAN_IP, LAN_SUBNET_PREFIX, MAX_FRAME_LEN};
use super::driver::NetDriver;
use super::error::GatewayError;
use super::ethernet::{self, EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use super::icmp;
use super::interface::{Interface, Side};
use super::ipv4::{self, Ipv4Header, PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use super::nat::NatTable;
use super::transport;

fn is_local_ip(ip: [u8; 4]) -> bool {
    ip == GATEWAY_LAN_IP || ip == GATEWAY_WAN_IP
}

fn in_lan_subnet(ip: [u8; 4]) -> bool {
    ip[0..3] == LAN_SUBNET_PREFIX
}

pub struct Forwarder<'a, D: NetDriver> {
    pub driver: &'a D,
    pub lan: &'a mut Interface,
    pub wan: &'a mut Interface,
    pub nat: &'a mut NatTable,
    pub arp_cache: &'a mut ArpCache,
}

impl<'a, D: NetDriver> Forwarder<'a, D> {
    fn iface(&mut self, side: Side) -> &mut Interface {
        match side {
            Side::Lan => self.lan,
            Side::Wan => self.wan,
        }
    }

    /// Processes one received frame on `ingress`. Returns `true` if the
    /// frame was handled (replied to, forwarded, or used to learn an
    /// ARP binding); `false` if it was dropped outright.
    pub fn handle_frame(&mut self, ingress: Side, frame: &[u8], now: u32) -> bool {
        let Some(eth) = EthernetHeader::parse(frame) else {
            return false;
        };
        match eth.ethertype() {
            ETHERTYPE_ARP => self.handle_arp(ingress, frame),
            ETHERTYPE_IPV4 => self.handle_ipv4(ingress, frame, now),
            _ => false,
        }
    }

    fn handle_arp(&mut self, ingress: Side, frame: &[u8]) -> bool {
        let Some(pkt) = arp::ArpPacket::parse(&frame[ethernet::HEADER_LEN..]) else {
            return false;
        };
        let local_ip = self.iface(ingress).local_ip;

        if pkt.operation() == arp::OP_REQUEST {
            if pkt.target_ip() == local_ip {
                let local_mac = self.iface(ingress).device;
                let local_mac = self.driver.mac(local_mac);
                self.send_arp_reply(ingress, local_mac, local_ip, pkt.sender_mac(), pkt.sender_ip());
            }
            return true;
        }

        if pkt.operation() == arp::OP_REPLY {
            self.arp_cache.add(pkt.sender_ip(), pkt.sender_mac(), 0);
            let iface = self.iface(ingress);
            if pkt.target_ip() == iface.local_ip && pkt.sender_ip() == iface.peer_ip {
                iface.latch_peer_mac(pkt.sender_mac());
            }
            return true;
        }

        false
    }

    fn send_arp_reply(&mut self, ingress: Side, sender_mac: [u8; 6], sender_ip: [u8; 4], target_mac: [u8; 6], target_ip: [u8; 4]) {
        let mut buf = [0u8; ethernet::HEADER_LEN + arp::HEADER_LEN];
        ethernet::write_header(&mut buf, target_mac, sender_mac, ETHERTYPE_ARP);
        arp::write_reply(&mut buf[ethernet::HEADER_LEN..], sender_mac, sender_ip, target_mac, target_ip);
        let device = self.iface(ingress).device;
        let _ = self.driver.send(device, &buf);
    }

    fn handle_ipv4(&mut self, ingress: Side, frame: &[u8], now: u32) -> bool {
        let ip_offset = ethernet::HEADER_LEN;
        let Some(ip) = Ipv4Header::parse(&frame[ip_offset..]) else {
            return false;
        };
        self.arp_cache.add(ip.src(), EthernetHeader::parse(frame).unwrap().src_mac(), now);

        let local_ip = self.iface(ingress).local_ip;
        let dst_is_local =
            ip.dst() == local_ip || (ingress == Side::Lan && ip.dst() == GATEWAY_WAN_IP);

        if dst_is_local && ip.protocol() == PROTO_ICMP {
            if let Some(icmp) = icmp::IcmpHeader::parse(ip.payload()) {
                if icmp.icmp_type() == icmp::TYPE_ECHO_REQUEST {
                    return self.reply_echo(ingress, frame);
                }
            }
        }

        if ingress == Side::Lan && in_lan_subnet(ip.src()) && !is_local_ip(ip.dst()) {
            return self.nat_outbound(frame, now);
        }

        if ingress == Side::Wan && ip.dst() == GATEWAY_WAN_IP {
            return self.nat_inbound(frame, now);
        }

        // Destination IP observed, no local/NAT path matched: we've
        // already learned the ARP binding above (learn-only).
        true
    }

    fn reply_echo(&mut self, ingress: Side, frame: &[u8]) -> bool {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame.len().min(MAX_FRAME_LEN);
        buf[..len].copy_from_slice(&frame[..len]);

        ethernet::swap_addresses(&mut buf[..len]);

        let ip_offset = ethernet::HEADER_LEN;
        let header_len = Ipv4Header::parse(&buf[ip_offset..len]).map(|h| h.header_len());
        let Some(header_len) = header_len else { return false };
        let total_len = Ipv4Header::parse(&buf[ip_offset..len]).unwrap().total_len() as usize;

        ipv4::swap_src_dst(&mut buf[ip_offset..]);
        ipv4::set_ttl(&mut buf[ip_offset..], 64);
        ipv4::recompute_checksum(&mut buf[ip_offset..]);

        let icmp_offset = ip_offset + header_len;
        let icmp_len = total_len - header_len;
        icmp::set_type(&mut buf[icmp_offset..], icmp::TYPE_ECHO_REPLY);
        icmp::recompute_checksum(&mut buf[icmp_offset..], icmp_len);

        let device = self.iface(ingress).device;
        self.driver.send(device, &buf[..len]).is_ok()
    }

    fn nat_outbound(&mut self, frame: &[u8], now: u32) -> bool {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame.len().min(MAX_FRAME_LEN);
        buf[..len].copy_from_slice(&frame[..len]);

        let ip_offset = ethernet::HEADER_LEN;
        let (protocol, header_len, src_ip, dst_ip, total_len) = {
            let ip = Ipv4Header::parse(&buf[ip_offset..len]).unwrap();
            (ip.protocol(), ip.header_len(), ip.src(), ip.dst(), ip.total_len() as usize)
        };

        let wan_mac = self.driver.mac(self.wan.device);

        match protocol {
            PROTO_ICMP => {
                let icmp_offset = ip_offset + header_len;
                let Some(icmp) = icmp::IcmpHeader::parse(&buf[icmp_offset..len]) else { return false };
                if icmp.icmp_type() != icmp::TYPE_ECHO_REQUEST {
                    return false;
                }
                let Ok(wan_id) = self.nat.translate_outbound(PROTO_ICMP, src_ip, icmp.identifier(), dst_ip, 0, now) else {
                    return false;
                };
                let Some(dst_mac) = self.arp_cache.lookup(dst_ip) else {
                    return false; // ICMP: silent drop on ARP miss, no request emitted.
                };

                ethernet::write_header(&mut buf, dst_mac, wan_mac, ETHERTYPE_IPV4);
                ipv4::set_src(&mut buf[ip_offset..], GATEWAY_WAN_IP);
                let ttl = Ipv4Header::parse(&buf[ip_offset..len]).unwrap().ttl();
                ipv4::set_ttl(&mut buf[ip_offset..], ttl.saturating_sub(1));
                ipv4::recompute_checksum(&mut buf[ip_offset..]);
                let icmp_len = total_len - header_len;
                icmp::set_identifier(&mut buf[icmp_offset..], wan_id);
                icmp::recompute_checksum(&mut buf[icmp_offset..], icmp_len);

                self.driver.send(self.wan.device, &buf[..len]).is_ok()
            }
            PROTO_TCP | PROTO_UDP => {
                let transport_offset = ip_offset + header_len;
                if buf[transport_offset..len].len() < 4 {
                    return false;
                }
                let src_port = transport::src_port(&buf[transport_offset..len]);
                let dst_port = transport::dst_port(&buf[transport_offset..len]);

                let Ok(wan_port) = self.nat.translate_outbound(protocol, src_ip, src_port, dst_ip, dst_port, now) else {
                    return false;
                };

                let Some(dst_mac) = self.arp_cache.lookup(dst_ip) else {
                    self.send_arp_request(Side::Wan, dst_ip);
                    return false;
                };

                ethernet::write_header(&mut buf, dst_mac, wan_mac, ETHERTYPE_IPV4);
                ipv4::set_src(&mut buf[ip_offset..], GATEWAY_WAN_IP);
                let ttl = Ipv4Header::parse(&buf[ip_offset..len]).unwrap().ttl();
                ipv4::set_ttl(&mut buf[ip_offset..], ttl.saturating_sub(1));
                ipv4::recompute_checksum(&mut buf[ip_offset..]);
                transport::set_src_port(&mut buf[transport_offset..], wan_port);
                let transport_len = total_len - header_len;
                transport::recompute_checksum(&mut buf[transport_offset..], transport_len, protocol, GATEWAY_WAN_IP, dst_ip);

                self.driver.send(self.wan.device, &buf[..len]).is_ok()
            }
            _ => false,
        }
    }

    fn nat_inbound(&mut self, frame: &[u8], now: u32) -> bool {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = frame.len().min(MAX_FRAME_LEN);
        buf[..len].copy_from_slice(&frame[..len]);

        let ip_offset = ethernet::HEADER_LEN;
        let (protocol, header_len, src_ip, total_len) = {
            let ip = Ipv4Header::parse(&buf[ip_offset..len]).unwrap();
            (ip.protocol(), ip.header_len(), ip.src(), ip.total_len() as usize)
        };

        let (wan_port, src_port) = match protocol {
            PROTO_ICMP => {
                let icmp_offset = ip_offset + header_len;
                let Some(icmp) = icmp::IcmpHeader::parse(&buf[icmp_offset..len]) else { return false };
                if icmp.icmp_type() != icmp::TYPE_ECHO_REPLY {
                    return false;
                }
                (icmp.identifier(), 0)
            }
            PROTO_TCP | PROTO_UDP => {
                let transport_offset = ip_offset + header_len;
                if buf[transport_offset..len].len() < 4 {
                    return false;
                }
                (transport::dst_port(&buf[transport_offset..len]), transport::src_port(&buf[transport_offset..len]))
            }
            _ => return false,
        };

        let Ok((lan_ip, lan_port)) = self.nat.translate_inbound(protocol, wan_port, src_ip, src_port, now) else {
            return false;
        };

        let Some(dst_mac) = self.arp_cache.lookup(lan_ip) else {
            return false;
        };
        let lan_mac = self.driver.mac(self.lan.device);

        ethernet::write_header(&mut buf, dst_mac, lan_mac, ETHERTYPE_IPV4);
        ipv4::set_dst(&mut buf[ip_offset..], lan_ip);
        let ttl = Ipv4Header::parse(&buf[ip_offset..len]).unwrap().ttl();
        ipv4::set_ttl(&mut buf[ip_offset..], ttl.saturating_sub(1));
        ipv4::recompute_checksum(&mut buf[ip_offset..]);

        match protocol {
            PROTO_ICMP => {
                let icmp_offset = ip_offset + header_len;
                let icmp_len = total_len - header_len;
                icmp::set_identifier(&mut buf[icmp_offset..], lan_port);
                icmp::recompute_checksum(&mut buf[icmp_offset..], icmp_len);
            }
            PROTO_TCP | PROTO_UDP => {
                let transport_offset = ip_offset + header_len;
                let transport_len = total_len - header_len;
                transport::set_dst_port(&mut buf[transport_offset..], lan_port);
                transport::recompute_checksum(&mut buf[transport_offset..], transport_len, protocol, src_ip, lan_ip);
            }
            _ => {}
        }

        self.driver.send(self.lan.device, &buf[..len]).is_ok()
    }

    /// Sends a best-effort ARP "who-has" request for `ip` out `side`.
    pub fn send_arp_request(&mut self, side: Side, ip: [u8; 4]) {
        let iface_mac = self.driver.mac(self.iface(side).device);
        let iface_ip = self.iface(side).local_ip;
        let mut buf = [0u8; ethernet::HEADER_LEN + arp::HEADER_LEN];
        ethernet::write_header(&mut buf, ethernet::BROADCAST_MAC, iface_mac, ETHERTYPE_ARP);
        arp::write_request(&mut buf[ethernet::HEADER_LEN..], iface_mac, iface_ip, ip);
        let device = self.iface(side).device;
        let _ = self.driver.send(device, &buf);
    }

    /// Sends an ICMP echo request from `side` to its configured peer,
    /// used by the control loop as periodic liveness/test traffic.
    pub fn send_test_ping(&mut self, side: Side, identifier: u16, sequence: u16) -> Result<(), GatewayError> {
        let iface = self.iface(side);
        let (local_ip, peer_ip, peer_mac, device) = (iface.local_ip, iface.peer_ip, iface.peer_mac, iface.device);
        let local_mac = self.driver.mac(device);

        const LEN: usize = ethernet::HEADER_LEN + ipv4::MIN_HEADER_LEN + icmp::HEADER_LEN;
        let mut buf = [0u8; LEN];
        ethernet::write_header(&mut buf, peer_mac, local_mac, ETHERTYPE_IPV4);

        let ip_offset = ethernet::HEADER_LEN;
        buf[ip_offset] = 0x45;
        let total_len = (ipv4::MIN_HEADER_LEN + icmp::HEADER_LEN) as u16;
        buf[ip_offset + 2..ip_offset + 4].copy_from_slice(&total_len.to_be_bytes());
        buf[ip_offset + 8] = 64;
        buf[ip_offset + 9] = PROTO_ICMP;
        ipv4::set_src(&mut buf[ip_offset..], local_ip);
        ipv4::set_dst(&mut buf[ip_offset..], peer_ip);
        ipv4::recompute_checksum(&mut buf[ip_offset..]);

        let icmp_offset = ip_offset + ipv4::MIN_HEADER_LEN;
        icmp::set_type(&mut buf[icmp_offset..], icmp::TYPE_ECHO_REQUEST);
        icmp::set_identifier(&mut buf[icmp_offset..], identifier);
        buf[icmp_offset + 6..icmp_offset + 8].copy_from_slice(&sequence.to_be_bytes());
        icmp::recompute_checksum(&mut buf[icmp_offset..], icmp::HEADER_LEN);

        self.driver.send(device, &buf)
    }
}
