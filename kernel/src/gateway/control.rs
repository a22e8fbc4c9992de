//! The gateway's control loop: owns both interfaces, the NAT table and
//! ARP cache, and drives the forwarding engine from polled device state.
//!
//! Replaces the source's file-scope mutable globals with a single
//! owning `Gateway` value; components are borrowed into operations
//! rather than reached for directly.

use super::arp_cache::ArpCache;
use super::config::{
    GATEWAY_LAN_IP, GATEWAY_WAN_IP, IDLE_ITERATIONS_PER_GRATUITOUS_ARP, ITERATIONS_PER_TEST_PING,
    MAX_FRAME_LEN,
};
use super::driver::NetDriver;
use super::forwarding::Forwarder;
use super::interface::{Interface, Side};
use super::nat::NatTable;

/// LAN and WAN device indices, fixed by the driver's scan order.
const LAN_DEVICE: usize = 0;
const WAN_DEVICE: usize = 1;

pub struct Gateway {
    lan: Interface,
    wan: Interface,
    nat: NatTable,
    arp_cache: ArpCache,
    idle_iterations: u32,
    ping_identifier: u16,
}

impl Gateway {
    pub const fn new(lan_peer_ip: [u8; 4], wan_peer_ip: [u8; 4]) -> Self {
        Self {
            lan: Interface::new(Side::Lan, "lan0", LAN_DEVICE, GATEWAY_LAN_IP, lan_peer_ip),
            wan: Interface::new(Side::Wan, "wan0", WAN_DEVICE, GATEWAY_WAN_IP, wan_peer_ip),
            nat: NatTable::new(),
            arp_cache: ArpCache::new(),
            idle_iterations: 0,
            ping_identifier: 0xC0DE,
        }
    }

    pub fn nat_stats(&self) -> super::nat::Stats {
        self.nat.stats()
    }

    /// Runs one sweep: drains pending RX on both interfaces, paces
    /// gratuitous ARP and test-ping traffic, then ages NAT/ARP state.
    /// Returns the number of frames actually processed, for callers
    /// that want to pace sleeping themselves.
    pub fn sweep<D: NetDriver>(&mut self, driver: &D, now: u32) -> usize {
        let mut processed = 0usize;
        let mut buf = [0u8; MAX_FRAME_LEN];

        for side in [Side::Lan, Side::Wan] {
            let device = self.iface(side).device;
            while driver.has_pending(device) {
                let Ok(Some(len)) = driver.poll(device, &mut buf) else {
                    break;
                };
                let mut fwd = Forwarder {
                    driver,
                    lan: &mut self.lan,
                    wan: &mut self.wan,
                    nat: &mut self.nat,
                    arp_cache: &mut self.arp_cache,
                };
                if fwd.handle_frame(side, &buf[..len], now) {
                    processed += 1;
                }
            }
        }

        if processed == 0 {
            self.idle_iterations += 1;
            if self.idle_iterations >= IDLE_ITERATIONS_PER_GRATUITOUS_ARP {
                self.idle_iterations = 0;
                self.send_gratuitous_arp(driver, Side::Lan);
                self.send_gratuitous_arp(driver, Side::Wan);
            }
        } else {
            self.idle_iterations = 0;
        }

        self.maybe_send_test_ping(driver, Side::Lan);
        self.maybe_send_test_ping(driver, Side::Wan);

        self.nat.cleanup(now);
        self.arp_cache.cleanup(now);

        processed
    }

    fn iface(&mut self, side: Side) -> &mut Interface {
        match side {
            Side::Lan => &mut self.lan,
            Side::Wan => &mut self.wan,
        }
    }

    fn send_gratuitous_arp<D: NetDriver>(&mut self, driver: &D, side: Side) {
        let peer_ip = self.iface(side).peer_ip;
        log::trace!(target: "net-demo", "idle, sending gratuitous ARP on {}", self.iface(side).name);
        let mut fwd = Forwarder {
            driver,
            lan: &mut self.lan,
            wan: &mut self.wan,
            nat: &mut self.nat,
            arp_cache: &mut self.arp_cache,
        };
        fwd.send_arp_request(side, peer_ip);
    }

    fn maybe_send_test_ping<D: NetDriver>(&mut self, driver: &D, side: Side) {
        let iface = self.iface(side);
        if !iface.peer_mac_valid {
            return;
        }
        iface.success_iterations += 1;
        if iface.success_iterations < ITERATIONS_PER_TEST_PING {
            return;
        }
        iface.success_iterations = 0;

        self.ping_identifier = self.ping_identifier.wrapping_add(1);
        log::trace!(target: "net-demo", "sending test ping on {}", self.iface(side).name);
        let mut fwd = Forwarder {
            driver,
            lan: &mut self.lan,
            wan: &mut self.wan,
            nat: &mut self.nat,
            arp_cache: &mut self.arp_cache,
        };
        let _ = fwd.send_test_ping(side, self.ping_identifier, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::driver::fake::{FakeDevice, FakeDriver};
    use super::super::ethernet::{self, ETHERTYPE_IPV4};
    use super::super::{arp, icmp, ipv4};

    fn build_icmp_echo(
        dst_mac: [u8; 6],
        src_mac: [u8; 6],
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        id: u16,
    ) -> [u8; ethernet::HEADER_LEN + ipv4::MIN_HEADER_LEN + icmp::HEADER_LEN] {
        const LEN: usize = ethernet::HEADER_LEN + ipv4::MIN_HEADER_LEN + icmp::HEADER_LEN;
        let mut buf = [0u8; LEN];
        ethernet::write_header(&mut buf, dst_mac, src_mac, ETHERTYPE_IPV4);
        let ip_offset = ethernet::HEADER_LEN;
        buf[ip_offset] = 0x45;
        let total_len = (ipv4::MIN_HEADER_LEN + icmp::HEADER_LEN) as u16;
        buf[ip_offset + 2..ip_offset + 4].copy_from_slice(&total_len.to_be_bytes());
        buf[ip_offset + 8] = 64;
        buf[ip_offset + 9] = ipv4::PROTO_ICMP;
        ipv4::set_src(&mut buf[ip_offset..], src_ip);
        ipv4::set_dst(&mut buf[ip_offset..], dst_ip);
        ipv4::recompute_checksum(&mut buf[ip_offset..]);
        let icmp_offset = ip_offset + ipv4::MIN_HEADER_LEN;
        icmp::set_type(&mut buf[icmp_offset..], icmp::TYPE_ECHO_REQUEST);
        icmp::set_identifier(&mut buf[icmp_offset..], id);
        icmp::recompute_checksum(&mut buf[icmp_offset..], icmp::HEADER_LEN);
        buf
    }

    #[test]
    fn sweep_processes_pending_frames_on_both_interfaces() {
        let devices = [FakeDevice::new([0x02, 0, 0, 0, 0, 1]), FakeDevice::new([0x02, 0, 0, 0, 0, 2])];
        let driver = FakeDriver::new(&devices);
        let mut gw = Gateway::new([192, 168, 1, 254], [10, 3, 5, 1]);

        let frame = build_icmp_echo(driver.mac(0), [0xAA; 6], [192, 168, 1, 103], GATEWAY_LAN_IP, 7);
        devices[0].push_rx(&frame);

        let processed = gw.sweep(&driver, 0);
        assert_eq!(processed, 1);
        assert!(devices[0].pop_tx().is_some());
    }

    #[test]
    fn idle_sweeps_eventually_emit_gratuitous_arp() {
        let devices = [FakeDevice::new([0x02, 0, 0, 0, 0, 1]), FakeDevice::new([0x02, 0, 0, 0, 0, 2])];
        let driver = FakeDriver::new(&devices);
        let mut gw = Gateway::new([192, 168, 1, 254], [10, 3, 5, 1]);

        for _ in 0..IDLE_ITERATIONS_PER_GRATUITOUS_ARP {
            gw.sweep(&driver, 0);
        }

        let lan_frame = devices[0].pop_tx().expect("gratuitous ARP on LAN");
        let pkt = arp::ArpPacket::parse(&lan_frame[ethernet::HEADER_LEN..]).unwrap();
        assert_eq!(pkt.operation(), arp::OP_REQUEST);
        assert_eq!(pkt.target_ip(), [192, 168, 1, 254]);
        assert!(devices[1].pop_tx().is_some());
    }

    #[test]
    fn cleanup_runs_every_sweep_and_ages_nat_sessions() {
        let devices = [FakeDevice::new([0x02, 0, 0, 0, 0, 1]), FakeDevice::new([0x02, 0, 0, 0, 0, 2])];
        let driver = FakeDriver::new(&devices);
        let mut gw = Gateway::new([192, 168, 1, 254], [10, 3, 5, 1]);

        gw.nat.configure(super::super::config::NAT_PORT_RANGE_START);
        gw.nat.translate_outbound(ipv4::PROTO_ICMP, [192, 168, 1, 103], 1, [10, 3, 5, 103], 0, 0).unwrap();
        assert_eq!(gw.nat_stats().outbound_translations, 1);

        let aged = (super::super::config::NAT_TIMEOUT_ICMP_S + 1) * super::super::config::TICK_HZ;
        gw.sweep(&driver, aged);
        assert_eq!(gw.nat_stats().timeouts, 1);
    }
}
