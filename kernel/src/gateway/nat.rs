//! The NAT session table: a bounded, aging, protocol-aware 5-tuple
//! table with an O(1)-typical reverse-lookup hash and a linear-scan
//! fallback for collisions.
//!
//! The hash table deliberately tolerates a known degradation: a
//! colliding insert overwrites an older entry's bucket pointer, and
//! that older entry is only reachable by the full linear scan from
//! then on. This is preserved exactly as documented rather than fixed
//! with collision chaining (see SPEC_FULL.md §9, open question 1).

use super::config::{
    NAT_HASH_SIZE, NAT_PORT_RANGE_END, NAT_PORT_RANGE_START, NAT_TABLE_SIZE,
    NAT_TIMEOUT_ICMP_S, NAT_TIMEOUT_TCP_INIT_S, NAT_TIMEOUT_UDP_S,
};
use super::error::GatewayError;
use super::ipv4::{PROTO_ICMP, PROTO_TCP, PROTO_UDP};
use super::timebase::ticks_to_secs;

const EMPTY_BUCKET: i32 = -1;

#[derive(Clone, Copy)]
struct Entry {
    active: bool,
    protocol: u8,
    lan_ip: [u8; 4],
    lan_port: u16,
    wan_port: u16,
    dst_ip: [u8; 4],
    dst_port: u16,
    last_activity: u32,
    timeout_s: u32,
}

impl Entry {
    const EMPTY: Self = Self {
        active: false,
        protocol: 0,
        lan_ip: [0; 4],
        lan_port: 0,
        wan_port: 0,
        dst_ip: [0; 4],
        dst_port: 0,
        last_activity: 0,
        timeout_s: 0,
    };

    fn matches_outbound(&self, protocol: u8, lan_ip: [u8; 4], lan_port: u16, dst_ip: [u8; 4], dst_port: u16) -> bool {
        self.active
            && self.protocol == protocol
            && self.lan_ip == lan_ip
            && self.lan_port == lan_port
            && self.dst_ip == dst_ip
            && self.dst_port == dst_port
    }

    fn matches_inbound(&self, protocol: u8, wan_port: u16, src_ip: [u8; 4], src_port: u16) -> bool {
        self.active
            && self.protocol == protocol
            && self.wan_port == wan_port
            && self.dst_ip == src_ip
            && self.dst_port == src_port
    }
}

#[derive(Default, Clone, Copy)]
pub struct Stats {
    pub outbound_translations: u32,
    pub inbound_translations: u32,
    pub table_full_errors: u32,
    pub no_match_errors: u32,
    pub timeouts: u32,
}

fn timeout_for(protocol: u8) -> u32 {
    match protocol {
        PROTO_ICMP => NAT_TIMEOUT_ICMP_S,
        PROTO_UDP => NAT_TIMEOUT_UDP_S,
        PROTO_TCP => NAT_TIMEOUT_TCP_INIT_S,
        _ => NAT_TIMEOUT_TCP_INIT_S,
    }
}

fn bucket_of(wan_port: u16) -> usize {
    wan_port as usize % NAT_HASH_SIZE
}

pub struct NatTable {
    entries: [Entry; NAT_TABLE_SIZE],
    hash: [i32; NAT_HASH_SIZE],
    next_port: u16,
    stats: Stats,
}

impl NatTable {
    pub const fn new() -> Self {
        Self {
            entries: [Entry::EMPTY; NAT_TABLE_SIZE],
            hash: [EMPTY_BUCKET; NAT_HASH_SIZE],
            next_port: NAT_PORT_RANGE_START,
            stats: Stats {
                outbound_translations: 0,
                inbound_translations: 0,
                table_full_errors: 0,
                no_match_errors: 0,
                timeouts: 0,
            },
        }
    }

    /// Overridable at boot, before the table starts accepting
    /// sessions; does not introduce a runtime-parsed config surface
    /// (the compile-time constants remain `Gateway::new()`'s
    /// defaults).
    pub fn configure(&mut self, port_range_start: u16) {
        self.next_port = port_range_start;
    }

    fn allocate_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = if self.next_port >= NAT_PORT_RANGE_END {
            NAT_PORT_RANGE_START
        } else {
            self.next_port + 1
        };
        port
    }

    /// Finds or creates a session for an outbound 5-tuple, returning
    /// the allocated WAN-facing port (or ICMP identifier).
    pub fn translate_outbound(
        &mut self,
        protocol: u8,
        lan_ip: [u8; 4],
        lan_port: u16,
        dst_ip: [u8; 4],
        dst_port: u16,
        now: u32,
    ) -> Result<u16, GatewayError> {
        if let Some(e) = self
            .entries
            .iter_mut()
            .find(|e| e.matches_outbound(protocol, lan_ip, lan_port, dst_ip, dst_port))
        {
            e.last_activity = now;
            self.stats.outbound_translations += 1;
            return Ok(e.wan_port);
        }

        let slot = self.entries.iter().position(|e| !e.active);
        let Some(slot) = slot else {
            self.stats.table_full_errors += 1;
            log::warn!(target: "NAT", "session table full, dropping new outbound flow");
            return Err(GatewayError::NatTableFull);
        };

        let wan_port = self.allocate_port();
        self.entries[slot] = Entry {
            active: true,
            protocol,
            lan_ip,
            lan_port,
            wan_port,
            dst_ip,
            dst_port,
            last_activity: now,
            timeout_s: timeout_for(protocol),
        };
        // Overwrites any prior occupant of this bucket; the prior
        // entry remains reachable only via the linear-scan fallback.
        self.hash[bucket_of(wan_port)] = slot as i32;

        self.stats.outbound_translations += 1;
        Ok(wan_port)
    }

    /// Resolves an inbound packet's WAN-facing tuple back to the LAN
    /// originator. Probes the hash bucket first; falls back to a
    /// linear scan only when the bucket points at a non-matching
    /// entry (a collision), never when the bucket is empty.
    pub fn translate_inbound(
        &mut self,
        protocol: u8,
        wan_port: u16,
        src_ip: [u8; 4],
        src_port: u16,
        now: u32,
    ) -> Result<([u8; 4], u16), GatewayError> {
        let bucket = self.hash[bucket_of(wan_port)];
        if bucket == EMPTY_BUCKET {
            self.stats.no_match_errors += 1;
            return Err(GatewayError::NatNoMatch);
        }

        let idx = bucket as usize;
        if self.entries[idx].matches_inbound(protocol, wan_port, src_ip, src_port) {
            self.entries[idx].last_activity = now;
            self.stats.inbound_translations += 1;
            let e = &self.entries[idx];
            return Ok((e.lan_ip, e.lan_port));
        }

        if let Some(i) = self
            .entries
            .iter()
            .position(|e| e.matches_inbound(protocol, wan_port, src_ip, src_port))
        {
            self.entries[i].last_activity = now;
            self.stats.inbound_translations += 1;
            let e = &self.entries[i];
            return Ok((e.lan_ip, e.lan_port));
        }

        self.stats.no_match_errors += 1;
        Err(GatewayError::NatNoMatch)
    }

    /// Ages out entries whose inactivity exceeds their timeout class.
    /// A bucket is cleared only if it still points at the entry being
    /// aged out; a bucket that a newer colliding insert has since
    /// overwritten is left untouched.
    pub fn cleanup(&mut self, now: u32) {
        for (i, e) in self.entries.iter_mut().enumerate() {
            if !e.active {
                continue;
            }
            if ticks_to_secs(now.wrapping_sub(e.last_activity)) > e.timeout_s {
                let bucket = bucket_of(e.wan_port);
                if self.hash[bucket] == i as i32 {
                    self.hash[bucket] = EMPTY_BUCKET;
                }
                e.active = false;
                self.stats.timeouts += 1;
            }
        }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = Stats::default();
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }

    /// Logs every active session, mirroring the grounding source's
    /// `nat_print_table` debug dump.
    pub fn dump(&self) {
        for e in self.entries.iter().filter(|e| e.active) {
            log::debug!(
                target: "NAT",
                "proto={} {}.{}.{}.{}:{} -> wan:{} -> {}.{}.{}.{}:{} (timeout {}s)",
                e.protocol,
                e.lan_ip[0], e.lan_ip[1], e.lan_ip[2], e.lan_ip[3], e.lan_port,
                e.wan_port,
                e.dst_ip[0], e.dst_ip[1], e.dst_ip[2], e.dst_ip[3], e.dst_port,
                e.timeout_s,
            );
        }
    }
}

impl Default for NatTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::config::TICK_HZ;

    const LAN_IP: [u8; 4] = [192, 168, 1, 103];
    const DST_IP: [u8; 4] = [10, 3, 5, 103];

    #[test]
    fn round_trip_translation() {
        let mut nat = NatTable::new();
        let wan_port = nat
            .translate_outbound(PROTO_ICMP, LAN_IP, 0x1234, DST_IP, 0, 0)
            .unwrap();
        assert_eq!(wan_port, NAT_PORT_RANGE_START);
        let (lan_ip, lan_port) = nat.translate_inbound(PROTO_ICMP, wan_port, DST_IP, 0, 1).unwrap();
        assert_eq!(lan_ip, LAN_IP);
        assert_eq!(lan_port, 0x1234);
    }

    #[test]
    fn idempotent_outbound_for_identical_tuple() {
        let mut nat = NatTable::new();
        let a = nat.translate_outbound(PROTO_TCP, LAN_IP, 54321, DST_IP, 80, 0).unwrap();
        let b = nat.translate_outbound(PROTO_TCP, LAN_IP, 54321, DST_IP, 80, 5).unwrap();
        assert_eq!(a, b);
        assert_eq!(nat.active_count(), 1);
    }

    #[test]
    fn wan_port_always_in_configured_range() {
        let mut nat = NatTable::new();
        for i in 0..NAT_TABLE_SIZE {
            let port = nat
                .translate_outbound(PROTO_UDP, LAN_IP, 1000 + i as u16, DST_IP, 53, 0)
                .unwrap();
            assert!(port >= NAT_PORT_RANGE_START && port <= NAT_PORT_RANGE_END);
        }
    }

    #[test]
    fn table_full_then_reuse_after_aging() {
        let mut nat = NatTable::new();
        for i in 0..NAT_TABLE_SIZE {
            nat.translate_outbound(PROTO_UDP, LAN_IP, 1000 + i as u16, DST_IP, 53, 0).unwrap();
        }
        let full = nat.translate_outbound(PROTO_UDP, LAN_IP, 9999, DST_IP, 53, 0);
        assert_eq!(full, Err(GatewayError::NatTableFull));
        assert_eq!(nat.stats().table_full_errors, 1);

        let aged = (NAT_TIMEOUT_UDP_S + 1) * TICK_HZ;
        nat.cleanup(aged);
        assert!(nat.translate_outbound(PROTO_UDP, LAN_IP, 9999, DST_IP, 53, aged).is_ok());
    }

    #[test]
    fn port_allocator_wraps() {
        let mut nat = NatTable::new();
        nat.configure(NAT_PORT_RANGE_END);
        let first = nat.translate_outbound(PROTO_ICMP, LAN_IP, 1, DST_IP, 0, 0).unwrap();
        assert_eq!(first, NAT_PORT_RANGE_END);
        let second = nat.translate_outbound(PROTO_ICMP, LAN_IP, 2, DST_IP, 0, 0).unwrap();
        assert_eq!(second, NAT_PORT_RANGE_START);
    }

    #[test]
    fn hash_collision_both_sessions_findable_by_linear_scan() {
        let mut nat = NatTable::new();
        nat.configure(NAT_PORT_RANGE_START);
        let wan_a = nat.translate_outbound(PROTO_UDP, LAN_IP, 1, DST_IP, 53, 0).unwrap();
        // Force a second port that hashes to the same bucket.
        nat.next_port = wan_a.wrapping_add(NAT_HASH_SIZE as u16);
        let wan_b = nat.translate_outbound(PROTO_UDP, LAN_IP, 2, DST_IP, 53, 0).unwrap();
        assert_eq!(bucket_of(wan_a), bucket_of(wan_b));

        // The bucket now points at the newer entry (b); the older
        // entry (a) is reachable only via linear scan.
        let (lan_ip_b, lan_port_b) = nat.translate_inbound(PROTO_UDP, wan_b, DST_IP, 53, 0).unwrap();
        assert_eq!((lan_ip_b, lan_port_b), (LAN_IP, 2));
        let (lan_ip_a, lan_port_a) = nat.translate_inbound(PROTO_UDP, wan_a, DST_IP, 53, 0).unwrap();
        assert_eq!((lan_ip_a, lan_port_a), (LAN_IP, 1));
    }

    #[test]
    fn aging_marks_unused_entry_inactive_and_clears_bucket() {
        let mut nat = NatTable::new();
        let wan_port = nat.translate_outbound(PROTO_ICMP, LAN_IP, 1, DST_IP, 0, 0).unwrap();
        nat.cleanup((NAT_TIMEOUT_ICMP_S + 1) * TICK_HZ);
        assert_eq!(nat.active_count(), 0);
        assert_eq!(
            nat.translate_inbound(PROTO_ICMP, wan_port, DST_IP, 0, 0),
            Err(GatewayError::NatNoMatch)
        );
        assert_eq!(nat.stats().timeouts, 1);
    }

    #[test]
    fn cleanup_leaves_overwritten_bucket_alone() {
        let mut nat = NatTable::new();
        nat.configure(NAT_PORT_RANGE_START);
        let wan_a = nat.translate_outbound(PROTO_UDP, LAN_IP, 1, DST_IP, 53, 0).unwrap();
        nat.next_port = wan_a.wrapping_add(NAT_HASH_SIZE as u16);
        let wan_b = nat
            .translate_outbound(PROTO_UDP, LAN_IP, 2, DST_IP, 53, NAT_TIMEOUT_UDP_S * TICK_HZ)
            .unwrap();
        let bucket = bucket_of(wan_a);
        assert_eq!(bucket, bucket_of(wan_b));

        // Age out `a` only; its bucket (now owned by `b`) must not be cleared.
        nat.cleanup((NAT_TIMEOUT_UDP_S + 1) * TICK_HZ);
        assert!(nat.translate_inbound(PROTO_UDP, wan_b, DST_IP, 53, 0).is_ok());
    }
}
