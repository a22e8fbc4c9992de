//! IP-to-MAC binding cache with oldest-wins LRU replacement and aging.

use super::config::{ARP_TABLE_SIZE, ARP_TIMEOUT_S};

#[derive(Clone, Copy)]
struct Entry {
    active: bool,
    ip: [u8; 4],
    mac: [u8; 6],
    last_update: u32,
}

impl Entry {
    const EMPTY: Self = Self {
        active: false,
        ip: [0; 4],
        mac: [0; 6],
        last_update: 0,
    };
}

/// Fixed-capacity ARP cache. Entries are also populated implicitly by
/// the forwarding engine whenever an IPv4 packet's source address is
/// observed, not only in response to explicit ARP traffic.
pub struct ArpCache {
    entries: [Entry; ARP_TABLE_SIZE],
}

impl ArpCache {
    pub const fn new() -> Self {
        Self {
            entries: [Entry::EMPTY; ARP_TABLE_SIZE],
        }
    }

    /// Updates the binding if `ip` is already present, otherwise
    /// inserts into the first inactive slot, otherwise evicts the
    /// entry with the oldest `last_update`.
    pub fn add(&mut self, ip: [u8; 4], mac: [u8; 6], now: u32) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.active && e.ip == ip) {
            e.mac = mac;
            e.last_update = now;
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| !e.active) {
            *e = Entry { active: true, ip, mac, last_update: now };
            return;
        }
        let oldest = self
            .entries
            .iter_mut()
            .min_by_key(|e| e.last_update)
            .expect("ARP_TABLE_SIZE is nonzero");
        *oldest = Entry { active: true, ip, mac, last_update: now };
    }

    pub fn lookup(&self, ip: [u8; 4]) -> Option<[u8; 6]> {
        self.entries.iter().find(|e| e.active && e.ip == ip).map(|e| e.mac)
    }

    /// Evicts every entry whose `last_update` is more than
    /// `ARP_TIMEOUT_S` seconds behind `now` (both in ticks).
    pub fn cleanup(&mut self, now: u32) {
        for e in self.entries.iter_mut() {
            if e.active && super::timebase::ticks_to_secs(now.wrapping_sub(e.last_update)) > ARP_TIMEOUT_S {
                *e = Entry::EMPTY;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.iter().filter(|e| e.active).count()
    }

    /// Logs every active binding, mirroring the grounding source's
    /// `arp_cache_print` debug dump.
    pub fn dump(&self) {
        for e in self.entries.iter().filter(|e| e.active) {
            log::debug!(
                target: "ARP",
                "{}.{}.{}.{} -> {:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                e.ip[0], e.ip[1], e.ip[2], e.ip[3],
                e.mac[0], e.mac[1], e.mac[2], e.mac[3], e.mac[4], e.mac[5],
            );
        }
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::config::TICK_HZ;

    #[test]
    fn add_then_lookup() {
        let mut cache = ArpCache::new();
        cache.add([192, 168, 1, 103], [1, 2, 3, 4, 5, 6], 0);
        assert_eq!(cache.lookup([192, 168, 1, 103]), Some([1, 2, 3, 4, 5, 6]));
        assert_eq!(cache.lookup([192, 168, 1, 104]), None);
    }

    #[test]
    fn add_updates_existing_ip_in_place() {
        let mut cache = ArpCache::new();
        cache.add([192, 168, 1, 103], [1, 1, 1, 1, 1, 1], 0);
        cache.add([192, 168, 1, 103], [2, 2, 2, 2, 2, 2], 10);
        assert_eq!(cache.active_count(), 1);
        assert_eq!(cache.lookup([192, 168, 1, 103]), Some([2, 2, 2, 2, 2, 2]));
    }

    #[test]
    fn no_two_active_entries_share_an_ip() {
        let mut cache = ArpCache::new();
        for i in 0..(ARP_TABLE_SIZE as u32 + 5) {
            cache.add([192, 168, 1, 103], [i as u8; 6], i);
        }
        assert_eq!(cache.active_count(), 1);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut cache = ArpCache::new();
        for i in 0..ARP_TABLE_SIZE {
            cache.add([10, 0, 0, i as u8], [i as u8; 6], i as u32);
        }
        // All slots full; the next insert should evict IP 0 (oldest).
        cache.add([10, 0, 1, 0], [0xAA; 6], ARP_TABLE_SIZE as u32);
        assert_eq!(cache.lookup([10, 0, 0, 0]), None);
        assert_eq!(cache.lookup([10, 0, 1, 0]), Some([0xAA; 6]));
    }

    #[test]
    fn cleanup_evicts_entries_past_timeout() {
        let mut cache = ArpCache::new();
        let tick_at_insert = 0u32;
        cache.add([192, 168, 1, 103], [1; 6], tick_at_insert);
        let still_fresh = (ARP_TIMEOUT_S - 1) * TICK_HZ;
        cache.cleanup(still_fresh);
        assert!(cache.lookup([192, 168, 1, 103]).is_some());

        let aged_out = (ARP_TIMEOUT_S + 1) * TICK_HZ;
        cache.cleanup(aged_out);
        assert!(cache.lookup([192, 168, 1, 103]).is_none());
    }
}
