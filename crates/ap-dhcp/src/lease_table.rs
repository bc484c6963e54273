use std::net::Ipv4Addr;

use crate::packet::format_mac;

/// An all-zero hardware address marks an unused slot.
pub const NO_HARDWARE_ADDRESS: [u8; 6] = [0; 6];

/// One slot of the lease table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lease {
    pub hardware_address: [u8; 6],
    /// Monotonic clock reading (ms) after which the slot may be reclaimed.
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_free(&self) -> bool {
        self.hardware_address == NO_HARDWARE_ADDRESS
    }

    /// A lease is expired once its deadline lies strictly in the past.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms < now_ms
    }

    pub fn mac_str(&self) -> String {
        format_mac(&self.hardware_address)
    }
}

/// Snapshot of an assigned slot, for logs and status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveLease {
    pub index: usize,
    pub mac: String,
    pub ip: Ipv4Addr,
    pub remaining_secs: u64,
}

/// Fixed-capacity lease table indexed by pool slot.
///
/// Slot `i` maps to the address whose last octet is `pool_base + i`. At most
/// one slot holds a given non-zero hardware address.
#[derive(Debug, Clone)]
pub struct LeaseTable {
    leases: Vec<Lease>,
    pool_base: u8,
}

impl LeaseTable {
    pub fn new(pool_base: u8, pool_size: usize) -> Self {
        Self {
            leases: vec![Lease::default(); pool_size],
            pool_base,
        }
    }

    pub fn capacity(&self) -> usize {
        self.leases.len()
    }

    pub fn get(&self, index: usize) -> Option<&Lease> {
        self.leases.get(index)
    }

    /// Find the slot holding `mac`.
    pub fn find_by_hardware_address(&self, mac: &[u8; 6]) -> Option<usize> {
        if *mac == NO_HARDWARE_ADDRESS {
            return None;
        }
        self.leases.iter().position(|l| l.hardware_address == *mac)
    }

    /// First slot that is unused or whose lease has expired.
    pub fn find_free_or_expired_slot(&self, now_ms: u64) -> Option<usize> {
        self.leases
            .iter()
            .position(|l| l.is_free() || l.is_expired(now_ms))
    }

    /// Bind `mac` to slot `index`. Any other slot holding the same address
    /// is released so the address stays unique. The all-zero address is
    /// the free marker and is never bound.
    pub fn allocate(&mut self, index: usize, mac: [u8; 6]) {
        if index >= self.leases.len() || mac == NO_HARDWARE_ADDRESS {
            return;
        }
        for (i, lease) in self.leases.iter_mut().enumerate() {
            if i != index && lease.hardware_address == mac {
                *lease = Lease::default();
            }
        }
        self.leases[index].hardware_address = mac;
    }

    /// Push the expiry of slot `index` to `now_ms + duration_ms`.
    pub fn renew(&mut self, index: usize, now_ms: u64, duration_ms: u64) {
        if let Some(lease) = self.leases.get_mut(index) {
            lease.expires_at_ms = now_ms.saturating_add(duration_ms);
        }
    }

    /// Clear every assigned slot whose lease has expired. Returns the freed
    /// slot indexes.
    pub fn purge_expired(&mut self, now_ms: u64) -> Vec<usize> {
        let mut freed = Vec::new();
        for (i, lease) in self.leases.iter_mut().enumerate() {
            if !lease.is_free() && lease.is_expired(now_ms) {
                *lease = Lease::default();
                freed.push(i);
            }
        }
        freed
    }

    /// Address handed out for slot `index`: `server_ip` with its last octet
    /// replaced by `pool_base + index`.
    pub fn address_of(&self, server_ip: Ipv4Addr, index: usize) -> Ipv4Addr {
        let [a, b, c, _] = server_ip.octets();
        Ipv4Addr::new(a, b, c, self.pool_base.wrapping_add(index as u8))
    }

    /// All assigned, unexpired slots.
    pub fn active_leases(&self, server_ip: Ipv4Addr, now_ms: u64) -> Vec<ActiveLease> {
        self.leases
            .iter()
            .enumerate()
            .filter(|(_, l)| !l.is_free() && !l.is_expired(now_ms))
            .map(|(i, l)| ActiveLease {
                index: i,
                mac: l.mac_str(),
                ip: self.address_of(server_ip, i),
                remaining_secs: (l.expires_at_ms - now_ms) / 1000,
            })
            .collect()
    }
}
