use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ServerConfig;

/// Ethernet hardware address. All-zero marks a vacant lease entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid MAC address '{0}'")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts `aa:bb:cc:dd:ee:ff` or `aa-bb-cc-dd-ee-ff`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacError(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.trim().split([':', '-']);

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(err)?.trim();
            if part.is_empty() || part.len() > 2 {
                return Err(err());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }

        if parts.next().is_some() {
            return Err(err());
        }

        Ok(MacAddr(octets))
    }
}

/// One address in the pool and the client currently holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseEntry {
    pub mac: MacAddr,
    pub address: Ipv4Addr,
    pub lease_secs: u32,
}

impl LeaseEntry {
    pub fn is_vacant(&self) -> bool {
        self.mac.is_zero()
    }
}

/// Position of an entry in the [`LeaseTable`] that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSlot(usize);

impl LeaseSlot {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Fixed-capacity lease table, one entry per pool address.
///
/// Table order is allocation order: the first vacant entry always wins.
#[derive(Debug, Clone)]
pub struct LeaseTable {
    entries: Box<[LeaseEntry]>,
}

impl LeaseTable {
    /// Build `pool_size` consecutive vacant entries starting at `pool_start`.
    /// Addresses that would wrap past 255.255.255.255 are left out.
    pub fn new(pool_start: Ipv4Addr, pool_size: u8, lease_secs: u32) -> Self {
        let start = u32::from(pool_start);
        let entries = (0..u32::from(pool_size))
            .map_while(|i| start.checked_add(i))
            .map(|addr| LeaseEntry {
                mac: MacAddr::ZERO,
                address: Ipv4Addr::from(addr),
                lease_secs,
            })
            .collect();

        Self { entries }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.pool_start, config.pool_size, config.lease_secs)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[LeaseEntry] {
        &self.entries
    }

    pub fn entry(&self, slot: LeaseSlot) -> &LeaseEntry {
        &self.entries[slot.0]
    }

    pub fn bound_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_vacant()).count()
    }

    pub fn lookup_by_address(&self, ip: Ipv4Addr) -> Option<LeaseSlot> {
        self.entries
            .iter()
            .position(|e| e.address == ip)
            .map(LeaseSlot)
    }

    /// Never matches vacant entries: the all-zero MAC is not a client.
    pub fn lookup_by_mac(&self, mac: MacAddr) -> Option<LeaseSlot> {
        if mac.is_zero() {
            return None;
        }
        self.entries.iter().position(|e| e.mac == mac).map(LeaseSlot)
    }

    /// First vacant entry in table order. Does not reserve it.
    pub fn allocate_vacant(&self) -> Option<LeaseSlot> {
        self.entries.iter().position(LeaseEntry::is_vacant).map(LeaseSlot)
    }

    pub fn bind(&mut self, slot: LeaseSlot, mac: MacAddr) {
        self.entries[slot.0].mac = mac;
    }

    pub fn release(&mut self, slot: LeaseSlot) {
        self.entries[slot.0].mac = MacAddr::ZERO;
    }
}
