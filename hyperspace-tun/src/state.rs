//! Engine configuration stores: known IPs and the DNS table
//!
//! Both stores are mutated by application threads while the reactor thread
//! consults them per packet, so they sit on the reader-writer containers
//! from `hyperspace-sync`.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use hyperspace_sync::{ConcurrentList, ShardedMap};

/// The IPv4 addresses the overlay terminates locally.
///
/// Entries are textual addresses, unique by string equality; insertion
/// order carries no meaning. An entry that does not parse as IPv4 never
/// matches a packet address.
#[derive(Default)]
pub struct KnownIps {
    addrs: ConcurrentList<String>,
}

impl KnownIps {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            addrs: ConcurrentList::new(),
        }
    }

    /// Add an address if it is not already present.
    pub fn add(&self, addr: impl Into<String>) -> bool {
        self.addrs.push_absent(addr.into())
    }

    /// Add every address not already present.
    ///
    /// Returns the number of addresses inserted.
    pub fn add_all<I, S>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.extend_absent(addrs.into_iter().map(Into::into))
    }

    /// Remove an address.
    pub fn remove(&self, addr: &str) -> bool {
        self.addrs.remove(&addr.to_string())
    }

    /// Remove every listed address.
    ///
    /// Returns the number of addresses removed.
    pub fn remove_all<I, S>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.remove_all(addrs.into_iter().map(Into::into))
    }

    /// Whether the textual address is present.
    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.contains(&addr.to_string())
    }

    /// Whether any entry parses to `addr`.
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        self.addrs
            .first(|s| s.parse::<Ipv4Addr>().map(|a| a == addr).unwrap_or(false))
            .is_some()
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    /// Copy of the current addresses.
    pub fn snapshot(&self) -> Vec<String> {
        self.addrs.snapshot()
    }
}

/// Static resolver table: answer address → hostnames resolving to it.
#[derive(Default)]
pub struct DnsTable {
    entries: ShardedMap<String, Vec<String>>,
}

impl DnsTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: ShardedMap::new(),
        }
    }

    /// Replace the whole table.
    pub fn replace_all(&self, map: HashMap<String, Vec<String>>) {
        self.entries.clear();
        for (addr, hosts) in map {
            self.entries.insert(addr, hosts);
        }
    }

    /// Append `host` under `addr`, creating the hostname list if absent.
    ///
    /// No-op when the hostname is already listed at that address.
    pub fn add_entry(&self, addr: impl Into<String>, host: impl Into<String>) {
        let host = host.into();
        self.entries.upsert(
            addr.into(),
            || vec![host.clone()],
            |hosts| {
                if !hosts.contains(&host) {
                    hosts.push(host.clone());
                }
            },
        );
    }

    /// Merge a map with add-if-absent semantics per hostname.
    pub fn add_all_absent(&self, map: HashMap<String, Vec<String>>) {
        for (addr, hosts) in map {
            for host in hosts {
                self.add_entry(addr.clone(), host);
            }
        }
    }

    /// Drop the entry for `addr`.
    pub fn remove(&self, addr: &str) -> bool {
        self.entries.remove(&addr.to_string()).is_some()
    }

    /// Every answer address whose hostname list contains `name`.
    ///
    /// Addresses that do not parse as IPv4 are skipped.
    pub fn lookup(&self, name: &str) -> Vec<Ipv4Addr> {
        let mut matches = Vec::new();
        self.entries.for_each(|addr, hosts| {
            if hosts.iter().any(|h| h == name) {
                if let Ok(parsed) = addr.parse::<Ipv4Addr>() {
                    matches.push(parsed);
                }
            }
        });
        matches
    }

    /// Number of answer addresses in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
