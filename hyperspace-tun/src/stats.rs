//! Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for the packet engine.
///
/// Updated from the reactor thread and from `write_packet` callers;
/// readable at any time through [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct TunnelStats {
    /// Packets read from the device
    pub packets_read: AtomicU64,
    /// Bytes read from the device (framing included)
    pub bytes_read: AtomicU64,
    /// Packets written to the device
    pub packets_written: AtomicU64,
    /// Bytes written to the device (framing included)
    pub bytes_written: AtomicU64,
    /// Packets handed to the outbound callback
    pub packets_forwarded: AtomicU64,
    /// Packets dropped by classification or write errors
    pub packets_dropped: AtomicU64,
    /// DNS responses synthesized
    pub dns_responses: AtomicU64,
    /// ICMP echo replies synthesized
    pub icmp_replies: AtomicU64,
}

impl TunnelStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a device read.
    pub fn record_read(&self, bytes: usize) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a device write.
    pub fn record_write(&self, bytes: usize) {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a packet handed to the outbound callback.
    pub fn record_forwarded(&self) {
        self.packets_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dropped packet.
    pub fn record_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synthesized DNS response.
    pub fn record_dns_response(&self) {
        self.dns_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synthesized ICMP echo reply.
    pub fn record_icmp_reply(&self) {
        self.icmp_replies.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            dns_responses: self.dns_responses.load(Ordering::Relaxed),
            icmp_replies: self.icmp_replies.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of engine counters at a point in time.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub bytes_read: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub packets_forwarded: u64,
    pub packets_dropped: u64,
    pub dns_responses: u64,
    pub icmp_replies: u64,
}
