//! The TUN packet engine
//!
//! [`TunInterface`] is the lifecycle controller and packet classifier for
//! one utun descriptor. Two directions meet here:
//!
//! - **Outbound** (host → overlay): the reactor reads a framed packet off
//!   the device and hands it to [`Shared::handle_device_read`]. ICMP echo
//!   requests for known IPs and DNS queries for configured hostnames are
//!   answered locally; everything else goes to the outbound callback.
//! - **Inbound** (overlay → host): [`TunInterface::write_packet`] frames
//!   the packet and queues it for the device — except ICMP echo requests
//!   sourced from a known IP, which the engine answers on the overlay's
//!   behalf and routes back through the outbound callback.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::Notify;

use hyperspace_packet::{dns, icmp, ipv4, udp, IcmpMessage, Ipv4Packet, UdpDatagram};
use hyperspace_sync::BlockingDeque;

use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::reactor;
use crate::state::{DnsTable, KnownIps};
use crate::stats::{StatsSnapshot, TunnelStats};
use crate::{TUN_HEADER_IPV4, TUN_HEADER_LEN};

/// Sink for packets leaving the host toward the overlay.
///
/// Receives framing-stripped IPv4 datagrams. Invoked on the reactor thread
/// for device reads and on the caller's thread for locally answered echo
/// requests, so implementations must be thread-safe.
pub type OutgoingPacketCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the engine handle and the reactor thread.
pub(crate) struct Shared {
    pub(crate) known_ips: KnownIps,
    pub(crate) dns: DnsTable,
    pub(crate) write_queue: BlockingDeque<Vec<u8>>,
    /// Wakes the reactor when the write queue becomes non-empty.
    pub(crate) write_pending: Notify,
    /// Requests a loop break.
    pub(crate) shutdown: Notify,
    callback: Mutex<Option<OutgoingPacketCallback>>,
    pub(crate) stats: TunnelStats,
    pub(crate) running: AtomicBool,
}

impl Shared {
    fn new(config: &TunnelConfig) -> Self {
        Self {
            known_ips: KnownIps::new(),
            dns: DnsTable::new(),
            write_queue: BlockingDeque::with_capacity(config.queue_capacity),
            write_pending: Notify::new(),
            shutdown: Notify::new(),
            callback: Mutex::new(None),
            stats: TunnelStats::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Hand a packet to the outbound callback, or drop it if none is set.
    pub(crate) fn forward_outgoing(&self, packet: &[u8]) {
        let callback = lock(&self.callback).clone();
        match callback {
            Some(callback) => {
                self.stats.record_forwarded();
                callback(packet);
            }
            None => self.stats.record_dropped(),
        }
    }

    /// Frame a packet and queue it for the device, arming the write edge.
    ///
    /// Blocks while the queue is at capacity.
    pub(crate) fn enqueue_write(&self, packet: &[u8]) {
        if packet.is_empty() {
            return;
        }
        let mut framed = Vec::with_capacity(TUN_HEADER_LEN + packet.len());
        framed.extend_from_slice(&TUN_HEADER_IPV4);
        framed.extend_from_slice(packet);
        self.write_queue.put(framed);
        self.write_pending.notify_one();
    }

    /// Classify one framed read from the device.
    pub(crate) fn handle_device_read(&self, frame: &[u8]) {
        if frame.len() < TUN_HEADER_LEN {
            self.stats.record_dropped();
            return;
        }
        let packet = &frame[TUN_HEADER_LEN..];
        if packet.is_empty() {
            self.stats.record_dropped();
            return;
        }

        if let Some(ip) = Ipv4Packet::new(packet) {
            if ip.protocol() == ipv4::proto::ICMP {
                self.handle_icmp(packet, &ip);
                return;
            }
            if self.handle_dns_query(packet, &ip) {
                return;
            }
        }

        // Unknown traffic, IPv6 included, belongs to the overlay.
        self.forward_outgoing(packet);
    }

    /// ICMP from the host side.
    ///
    /// Echo requests for locally terminated addresses go to the overlay
    /// unmodified; every other ICMP message is dropped here.
    fn handle_icmp(&self, packet: &[u8], ip: &Ipv4Packet<'_>) {
        let is_echo_request = IcmpMessage::new(ip.payload())
            .map(|msg| msg.msg_type() == icmp::ECHO_REQUEST)
            .unwrap_or(false);

        if is_echo_request && self.known_ips.contains_addr(ip.destination()) {
            log::debug!("echo request for known address {}", ip.destination());
            self.forward_outgoing(packet);
        } else {
            self.stats.record_dropped();
        }
    }

    /// Handle a UDP/53 packet against the DNS table.
    ///
    /// Returns true when the packet was consumed as a DNS query, whether or
    /// not any response was produced. Packets without a parseable question
    /// return false and flow on as ordinary UDP.
    fn handle_dns_query(&self, packet: &[u8], ip: &Ipv4Packet<'_>) -> bool {
        if ip.protocol() != ipv4::proto::UDP {
            return false;
        }
        let Some(datagram) = UdpDatagram::new(ip.payload()) else {
            return false;
        };
        if datagram.dest_port() != udp::DNS_PORT {
            return false;
        }
        let Some(question) = dns::parse_question(datagram.payload()) else {
            return false;
        };

        for addr in self.dns.lookup(&question.name) {
            let answer = match question.qtype {
                dns::qtype::A => Some(addr),
                // An empty response sends the resolver back to A queries
                // without waiting for a timeout.
                dns::qtype::AAAA | dns::qtype::HTTPS => None,
                _ => continue,
            };
            log::debug!(
                "answering {} query for {} with {}",
                question.qtype,
                question.name,
                addr
            );
            let response = dns::build_response(packet, ip.header_len(), &question, answer);
            self.stats.record_dns_response();
            self.enqueue_write(&response);
        }
        true
    }
}

/// A user-space driver for one utun descriptor.
///
/// See the [crate docs](crate) for the data flow. The engine does not
/// duplicate the descriptor; the reactor closes it when the loop exits.
pub struct TunInterface {
    tun_fd: RawFd,
    config: TunnelConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TunInterface {
    /// Wrap an already-open utun descriptor with default tuning.
    pub fn new(tun_fd: RawFd) -> Self {
        Self {
            tun_fd,
            shared: Arc::new(Shared::new(&TunnelConfig::default())),
            config: TunnelConfig::default(),
            worker: Mutex::new(None),
        }
    }

    /// Wrap an already-open utun descriptor with validated tuning.
    pub fn with_config(tun_fd: RawFd, config: TunnelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tun_fd,
            shared: Arc::new(Shared::new(&config)),
            config,
            worker: Mutex::new(None),
        })
    }

    /// The descriptor this engine drives.
    pub fn tun_fd(&self) -> RawFd {
        self.tun_fd
    }

    /// Start the reactor thread.
    ///
    /// Idempotent: a second call while the loop is running is a no-op.
    pub fn start(&self) -> Result<()> {
        if self.tun_fd < 0 {
            return Err(Error::InvalidFd(self.tun_fd));
        }
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        match reactor::spawn(self.tun_fd, self.shared.clone(), self.config.clone()) {
            Ok(handle) => {
                *lock(&self.worker) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(Error::Io(e))
            }
        }
    }

    /// Request a loop break.
    ///
    /// Safe from any thread. Returns immediately; the loop exits on its
    /// next wakeup and closes the descriptor as it goes.
    pub fn stop(&self) {
        log::info!("stop requested for tun fd {}", self.tun_fd);
        self.shared.shutdown.notify_one();
    }

    /// Whether the reactor loop is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Install or replace the outbound packet sink.
    pub fn set_outgoing_callback(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *lock(&self.shared.callback) = Some(Arc::new(callback));
    }

    /// Remove the outbound packet sink.
    ///
    /// Packets needing the sink are dropped while none is installed.
    pub fn clear_outgoing_callback(&self) {
        *lock(&self.shared.callback) = None;
    }

    /// Accept a packet from the overlay for delivery to the host.
    ///
    /// Most packets are framed and queued for the device; the call blocks
    /// briefly when the write queue is at capacity. ICMP echo requests
    /// whose IPv4 source is a known IP are answered here instead: the
    /// engine owns that address, so the reply goes back to the overlay
    /// through the outbound callback rather than to the host.
    pub fn write_packet(&self, packet: &[u8]) {
        if packet.is_empty() {
            return;
        }
        let Some(ip) = Ipv4Packet::new(packet) else {
            self.shared.enqueue_write(packet);
            return;
        };
        if ip.protocol() != ipv4::proto::ICMP {
            self.shared.enqueue_write(packet);
            return;
        }

        let Some(message) = IcmpMessage::new(ip.payload()) else {
            self.shared.stats.record_dropped();
            return;
        };
        if message.msg_type() != icmp::ECHO_REQUEST {
            self.shared.enqueue_write(packet);
            return;
        }

        let header_len = ip.header_len();
        let total_len = usize::from(ip.total_len());
        if total_len < header_len + icmp::HEADER_LEN || total_len > packet.len() {
            self.shared.stats.record_dropped();
            return;
        }

        if !self.shared.known_ips.contains_addr(ip.source()) {
            self.shared.enqueue_write(packet);
            return;
        }

        let mut reply = packet.to_vec();
        if let Err(e) = icmp::make_echo_reply(&mut reply) {
            log::debug!("failed to synthesize echo reply: {}", e);
            self.shared.stats.record_dropped();
            return;
        }
        self.shared.stats.record_icmp_reply();
        self.shared.forward_outgoing(&reply);
    }

    // ========================================================================
    // Configuration mutators (valid before start and after stop)
    // ========================================================================

    /// Add a known IP address (insert if absent).
    pub fn add_known_ip(&self, addr: impl Into<String>) {
        self.shared.known_ips.add(addr);
    }

    /// Add several known IP addresses (insert if absent).
    pub fn add_known_ips<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.known_ips.add_all(addrs);
    }

    /// Remove a known IP address.
    pub fn remove_known_ip(&self, addr: &str) {
        self.shared.known_ips.remove(addr);
    }

    /// Remove several known IP addresses.
    pub fn remove_known_ips<I, S>(&self, addrs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.known_ips.remove_all(addrs);
    }

    /// Replace the whole DNS table.
    pub fn set_dns_map(&self, map: HashMap<String, Vec<String>>) {
        self.shared.dns.replace_all(map);
    }

    /// Append a hostname under an answer address (no-op if present).
    pub fn add_dns_entry(&self, addr: impl Into<String>, host: impl Into<String>) {
        self.shared.dns.add_entry(addr, host);
    }

    /// Merge DNS entries with add-if-absent semantics.
    pub fn add_absent_dns_entries(&self, map: HashMap<String, Vec<String>>) {
        self.shared.dns.add_all_absent(map);
    }

    /// Drop the DNS entry for an answer address.
    pub fn remove_dns_entry(&self, addr: &str) {
        self.shared.dns.remove(addr);
    }

    /// Point-in-time engine counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl Drop for TunInterface {
    /// Stop the reactor and wait for it to release the descriptor.
    fn drop(&mut self) {
        self.shared.shutdown.notify_one();
        if let Some(handle) = lock(&self.worker).take() {
            let _ = handle.join();
        }
    }
}
