//! User-space TUN interface driver for the HyperSpace overlay network.
//!
//! On Apple platforms a packet tunnel provider hands the application an
//! open utun file descriptor. [`TunInterface`] owns that descriptor: a
//! dedicated reactor thread reads layer-3 packets off the device, answers
//! ICMP echo and DNS queries for addresses the overlay terminates locally,
//! and forwards everything else to the registered outbound callback.
//! Packets from the overlay enter through
//! [`write_packet`](TunInterface::write_packet) and drain to the device
//! through a bounded write queue.
//!
//! ```text
//!             ┌─────────────────────────────────────────────┐
//!             │                TunInterface                 │
//!  utun fd ──►│ read edge ── strip header ── classify ──────┼──► outbound callback
//!             │                  │       │                  │
//!             │             ICMP echo   DNS                 │
//!             │                  │       │                  │
//!             │                  ▼       ▼                  │
//!  utun fd ◄──┤ write edge ◄── write queue ◄────────────────┼──◄ write_packet()
//!             └─────────────────────────────────────────────┘
//! ```
//!
//! The engine is handed a ready descriptor: it never creates the utun
//! device, and it closes the descriptor when the reactor loop exits.
//! Configuration (known IPs, the DNS table, the outbound callback) is
//! mutable from any thread for the whole engine lifetime.

pub mod config;
pub mod engine;
pub mod error;
mod reactor;
pub mod state;
pub mod stats;

pub use config::{TunnelConfig, TunnelConfigBuilder};
pub use engine::{OutgoingPacketCallback, TunInterface};
pub use error::{Error, Result};
pub use stats::{StatsSnapshot, TunnelStats};

/// Length of the utun address-family header.
pub const TUN_HEADER_LEN: usize = 4;

/// utun header prefixed to every IPv4 packet written to the device.
pub const TUN_HEADER_IPV4: [u8; 4] = [0x00, 0x00, 0x00, 0x02];

/// Device read buffer size.
pub const IFACE_BUFSIZE: usize = 2000;

/// Socket buffer size requested for the device descriptor.
pub const SOCKET_BUFSIZE: usize = 128 * 1024;
