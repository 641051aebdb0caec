//! Packet parsing and synthesis for the HyperSpace TUN driver.
//!
//! Layer-3 datagrams cross the engine as raw bytes. This crate provides the
//! bounds-checked views and in-place rewrites the classification path
//! needs:
//!
//! - [`ipv4`]: zero-copy IPv4 header view, address swap, checksum fixup
//! - [`icmp`]: ICMP view and echo-request → echo-reply rewrite
//! - [`udp`]: UDP header view and port swap
//! - [`dns`]: question parsing (label compression included) and response
//!   synthesis
//! - [`checksum`]: the RFC 1071 Internet checksum shared by all of them
//! - [`dump`]: hex dump formatting for packet diagnostics
//!
//! Views return `None` instead of panicking when a buffer is too short or
//! inconsistent; the engine treats an unparseable packet as pass-through
//! traffic or drops it, per direction.

pub mod checksum;
pub mod dns;
pub mod dump;
mod error;
pub mod icmp;
pub mod ipv4;
pub mod udp;

pub use checksum::checksum;
pub use dump::hexdump;
pub use error::{Error, Result};
pub use icmp::IcmpMessage;
pub use ipv4::Ipv4Packet;
pub use udp::UdpDatagram;
