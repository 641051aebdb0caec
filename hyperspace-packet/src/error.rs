//! Error types for the packet codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rewriting packets
#[derive(Debug, Error)]
pub enum Error {
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("not an IPv4 packet")]
    NotIpv4,

    #[error("IPv4 total length {total_len} is inconsistent with header length {header_len}")]
    BadLength {
        total_len: usize,
        header_len: usize,
    },
}
