//! Error types for the TUN engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by engine construction and startup.
///
/// The data plane itself is best-effort: packet-level failures are logged
/// and the affected packet dropped, never surfaced through the public
/// interface.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The descriptor handed to the engine is not usable
    #[error("invalid tun file descriptor: {0}")]
    InvalidFd(i32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
