//! Engine configuration

use hyperspace_packet::ipv4;

use crate::error::{Error, Result};
use crate::{IFACE_BUFSIZE, SOCKET_BUFSIZE, TUN_HEADER_LEN};

/// Default write queue capacity, in packets.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Tuning knobs for a [`TunInterface`](crate::TunInterface).
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Maximum number of packets queued for the device before
    /// `write_packet` callers block.
    pub queue_capacity: usize,
    /// SO_RCVBUF / SO_SNDBUF size requested for the descriptor.
    pub socket_buffer_size: usize,
    /// Size of the device read buffer.
    pub read_buffer_size: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            socket_buffer_size: SOCKET_BUFSIZE,
            read_buffer_size: IFACE_BUFSIZE,
        }
    }
}

impl TunnelConfig {
    /// Create a new configuration builder
    pub fn builder() -> TunnelConfigBuilder {
        TunnelConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }

        if self.read_buffer_size < TUN_HEADER_LEN + ipv4::MIN_HEADER_LEN {
            return Err(Error::Config(format!(
                "read_buffer_size {} cannot hold a framed IPv4 header",
                self.read_buffer_size
            )));
        }

        if self.socket_buffer_size == 0 {
            return Err(Error::Config("socket_buffer_size must be non-zero".into()));
        }

        Ok(())
    }
}

/// Builder for [`TunnelConfig`]
#[derive(Debug, Default)]
pub struct TunnelConfigBuilder {
    config: TunnelConfig,
}

impl TunnelConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the write queue capacity in packets
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the requested socket buffer size
    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.config.socket_buffer_size = size;
        self
    }

    /// Set the device read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TunnelConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
