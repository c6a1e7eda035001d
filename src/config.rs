//! Protocol configuration

use std::time::Duration;

use crate::frame::HEADER_LEN;
use crate::{Error, Result, DEFAULT_MAX_RETRIES, DEFAULT_WINDOW_SIZE};

/// RRP protocol configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of unacknowledged frames in flight per destination
    pub window_size: u32,

    /// Retransmissions allowed per frame before it is abandoned
    pub max_retries: u32,

    /// Retransmission timeout (milliseconds)
    pub retransmit_timeout_ms: u64,

    /// Receive buffer size; datagrams larger than this are truncated
    pub recv_buffer_size: usize,

    /// Capacity of the event channels handed to the application
    pub event_channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retransmit_timeout_ms: 1000,
            recv_buffer_size: 65535,
            event_channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Retransmission timeout as a `Duration`
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    /// Reject settings a session cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidConfig("window_size must be at least 1".into()));
        }
        if self.retransmit_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "retransmit_timeout_ms must be positive".into(),
            ));
        }
        if self.recv_buffer_size < HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "recv_buffer_size must hold a {}-byte frame header",
                HEADER_LEN
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Settings for links with heavy loss or long RTT
    pub fn lossy_network() -> Self {
        Self {
            window_size: 8,
            max_retries: 8,
            retransmit_timeout_ms: 3000,
            ..Self::default()
        }
    }

    /// Settings for loopback and LAN use
    pub fn low_latency() -> Self {
        Self {
            window_size: 16,
            max_retries: 3,
            retransmit_timeout_ms: 200,
            ..Self::default()
        }
    }
}
