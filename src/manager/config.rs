//! Manager Configuration

use std::time::Duration;

/// Default idle time after which the sweep closes a connection
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time between idle sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Default number of bytes read from a socket per readiness event
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4096;

/// Default capacity of the readiness event buffer
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Default cap on unsent bytes held per connection (1 MiB)
pub const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Host to bind the listening socket to (default: 0.0.0.0)
    pub host: String,

    /// Port to listen on; 0 picks an ephemeral port
    pub port: u16,

    /// Idle time after which a connection is evicted (default: 300s)
    pub keepalive_timeout: Duration,

    /// Time between idle sweeps (default: 600s)
    pub sweep_interval: Duration,

    /// Maximum bytes returned by one read (default: 4096)
    pub read_buffer_size: usize,

    /// Readiness events collected per wait (default: 1024)
    pub event_capacity: usize,

    /// Unsent bytes a connection may hold before a send closes it
    /// (default: 1 MiB)
    pub max_pending_bytes: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            keepalive_timeout: DEFAULT_KEEPALIVE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
        }
    }
}

impl ManagerConfig {
    /// Creates a default configuration listening on `port`.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
