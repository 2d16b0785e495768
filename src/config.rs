//! Plain settings for the serial link, the dispatcher and the TCP server.

use std::{net::SocketAddr, time::Duration};

use fugit::MillisDurationU32;

/// Convert a fugit duration into the std type the threads and sockets want.
pub fn to_std(duration: MillisDurationU32) -> Duration {
    Duration::from_millis(u64::from(duration.to_millis()))
}

/// The serial port used for PSU comms should be configured like so:
/// * Default baud rate: 9600
/// * Data bits: 8
/// * Stop bits: 1
/// * Parity: None
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud_rate: u32,
    /// Quiet time after which a reply is considered complete.
    pub timeout: MillisDurationU32,
    pub unit_id: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            timeout: MillisDurationU32::millis(100),
            unit_id: 0x01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// How long a worker waits on an empty queue before checking for shutdown.
    pub idle_tick: MillisDurationU32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_tick: MillisDurationU32::millis(1000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    /// Interval between accept attempts while no client is connecting.
    pub accept_poll: MillisDurationU32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 9091)),
            accept_poll: MillisDurationU32::millis(100),
        }
    }
}
