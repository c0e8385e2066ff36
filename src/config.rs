//! Compile-time tunables for the transport layer
//!
//! Runtime parameters (bind address, ports, intervals, worker count) come
//! from the CLI flags of the binaries; the constants below bound wire-level
//! resource usage and are shared by both sides of a connection.

use std::time::Duration;

/// Maximum accepted device name length, enforced at message construction
/// and re-checked on decode
pub const MAX_DEVICE_NAME_LEN: usize = 64;

/// Socket reads are issued in chunks of this size
pub const RECV_BUFFER_LEN: usize = 1024;

/// Maximum accepted payload length in one framed message (1MB).
/// Frames claiming more are treated as structurally invalid.
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Poll interval of the non-blocking accept loop
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);
