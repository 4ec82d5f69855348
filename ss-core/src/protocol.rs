//! SSProto wire protocol: version, field sizes and peer-facing limits.

use std::time::Duration;

/// Protocol version echoed during version exchange. Clients decide compatibility
/// from the echoed byte; the server never negotiates.
pub const PROTOCOL_VERSION: u8 = 1;

/// Content hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Per-install identifier length in bytes.
pub const ID_LEN: usize = 32;

/// Signature length in bytes (`R.y || s`).
pub const SIGNATURE_LEN: usize = 112;

/// Verifying key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 56;

/// All-zero hash terminating the hash negotiation list.
pub const END_OF_LIST: [u8; HASH_LEN] = [0u8; HASH_LEN];

/// Absolute deadline for a whole session, counted from accept.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Caps on length-prefixed fields accepted from an untrusted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Longest client path accepted in hash negotiation or a transfer entry.
    pub max_path_len: u64,
    /// Largest telemetry payload accepted during TelemetryReceive.
    pub max_telemetry_len: u64,
    /// Largest file blob accepted by a receiving client.
    pub max_blob_len: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_path_len: 4096,
            max_telemetry_len: 64 * 1024,
            max_blob_len: 1 << 30,
        }
    }
}
