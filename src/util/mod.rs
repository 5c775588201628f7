//! Utility types: base64 serde helpers, wall-clock access, and signal
//! handling.

use std::time::SystemTime;

pub mod b64_bytes;
mod sig_down;

pub use sig_down::SigDown;

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
