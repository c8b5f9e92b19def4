//! Utility functions shared by the engine and the workloads.
//!

use bytes::Bytes;
use std::any::Any;
use std::path::Path;

/// Builds the key handed to a map function for the line starting at
/// `offset` in `path`.
pub fn record_key(path: &Path, offset: u64) -> Bytes {
    Bytes::from(format!("{}:{}", path.display(), offset))
}

/// Extracts the byte offset from a key built by [`record_key`].
///
/// Returns [`None`] if the key does not end in `:<offset>`.
pub fn record_offset(key: &[u8]) -> Option<u64> {
    let colon = key.iter().rposition(|&b| b == b':')?;
    std::str::from_utf8(&key[colon + 1..]).ok()?.parse().ok()
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("task panicked")
    }
}
