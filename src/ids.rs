//! Opaque, sortable id generation.
//!
//! Session and command ids embed a tick-precision (100ns, 7 fractional
//! digits) timestamp so that ids created under load remain totally ordered
//! by creation time even when several are minted within the same
//! millisecond — mirroring the sub-second tick resolution the original
//! implementation relies on for sortability.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Format the current instant as `{epoch_seconds}.{7-digit-subsecond-ticks}`.
fn tick_stamp() -> String {
    let now = Utc::now();
    let secs = now.timestamp();
    // Nanoseconds -> 100ns ticks, truncated to 7 digits.
    let ticks = now.timestamp_subsec_nanos() / 100;
    format!("{secs}{ticks:07}")
}

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Generate a new, process-unique session id.
#[must_use]
pub fn new_session_id() -> String {
    format!("sess-{}-{:04}", tick_stamp(), next_sequence() % 10_000)
}

/// Generate a new, process-unique command id, scoped under `session_id`.
///
/// The id is uppercase-able without losing uniqueness (used verbatim as a
/// batch separator label per the adapter's wire format).
#[must_use]
pub fn new_command_id() -> String {
    format!("cmd{}{:04}", tick_stamp(), next_sequence() % 10_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_are_unique_and_alnum() {
        let a = new_command_id();
        let b = new_command_id();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn session_ids_are_unique() {
        let a = new_session_id();
        let b = new_session_id();
        assert_ne!(a, b);
    }
}
