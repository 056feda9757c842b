//! Duplicate notification suppression
//!
//! The BLE layer can redeliver a logical event (retransmission, subscription
//! replay after reconnect). Each press/release must fire exactly once per
//! rolling-sequence transition, so we remember the last sequence seen per
//! `(prefix, kind)` and drop repeats.

use std::collections::HashMap;

use crate::frame::EventKind;

/// Tracks the last delivered sequence per `(prefix, kind)`.
///
/// State is privately owned; separate bridge instances never share a tracker.
/// The map is bounded by the descriptor table size (one entry per prefix and
/// kind), so entries are never evicted.
#[derive(Debug, Default)]
pub struct DedupTracker {
    last_seq: HashMap<(u16, EventKind), u8>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this event is new and should be processed.
    ///
    /// Suppresses only an unchanged sequence for the same `(prefix, kind)`.
    /// Two real presses 128 apart alias in the 7-bit sequence space; that is a
    /// known bound of the wire format, not something to widen here.
    pub fn should_process(&mut self, prefix: u16, kind: EventKind, seq: u8) -> bool {
        match self.last_seq.insert((prefix, kind), seq) {
            Some(previous) if previous == seq => false,
            _ => true,
        }
    }
}
