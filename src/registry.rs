//! Held-key bookkeeping
//!
//! Tracks which buttons currently have an output key pressed and held, so that
//! every path out of the listening state can release them. Invariant: an entry
//! exists for a button iff its key is physically down right now. This registry
//! is the reason the bridge never leaves a key stuck after a link drop.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::keys::KeySink;

/// Map of button name to the output key currently held for it.
///
/// Privately owned by the bridge task; at most one entry per button.
#[derive(Debug, Default)]
pub struct HeldKeyRegistry {
    held: HashMap<String, String>,
}

impl HeldKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Press and record `key` for `button` unless one is already held.
    ///
    /// Idempotent against a duplicate press that survived dedup (e.g. after a
    /// state machine restart reset the tracker).
    pub fn hold_if_needed(&mut self, button: &str, key: &str, sink: &dyn KeySink) {
        if self.held.contains_key(button) {
            debug!("{} already held, ignoring repeat press", button);
            return;
        }
        if let Err(e) = sink.key_down(key) {
            warn!("{}", e);
        }
        self.held.insert(button.to_string(), key.to_string());
    }

    /// Release and forget the key held for `button`, if any
    pub fn release_if_held(&mut self, button: &str, sink: &dyn KeySink) {
        if let Some(key) = self.held.remove(button) {
            if let Err(e) = sink.key_up(&key) {
                warn!("{}", e);
            }
        }
    }

    /// Release every held key and clear the registry.
    ///
    /// Must run before any transport teardown when leaving the listening
    /// state. Injection failures are swallowed per entry so one bad key never
    /// leaves the others stuck.
    pub fn release_all(&mut self, sink: &dyn KeySink) {
        for (button, key) in self.held.drain() {
            if let Err(e) = sink.key_up(&key) {
                warn!("release_all: {} ({}): {}", button, key, e);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{KeyAction, RecordingKeySink};

    #[test]
    fn test_hold_is_idempotent() {
        let sink = RecordingKeySink::new();
        let mut registry = HeldKeyRegistry::new();

        registry.hold_if_needed("Right Steer", "right", &sink);
        registry.hold_if_needed("Right Steer", "right", &sink);

        assert_eq!(sink.actions(), vec![KeyAction::Down("right".to_string())]);
        assert_eq!(registry.held_count(), 1);
    }

    #[test]
    fn test_release_without_hold_is_noop() {
        let sink = RecordingKeySink::new();
        let mut registry = HeldKeyRegistry::new();

        registry.release_if_held("Left Steer", &sink);

        assert!(sink.actions().is_empty());
    }

    #[test]
    fn test_release_all_clears_everything() {
        let sink = RecordingKeySink::new();
        let mut registry = HeldKeyRegistry::new();

        registry.hold_if_needed("Right Steer", "right", &sink);
        registry.hold_if_needed("Left Steer", "left", &sink);
        registry.release_all(&sink);

        assert!(registry.is_empty());
        let ups = sink
            .actions()
            .iter()
            .filter(|a| matches!(a, KeyAction::Up(_)))
            .count();
        assert_eq!(ups, 2);
    }

    #[test]
    fn test_release_all_survives_injection_failure() {
        let sink = RecordingKeySink::new();
        let mut registry = HeldKeyRegistry::new();

        registry.hold_if_needed("Right Steer", "right", &sink);
        registry.hold_if_needed("Left Steer", "left", &sink);
        sink.fail_key("right");
        sink.fail_key("left");

        // Both releases are attempted even though both fail
        registry.release_all(&sink);
        assert!(registry.is_empty());

        let ups = sink
            .actions()
            .iter()
            .filter(|a| matches!(a, KeyAction::Up(_)))
            .count();
        assert_eq!(ups, 2);
    }
}
