//! Key action dispatch
//!
//! Turns a decoded, deduplicated button event into at most one key-injection
//! call, driven by the descriptor table. No transport concerns live here.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{ButtonBehavior, DescriptorTable};
use crate::frame::{ButtonEvent, EventKind};
use crate::keys::KeySink;
use crate::registry::HeldKeyRegistry;

/// Dispatches accepted events to the key sink, tracking held keys
pub struct KeyDispatcher {
    table: DescriptorTable,
    registry: HeldKeyRegistry,
    sink: Arc<dyn KeySink>,
}

impl KeyDispatcher {
    pub fn new(table: DescriptorTable, sink: Arc<dyn KeySink>) -> Self {
        Self {
            table,
            registry: HeldKeyRegistry::new(),
            sink,
        }
    }

    /// Act on one accepted event.
    ///
    /// Tap buttons fire on every press and ignore release; hold buttons press
    /// on press and release on release. Buttons without a configured key do
    /// nothing. Injection failures are logged and swallowed.
    pub fn dispatch(&mut self, event: &ButtonEvent) {
        let Some(descriptor) = self.table.by_prefix(event.prefix) else {
            // Decoder only emits known prefixes; table and event disagree
            warn!("no descriptor for {:04X}, dropping event", event.prefix);
            return;
        };

        let Some(key) = &descriptor.key else {
            debug!("{} has no output key, ignoring", descriptor.name);
            return;
        };

        match (event.kind, descriptor.behavior) {
            (EventKind::Press, ButtonBehavior::Tap) => {
                if let Err(e) = self.sink.tap(key) {
                    warn!("{}", e);
                }
            }
            (EventKind::Press, ButtonBehavior::Hold) => {
                self.registry.hold_if_needed(&descriptor.name, key, self.sink.as_ref());
            }
            (EventKind::Release, ButtonBehavior::Hold) => {
                self.registry.release_if_held(&descriptor.name, self.sink.as_ref());
            }
            (EventKind::Release, ButtonBehavior::Tap) => {
                // Taps are self-contained on press
            }
        }
    }

    /// Release every held key; mandatory on any path out of the listening state
    pub fn release_all(&mut self) {
        self.registry.release_all(self.sink.as_ref());
    }

    pub fn held_count(&self) -> usize {
        self.registry.held_count()
    }
}
