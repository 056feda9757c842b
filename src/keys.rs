//! Key injection seam
//!
//! The bridge only decides *which* key action to perform; delivering it to the
//! OS is a platform backend's job. Backends implement [`KeySink`] and are
//! expected to be best-effort: callers log and continue on failure, they never
//! abort the pipeline because one injection failed.

use std::sync::Mutex;

use thiserror::Error;
use tracing::info;

/// Key injection failure. Always swallowed by callers after logging.
#[derive(Debug, Error)]
#[error("key injection failed for '{key}': {reason}")]
pub struct KeyInjectionError {
    pub key: String,
    pub reason: String,
}

/// Output backend for key actions.
///
/// All methods take `&self`; implementations use interior mutability where
/// they need state. Failure semantics are ignore-and-continue.
pub trait KeySink: Send + Sync {
    /// Press and hold a key (no release)
    fn key_down(&self, key: &str) -> Result<(), KeyInjectionError>;

    /// Release a previously held key
    fn key_up(&self, key: &str) -> Result<(), KeyInjectionError>;

    /// Momentary press (down + up)
    fn tap(&self, key: &str) -> Result<(), KeyInjectionError>;
}

/// Logs key actions instead of injecting them.
///
/// Useful for driving the bridge without a platform backend: simulator runs,
/// debugging mappings, development without hardware.
#[derive(Debug, Default)]
pub struct ConsoleKeySink;

impl KeySink for ConsoleKeySink {
    fn key_down(&self, key: &str) -> Result<(), KeyInjectionError> {
        info!("⌨️  key down: {}", key);
        Ok(())
    }

    fn key_up(&self, key: &str) -> Result<(), KeyInjectionError> {
        info!("⌨️  key up:   {}", key);
        Ok(())
    }

    fn tap(&self, key: &str) -> Result<(), KeyInjectionError> {
        info!("⌨️  tap:      {}", key);
        Ok(())
    }
}

/// A recorded key action, in emission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Down(String),
    Up(String),
    Tap(String),
}

/// Records every action for later inspection; optionally fails on demand.
///
/// This is the harness-side sink used by the end-to-end tests.
#[derive(Debug, Default)]
pub struct RecordingKeySink {
    actions: Mutex<Vec<KeyAction>>,
    fail_keys: Mutex<Vec<String>>,
}

impl RecordingKeySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every action for `key` fail from now on
    pub fn fail_key(&self, key: &str) {
        self.fail_keys.lock().unwrap().push(key.to_string());
    }

    /// Snapshot of all recorded actions
    pub fn actions(&self) -> Vec<KeyAction> {
        self.actions.lock().unwrap().clone()
    }

    fn record(&self, action: KeyAction, key: &str) -> Result<(), KeyInjectionError> {
        let failing = self.fail_keys.lock().unwrap().iter().any(|k| k == key);
        self.actions.lock().unwrap().push(action);
        if failing {
            return Err(KeyInjectionError {
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl KeySink for RecordingKeySink {
    fn key_down(&self, key: &str) -> Result<(), KeyInjectionError> {
        self.record(KeyAction::Down(key.to_string()), key)
    }

    fn key_up(&self, key: &str) -> Result<(), KeyInjectionError> {
        self.record(KeyAction::Up(key.to_string()), key)
    }

    fn tap(&self, key: &str) -> Result<(), KeyInjectionError> {
        self.record(KeyAction::Tap(key.to_string()), key)
    }
}
