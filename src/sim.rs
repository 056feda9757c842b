//! In-process simulated transport
//!
//! Plays the role of a KICKR BIKE SHIFT without a radio: per-prefix 7-bit
//! rolling sequences incremented on press and reused on the matching release,
//! plus harness controls for link drops, discovery presence, and forced
//! connect failures. Drives the `--simulate` demo run and the end-to-end
//! tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::frame::format_hex;
use crate::transport::{BleConnection, BleTransport, DeviceHandle, LinkEvent, TransportError};

/// Simulated peripheral. Clone freely; clones share the same device.
#[derive(Clone)]
pub struct SimTransport {
    shared: Arc<SimShared>,
}

struct SimShared {
    device_name: String,
    /// Whether discovery can see the device
    present: AtomicBool,
    /// Connect attempts to fail before one succeeds
    connect_failures: AtomicUsize,
    /// Whether the next subscribe attempt fails
    fail_subscribe: AtomicBool,
    discover_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    /// Sender for the currently subscribed connection, if any
    link: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    /// Rolling sequence per prefix, incremented on press only
    seq_by_prefix: Mutex<HashMap<u16, u8>>,
}

impl SimTransport {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SimShared {
                device_name: device_name.into(),
                present: AtomicBool::new(true),
                connect_failures: AtomicUsize::new(0),
                fail_subscribe: AtomicBool::new(false),
                discover_calls: AtomicUsize::new(0),
                connect_calls: AtomicUsize::new(0),
                link: Mutex::new(None),
                seq_by_prefix: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Default simulator device, discoverable by the reference name prefix
    pub fn kickr() -> Self {
        Self::new("KICKR BIKE SHIFT SIM")
    }

    /// Emit a press frame for `prefix`, advancing its rolling sequence.
    /// Returns the payload so callers can replay it as a duplicate.
    pub fn press(&self, prefix: u16) -> Vec<u8> {
        let seq = {
            let mut map = self.shared.seq_by_prefix.lock().unwrap();
            let entry = map.entry(prefix).or_insert(0);
            *entry = (*entry + 1) & 0x7F;
            *entry
        };
        let payload = Self::frame(prefix, 0x80 | seq);
        self.send_raw(payload.clone());
        payload
    }

    /// Emit the release matching the last press of `prefix` (same sequence)
    pub fn release(&self, prefix: u16) -> Vec<u8> {
        let seq = *self
            .shared
            .seq_by_prefix
            .lock()
            .unwrap()
            .entry(prefix)
            .or_insert(0);
        let payload = Self::frame(prefix, seq);
        self.send_raw(payload.clone());
        payload
    }

    /// Deliver arbitrary bytes as a notification (duplicates, junk frames)
    pub fn send_raw(&self, payload: Vec<u8>) {
        debug!("sim notify: {}", format_hex(&payload));
        if let Some(tx) = self.shared.link.lock().unwrap().as_ref() {
            let _ = tx.send(LinkEvent::Notification(payload));
        }
    }

    /// Drop the current link, as if the bike went out of range
    pub fn drop_link(&self) {
        if let Some(tx) = self.shared.link.lock().unwrap().take() {
            let _ = tx.send(LinkEvent::Dropped);
        }
    }

    /// Hide or expose the device to discovery
    pub fn set_present(&self, present: bool) {
        self.shared.present.store(present, Ordering::SeqCst);
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.shared.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next subscribe attempt
    pub fn fail_next_subscribe(&self) {
        self.shared.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn discover_calls(&self) -> usize {
        self.shared.discover_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.shared.connect_calls.load(Ordering::SeqCst)
    }

    /// True while a subscribed connection holds the link
    pub fn subscribed(&self) -> bool {
        self.shared.link.lock().unwrap().is_some()
    }

    fn frame(prefix: u16, rr: u8) -> Vec<u8> {
        let [p, q] = prefix.to_be_bytes();
        vec![p, q, rr]
    }
}

#[async_trait]
impl BleTransport for SimTransport {
    async fn discover(
        &self,
        name_prefix: &str,
        _timeout: Duration,
    ) -> Result<Option<DeviceHandle>, TransportError> {
        self.shared.discover_calls.fetch_add(1, Ordering::SeqCst);

        if self.shared.present.load(Ordering::SeqCst)
            && self.shared.device_name.starts_with(name_prefix)
        {
            Ok(Some(DeviceHandle {
                name: self.shared.device_name.clone(),
                address: "00:11:22:33:44:55".to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    async fn connect(
        &self,
        device: &DeviceHandle,
    ) -> Result<Box<dyn BleConnection>, TransportError> {
        self.shared.connect_calls.fetch_add(1, Ordering::SeqCst);

        let failures = self.shared.connect_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared.connect_failures.store(failures - 1, Ordering::SeqCst);
            return Err(TransportError::Connect(format!(
                "simulated connect failure to {}",
                device.name
            )));
        }

        Ok(Box::new(SimConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct SimConnection {
    shared: Arc<SimShared>,
}

#[async_trait]
impl BleConnection for SimConnection {
    async fn subscribe_notify(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError> {
        if self.shared.fail_subscribe.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Subscribe(
                "simulated subscribe failure".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.link.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe_notify(&mut self) {
        self.shared.link.lock().unwrap().take();
    }

    async fn disconnect(&mut self) {
        self.shared.link.lock().unwrap().take();
    }
}
