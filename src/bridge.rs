//! Connection lifecycle state machine
//!
//! Owns the scan → connect → subscribe → listen → teardown → reconnect cycle
//! and routes inbound notifications through decoder → dedup → dispatcher. One
//! task runs the whole machine and all transport I/O serially; the host only
//! sees the event bus and the stop handle.
//!
//! The invariant everything here protects: whenever the machine leaves the
//! listening state, every held output key is released before any transport
//! teardown happens, so a link change can never leave a key stuck down.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::bus::{self, BusReceiver, BusSender, ColorHint};
use crate::config::BridgeConfig;
use crate::dedup::DedupTracker;
use crate::dispatch::KeyDispatcher;
use crate::frame::{self, DecodedFrame};
use crate::keys::KeySink;
use crate::transport::{BleConnection, BleTransport, DeviceHandle, LinkEvent, TransportError};

#[cfg(test)]
mod tests;

/// Lifecycle state. Owned and mutated only by the bridge task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Listening,
    Disconnecting,
    Reconnecting,
    Stopped,
    Failed,
}

impl ConnectionState {
    fn color(self) -> ColorHint {
        match self {
            ConnectionState::Idle
            | ConnectionState::Disconnecting
            | ConnectionState::Stopped => ColorHint::Gray,
            ConnectionState::Scanning
            | ConnectionState::Connecting
            | ConnectionState::Reconnecting => ColorHint::Orange,
            ConnectionState::Listening => ColorHint::Green,
            ConnectionState::Failed => ColorHint::Red,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Scanning => "Scanning",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Listening => "Listening",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Reconnecting => "Reconnecting",
            ConnectionState::Stopped => "Stopped",
            ConnectionState::Failed => "Failed",
        };
        write!(f, "{}", text)
    }
}

/// Idempotent stop signal, settable from any context.
///
/// Once requested, the bridge schedules no further reconnect attempts and
/// drains to `Stopped`. Requesting again is a no-op.
#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

impl StopHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(StopInner {
                requested: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn request_stop(&self) {
        if !self.inner.requested.swap(true, Ordering::SeqCst) {
            debug!("stop requested");
        }
        self.inner.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    async fn notified(&self) {
        self.inner.notify.notified().await;
    }
}

/// Why the listen loop ended
enum ListenOutcome {
    LinkDropped,
    StopRequested,
}

/// The bridge: state machine plus the decode/dedup/dispatch pipeline
pub struct Bridge {
    config: BridgeConfig,
    transport: Arc<dyn BleTransport>,
    dispatcher: KeyDispatcher,
    dedup: DedupTracker,
    bus: BusSender,
    stop: StopHandle,
    state: ConnectionState,
    /// Last known device, reused across reconnects while still addressable
    device: Option<DeviceHandle>,
}

impl Bridge {
    /// Build a bridge and return it with the host-side bus receiver and the
    /// stop handle.
    pub fn new(
        config: BridgeConfig,
        transport: Arc<dyn BleTransport>,
        sink: Arc<dyn KeySink>,
    ) -> (Self, BusReceiver, StopHandle) {
        let (bus_tx, bus_rx) = bus::channel();
        let stop = StopHandle::new();
        let dispatcher = KeyDispatcher::new(config.buttons.clone(), sink);

        let bridge = Self {
            config,
            transport,
            dispatcher,
            dedup: DedupTracker::new(),
            bus: bus_tx,
            stop: stop.clone(),
            state: ConnectionState::Idle,
            device: None,
        };
        (bridge, bus_rx, stop)
    }

    /// Run the lifecycle to a terminal state (`Stopped` or `Failed`).
    pub async fn run(mut self) -> ConnectionState {
        info!("bridge starting, looking for '{}'", self.config.device.name_prefix);
        self.bus.control_enabled(false);

        loop {
            if self.stop.is_requested() {
                return self.finish(ConnectionState::Stopped);
            }

            // Find or refind the device
            if self.device.is_none() {
                match self.scan().await {
                    Ok(Some(device)) => self.device = Some(device),
                    Ok(None) => {
                        self.bus
                            .log("[BLE] Device not found. Is the bike on and advertising?");
                        return self.finish(ConnectionState::Failed);
                    }
                    Err(e) => {
                        self.bus.log(format!("[BLE] Unrecoverable error: {}", e));
                        return self.finish(ConnectionState::Failed);
                    }
                }
            }
            if self.stop.is_requested() {
                return self.finish(ConnectionState::Stopped);
            }

            let device = self.device.clone().expect("device set above");
            let Some((mut conn, mut link)) = self.establish(&device).await else {
                // Connect or subscribe failed; forget the handle so the next
                // cycle rescans, then back off or stop.
                self.device = None;
                if self.stop.is_requested() {
                    return self.finish(ConnectionState::Stopped);
                }
                if !self.backoff().await {
                    return self.finish(ConnectionState::Stopped);
                }
                continue;
            };

            self.set_state(ConnectionState::Listening);
            self.bus.log("[BLE] Listening (short frames only).");
            let outcome = self.listen(&mut link).await;

            // Leaving Listening: held keys go up before any transport teardown
            self.dispatcher.release_all();

            match outcome {
                ListenOutcome::StopRequested => {
                    self.set_state(ConnectionState::Disconnecting);
                    self.teardown(conn.as_mut()).await;
                    return self.finish(ConnectionState::Stopped);
                }
                ListenOutcome::LinkDropped if self.stop.is_requested() => {
                    self.set_state(ConnectionState::Disconnecting);
                    self.teardown(conn.as_mut()).await;
                    return self.finish(ConnectionState::Stopped);
                }
                ListenOutcome::LinkDropped => {
                    self.set_state(ConnectionState::Reconnecting);
                    self.teardown(conn.as_mut()).await;
                    // Keep the device handle; if the next connect fails the
                    // cycle above clears it and rescans.
                    if !self.backoff().await {
                        return self.finish(ConnectionState::Stopped);
                    }
                }
            }
        }
    }

    async fn scan(&mut self) -> Result<Option<DeviceHandle>, TransportError> {
        self.set_state(ConnectionState::Scanning);
        self.bus.log("[BLE] Scanning...");

        let found = self
            .transport
            .discover(
                &self.config.device.name_prefix,
                self.config.device.scan_timeout(),
            )
            .await?;

        if let Some(device) = &found {
            self.bus
                .log(format!("[BLE] Found {} ({})", device.name, device.address));
        }
        Ok(found)
    }

    /// Connect and subscribe; on success, the link receiver comes back beside
    /// the connection so teardown stays with the caller.
    async fn establish(
        &mut self,
        device: &DeviceHandle,
    ) -> Option<(Box<dyn BleConnection>, mpsc::UnboundedReceiver<LinkEvent>)> {
        self.set_state(ConnectionState::Connecting);
        self.bus.log(format!("[BLE] Connecting to {}...", device.name));

        let mut conn = match self.transport.connect(device).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("connect failed: {}", e);
                self.bus.log(format!("[BLE] {}", e));
                return None;
            }
        };

        match conn.subscribe_notify().await {
            Ok(link) => {
                self.bus.log("[BLE] Connected. Subscribed to notifications.");
                Some((conn, link))
            }
            Err(e) => {
                warn!("subscribe failed: {}", e);
                self.bus.log(format!("[BLE] {}", e));
                conn.disconnect().await;
                None
            }
        }
    }

    /// Consume link events until the link drops or stop is requested.
    /// An event already received is always decoded and dispatched in full.
    async fn listen(&mut self, link: &mut mpsc::UnboundedReceiver<LinkEvent>) -> ListenOutcome {
        loop {
            if self.stop.is_requested() {
                return ListenOutcome::StopRequested;
            }

            tokio::select! {
                event = link.recv() => match event {
                    Some(LinkEvent::Notification(payload)) => self.handle_frame(&payload),
                    Some(LinkEvent::Dropped) | None => {
                        self.bus.log("[BLE] Link dropped.");
                        return ListenOutcome::LinkDropped;
                    }
                },
                _ = self.stop.notified() => return ListenOutcome::StopRequested,
            }
        }
    }

    /// Decoder → dedup → dispatcher, in that order
    fn handle_frame(&mut self, payload: &[u8]) {
        match frame::decode(payload, &self.config.buttons) {
            DecodedFrame::Other => {
                // Diagnostic only; never reaches the dispatcher
                self.bus
                    .log(format!("[BLE] Other frame: {}", frame::format_hex(payload)));
            }
            DecodedFrame::Short(event) => {
                if !self.dedup.should_process(event.prefix, event.kind, event.seq) {
                    self.bus.log(format!("[BLE] Duplicate ignored: {}", event));
                    return;
                }
                self.bus.log(format!("[BLE] {}", event));
                self.dispatcher.dispatch(&event);
            }
        }
    }

    async fn teardown(&mut self, conn: &mut dyn BleConnection) {
        conn.unsubscribe_notify().await;
        conn.disconnect().await;
        self.bus.log("[BLE] Disconnected from device.");
    }

    /// Fixed reconnect delay. Returns `false` if stop was requested, in which
    /// case no further attempt may be scheduled.
    async fn backoff(&mut self) -> bool {
        if self.state != ConnectionState::Reconnecting {
            self.set_state(ConnectionState::Reconnecting);
        }
        let delay = self.config.device.reconnect_delay();
        self.bus
            .log(format!("[BLE] Will retry in {} ms...", delay.as_millis()));

        if self.stop.is_requested() {
            return false;
        }
        tokio::select! {
            _ = sleep(delay) => !self.stop.is_requested(),
            _ = self.stop.notified() => false,
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.bus.status(state, state.color());
    }

    fn finish(&mut self, terminal: ConnectionState) -> ConnectionState {
        // Terminal paths can skip the listen teardown; keys still go up.
        self.dispatcher.release_all();
        self.set_state(terminal);
        self.bus.control_enabled(true);
        terminal
    }
}
