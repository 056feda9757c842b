//! Event bus between the bridge task and its host
//!
//! Single producer (the bridge task), single consumer (a UI, a log writer, or
//! a test harness). Messages arrive in emission order; the producer never
//! blocks and never waits for acknowledgement; the consumer drains whatever is
//! pending without blocking when the queue is empty.

use tokio::sync::mpsc;
use tracing::debug;

use crate::bridge::ConnectionState;

/// Display color suggestion for a status change (the original UI's dot)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorHint {
    Gray,
    Orange,
    Green,
    Red,
}

/// Tagged messages carried by the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// Free-form log line for display
    Log(String),
    /// Bridge state changed
    StatusChanged(ConnectionState, ColorHint),
    /// Whether the host should allow a new start request
    ControlEnabled(bool),
}

/// Create a connected bus pair
pub fn channel() -> (BusSender, BusReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BusSender { tx }, BusReceiver { rx })
}

/// Producer half. Sends are fire-and-forget; a gone consumer is not an error.
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl BusSender {
    pub fn log(&self, line: impl Into<String>) {
        self.send(BusMessage::Log(line.into()));
    }

    pub fn status(&self, state: ConnectionState, color: ColorHint) {
        self.send(BusMessage::StatusChanged(state, color));
    }

    pub fn control_enabled(&self, enabled: bool) {
        self.send(BusMessage::ControlEnabled(enabled));
    }

    fn send(&self, message: BusMessage) {
        if self.tx.send(message).is_err() {
            debug!("bus consumer gone, dropping message");
        }
    }
}

/// Consumer half
pub struct BusReceiver {
    rx: mpsc::UnboundedReceiver<BusMessage>,
}

impl BusReceiver {
    /// Take every pending message without blocking
    pub fn drain(&mut self) -> Vec<BusMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Wait for the next message; `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}
