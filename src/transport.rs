//! BLE transport seam
//!
//! The bridge treats the radio as a black box behind [`BleTransport`]:
//! discover a device by name prefix, connect, subscribe, tear down. Inbound
//! notifications and the "link dropped" signal are both delivered as
//! [`LinkEvent`]s on one channel, so the bridge task consumes them serially in
//! its own context instead of racing a transport callback.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures, classified the way the state machine recovers from them
#[derive(Debug, Error)]
pub enum TransportError {
    /// Radio/adapter unusable. Unrecoverable at this layer.
    #[error("bluetooth adapter unavailable: {0}")]
    Adapter(String),
    /// A connect attempt failed. Recoverable via the reconnect loop.
    #[error("connect failed: {0}")]
    Connect(String),
    /// Subscribing to notifications failed. Treated like a connect failure.
    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// An addressable device found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub name: String,
    pub address: String,
}

/// What the link delivers while subscribed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A raw notification payload; not retained beyond decoding
    Notification(Vec<u8>),
    /// The peripheral dropped the link
    Dropped,
}

/// Discovery and connection establishment
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan for a device whose advertised name starts with `name_prefix`.
    ///
    /// `Ok(None)` means nothing matched within `timeout` (the caller treats
    /// this as terminal). `Err` means the adapter itself is unusable.
    async fn discover(
        &self,
        name_prefix: &str,
        timeout: Duration,
    ) -> Result<Option<DeviceHandle>, TransportError>;

    /// Connect to a previously discovered device
    async fn connect(&self, device: &DeviceHandle)
        -> Result<Box<dyn BleConnection>, TransportError>;
}

/// An established connection
#[async_trait]
pub trait BleConnection: Send {
    /// Subscribe to button notifications.
    ///
    /// Returns the receiver carrying [`LinkEvent`]s in delivery order. The
    /// channel closing is equivalent to [`LinkEvent::Dropped`].
    async fn subscribe_notify(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<LinkEvent>, TransportError>;

    /// Stop notifications. Best effort; safe to call when not subscribed.
    async fn unsubscribe_notify(&mut self);

    /// Tear down the link. Best effort; safe to call twice.
    async fn disconnect(&mut self);
}
