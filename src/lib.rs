//! KICKR Bridge - Rust implementation
//!
//! Bridges Wahoo KICKR BIKE SHIFT button notifications to key presses,
//! surviving transient radio disconnects without ever leaving an output key
//! stuck down.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod frame;
pub mod keys;
pub mod registry;
pub mod sim;
pub mod transport;

// Re-export commonly used items
pub use bridge::{Bridge, ConnectionState, StopHandle};
pub use bus::{BusMessage, BusReceiver, ColorHint};
pub use config::{BridgeConfig, ButtonBehavior, ButtonDescriptor, DescriptorTable};
pub use frame::{ButtonEvent, DecodedFrame, EventKind};
pub use keys::{ConsoleKeySink, KeySink};
pub use transport::{BleConnection, BleTransport, DeviceHandle, LinkEvent};
