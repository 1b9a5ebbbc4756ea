//! Device registry, message queue, connection state machine, and the
//! discovery/dispatch/TTL-sweep machinery that drive the local protocol
//! engine (§3-§9). Builds on the wire-level types in `klyqa_protocol`.

pub mod addresses;
pub mod connection;
pub mod controller;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod queue;
pub mod registry;
pub mod ttl_sweeper;

pub use connection::{handle_connection, ConnectionContext};
pub use controller::Controller;
pub use device::{Device, DeviceKind, DeviceStatus};
pub use dispatcher::DispatcherConfig;
pub use error::ConnectionOutcome;
pub use message::{Message, MessageResult, MessageState, QueuedCommand};
pub use queue::MessageQueue;
pub use registry::ControllerData;
