//! Wire-level types for the local device protocol: frame codec, AES
//! session, and the JSON command model.
//!
//! This crate has no knowledge of sockets, device registries, or message
//! queues: it only knows how to turn bytes into frames, frames into
//! plaintext, and commands into JSON.

pub mod aes_session;
pub mod commands;
pub mod device_config;
pub mod error;
pub mod frame;

pub use aes_session::AesSession;
pub use device_config::DeviceConfig;
pub use error::ProtocolError;
pub use frame::{Frame, FrameParser, FrameType};
