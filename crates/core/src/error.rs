use crate::device::DeviceKind;
use thiserror::Error;

/// Errors raised synchronously to callers of the streaming API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamingError {
    /// The device id is not in the registry
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// No playback session exists for the device
    #[error("no streaming session for device: {0}")]
    UnknownSession(String),

    /// No streamer is bound to the device's protocol
    #[error("no streamer bound to {kind} device {device_id}")]
    UnsupportedDevice { device_id: String, kind: DeviceKind },

    /// The media catalog has no such node
    #[error("unknown media node: {0}")]
    UnknownNode(String),
}

/// Errors loading the server configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid device entry '{name}': {reason}")]
    InvalidDevice { name: String, reason: String },
}
