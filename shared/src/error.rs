//! Error taxonomy reported to request callers

use thiserror::Error;

/// Errors returned synchronously by socket manager requests
///
/// Precondition failures never produce an event. I/O failures detected inside
/// a running accept or read loop are not reported here; they surface once as
/// the loop's terminal `Close` or `Stopped` event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Bluetooth is not supported")]
    AdapterUnavailable,

    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    #[error("Already connected: {0}")]
    AlreadyConnected(String),

    #[error("Already listening: {0}")]
    AlreadyListening(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Not listening: {0}")]
    NotListening(String),

    #[error("Failed to find the device: {0}")]
    DeviceNotFound(String),

    #[error("Failed to connect to remote socket: {0}")]
    ConnectionFailed(String),

    /// Another registration of the same key completed first
    #[error("Failed to connect, interrupted: {0}")]
    Interrupted(String),

    /// Write hit a broken stream
    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    /// Adapter facade rejected a passthrough request
    #[error("Adapter request failed: {0}")]
    Adapter(String),
}

impl SocketError {
    /// Stable identifier for the error kind, suitable for a request surface
    pub fn kind(&self) -> &'static str {
        match self {
            SocketError::AdapterUnavailable => "AdapterUnavailable",
            SocketError::AdapterDisabled => "AdapterDisabled",
            SocketError::AlreadyConnected(_) => "AlreadyConnected",
            SocketError::AlreadyListening(_) => "AlreadyListening",
            SocketError::NotConnected(_) => "NotConnected",
            SocketError::NotListening(_) => "NotListening",
            SocketError::DeviceNotFound(_) => "DeviceNotFound",
            SocketError::ConnectionFailed(_) => "ConnectionFailed",
            SocketError::Interrupted(_) => "Interrupted",
            SocketError::Disconnected(_) => "Disconnected",
            SocketError::IoFailure(_) => "IOFailure",
            SocketError::Adapter(_) => "Adapter",
        }
    }
}
