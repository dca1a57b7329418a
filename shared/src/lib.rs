//! btsock Shared Protocol Types
//!
//! This crate provides the wire-level types shared by the socket manager and
//! anything embedding it: lifecycle events, the newline-delimited line codec,
//! the error taxonomy and the fixed service parameters.

pub mod codec;
pub mod error;
pub mod events;
pub mod state;

pub use error::SocketError;
pub use events::{AdapterEvent, DeviceInfo, Event, EventCategory, SocketEvent};
pub use state::{AdapterState, ConnectionState, ListenerState};

/// Fixed service parameters used to match listeners to connectors
pub mod service {
    use uuid::Uuid;

    /// 128-bit service identifier advertised by listeners and dialed by connectors
    pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x995f40e0_ce68_4d24_8f68_f49d2b9d661f);

    /// Human-readable name published in the service record
    pub const SERVICE_NAME: &str = "btsock serial link";

    /// Default connect timeout in milliseconds
    pub const CONNECT_TIMEOUT_MS: u64 = 30_000;
}

/// Generate a fresh connection key for a server-accepted stream
pub fn generate_socket_key() -> String {
    uuid::Uuid::new_v4().to_string()
}
