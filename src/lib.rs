//! btsock: keyed RFCOMM connections and listeners with newline-framed I/O
//!
//! A [`SocketManager`] owns two registries (open connections and active
//! listeners), runs one task per accept loop, read loop and connect attempt,
//! and reports lifecycle changes as typed events through an
//! [`EventDispatcher`].

pub mod adapter;
pub mod connection;
pub mod events;
pub mod transport;

pub use adapter::{AdapterFacade, BluezAdapter};
pub use btsock_shared::{
    AdapterEvent, AdapterState, DeviceInfo, Event, EventCategory, SocketError, SocketEvent,
};
pub use connection::{ConnectAttempt, ConnectionInfo, ManagerConfig, SocketManager};
pub use events::{EventDispatcher, EventSink, Subscription};
pub use transport::{RfcommConfig, RfcommTransport, Transport};
