//! Keyed connection and listener management
//!
//! This module handles:
//! - Atomic key registration for connections and listeners
//! - Accept loops for listeners and outbound connect attempts
//! - Newline-framed reads and writes on each open stream
//! - Exactly one terminal event per connection and listener lifetime

mod connector;
mod context;
mod listener;
mod manager;
mod registry;
mod socket;

#[cfg(test)]
pub(crate) mod testing;

pub use connector::{ClientConnector, ConnectAttempt};
pub use listener::{Listener, ServerListener};
pub use manager::{ManagerConfig, SocketManager};
pub use registry::Registry;
pub use socket::{Connection, ConnectionInfo, ConnectionOrigin};
