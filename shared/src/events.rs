//! Typed events delivered to the embedding application
//!
//! Socket events serialize to the JSON wire shapes:
//! ```text
//! {"type":"Connected","name":..,"address":..,"socketKey":..,"listenerKey":..}
//! {"type":"DataReceived","data":..,"socketKey":..}
//! {"type":"Close","socketKey":..}
//! {"type":"Stopped","listenerKey":..}
//! ```

use serde::{Deserialize, Serialize};

use crate::state::AdapterState;

/// Name and address of a remote device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub address: String,
}

impl DeviceInfo {
    pub fn new(name: Option<String>, address: impl Into<String>) -> Self {
        Self {
            name,
            address: address.into(),
        }
    }
}

/// Connection and listener lifecycle events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SocketEvent {
    /// A connection became open (outbound connect or inbound accept)
    #[serde(rename_all = "camelCase")]
    Connected {
        name: Option<String>,
        address: String,
        socket_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        listener_key: Option<String>,
    },
    /// One newline-delimited frame arrived on a connection
    #[serde(rename_all = "camelCase")]
    DataReceived { data: String, socket_key: String },
    /// A connection was destroyed
    #[serde(rename_all = "camelCase")]
    Close { socket_key: String },
    /// A listener was destroyed
    #[serde(rename_all = "camelCase")]
    Stopped { listener_key: String },
}

impl SocketEvent {
    /// The socket key this event refers to, if any
    pub fn socket_key(&self) -> Option<&str> {
        match self {
            SocketEvent::Connected { socket_key, .. }
            | SocketEvent::DataReceived { socket_key, .. }
            | SocketEvent::Close { socket_key } => Some(socket_key),
            SocketEvent::Stopped { .. } => None,
        }
    }
}

/// Notifications relayed from the adapter facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AdapterEvent {
    StateChanged { state: AdapterState },
    DiscoveryChanged { discovering: bool },
    DiscoverableChanged { discoverable: bool },
    DeviceFound { name: Option<String>, address: String },
}

/// Subscriber categories; each has at most one active subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Client-initiated `Connected`, plus `DataReceived` and `Close` for every connection
    Socket,
    /// Server-accepted `Connected` and `Stopped`
    Server,
    AdapterState,
    Discovery,
    Discoverable,
    Discovered,
}

/// Any event that flows through the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Socket(SocketEvent),
    Adapter(AdapterEvent),
}

impl Event {
    /// Category used to route this event to its subscriber
    pub fn category(&self) -> EventCategory {
        match self {
            Event::Socket(SocketEvent::Connected {
                listener_key: Some(_),
                ..
            })
            | Event::Socket(SocketEvent::Stopped { .. }) => EventCategory::Server,
            Event::Socket(_) => EventCategory::Socket,
            Event::Adapter(AdapterEvent::StateChanged { .. }) => EventCategory::AdapterState,
            Event::Adapter(AdapterEvent::DiscoveryChanged { .. }) => EventCategory::Discovery,
            Event::Adapter(AdapterEvent::DiscoverableChanged { .. }) => {
                EventCategory::Discoverable
            }
            Event::Adapter(AdapterEvent::DeviceFound { .. }) => EventCategory::Discovered,
        }
    }
}

impl From<SocketEvent> for Event {
    fn from(event: SocketEvent) -> Self {
        Event::Socket(event)
    }
}

impl From<AdapterEvent> for Event {
    fn from(event: AdapterEvent) -> Self {
        Event::Adapter(event)
    }
}
