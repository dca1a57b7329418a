//! Event delivery to the embedding application
//!
//! This module handles:
//! - Serializing events from many producer tasks onto one delivery task
//! - At most one active subscriber per event category

mod dispatcher;

pub use btsock_shared::{AdapterEvent, Event, EventCategory, SocketEvent};
pub use dispatcher::{EventDispatcher, EventSink, Subscription};
