//! Lifecycle states
//!
//! Connections and listeners each have a single terminal transition; the
//! adapter state mirrors the platform power states.

use serde::{Deserialize, Serialize};

/// State of one open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// State of one listening endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    Listening,
    Stopped,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl ListenerState {
    pub fn is_terminal(self) -> bool {
        self == ListenerState::Stopped
    }
}

/// Check if a connection transition is valid
pub fn is_valid_connection_transition(from: ConnectionState, to: ConnectionState) -> bool {
    matches!(
        (from, to),
        (ConnectionState::Open, ConnectionState::Closed)
    )
}

/// Check if a listener transition is valid
pub fn is_valid_listener_transition(from: ListenerState, to: ListenerState) -> bool {
    matches!(
        (from, to),
        (ListenerState::Listening, ListenerState::Stopped)
    )
}

/// Adapter power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Off,
    TurningOn,
    On,
    TurningOff,
}

impl AdapterState {
    /// Platform-compatible integer code (10..=13)
    pub fn code(self) -> i32 {
        match self {
            AdapterState::Off => 10,
            AdapterState::TurningOn => 11,
            AdapterState::On => 12,
            AdapterState::TurningOff => 13,
        }
    }

    /// Parse a platform integer code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            10 => Some(AdapterState::Off),
            11 => Some(AdapterState::TurningOn),
            12 => Some(AdapterState::On),
            13 => Some(AdapterState::TurningOff),
            _ => None,
        }
    }

    pub fn is_on(self) -> bool {
        self == AdapterState::On
    }
}

impl From<bool> for AdapterState {
    fn from(powered: bool) -> Self {
        if powered {
            AdapterState::On
        } else {
            AdapterState::Off
        }
    }
}
