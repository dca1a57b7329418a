//! Adapter facade
//!
//! This module handles:
//! - Adapter presence and power state
//! - Discoverability and discovery sessions
//! - Bonded device enumeration and address resolution
//! - Relaying adapter notifications as events

pub mod bluez;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use bluez::BluezAdapter;
pub use traits::AdapterFacade;
