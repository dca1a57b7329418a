//! Adapter facade: power, discoverability, discovery and device lookup

use anyhow::Result;
use async_trait::async_trait;
use btsock_shared::{AdapterState, DeviceInfo};

/// Platform adapter operations the socket manager calls through
///
/// Notifications (state changes, discovery, discoverability, devices found)
/// are relayed by the implementation into the event sink it was built with.
#[async_trait]
pub trait AdapterFacade: Send + Sync {
    /// Whether an adapter exists at all
    fn is_present(&self) -> bool;

    /// Current power state
    async fn state(&self) -> Result<AdapterState>;

    /// Whether the adapter is present and powered on
    async fn is_enabled(&self) -> bool {
        self.is_present() && matches!(self.state().await, Ok(AdapterState::On))
    }

    /// Ask the platform (or user) to power the adapter on
    async fn request_enable(&self) -> Result<()>;

    /// Power the adapter on or off directly
    async fn set_enabled(&self, enabled: bool) -> Result<()>;

    async fn is_discoverable(&self) -> Result<bool>;

    /// Ask the platform to make the adapter discoverable
    async fn request_discoverable(&self) -> Result<()>;

    async fn start_discovery(&self) -> Result<()>;

    async fn cancel_discovery(&self) -> Result<()>;

    /// Devices previously paired at the platform level
    async fn bonded_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Resolve an address string to a reachable remote device
    async fn resolve_device(&self, address: &str) -> Option<DeviceInfo>;
}
