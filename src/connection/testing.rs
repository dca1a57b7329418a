//! Test harness wiring a manager to the in-memory adapter and transport

use crate::adapter::memory::MemoryAdapter;
use crate::connection::manager::{ManagerConfig, SocketManager};
use crate::events::{EventDispatcher, Subscription};
use crate::transport::memory::MemoryTransport;
use btsock_shared::{DeviceInfo, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::time::timeout;

pub const PEER_ADDR: &str = "AA:BB:CC:DD:EE:01";

/// The one remote device the harness adapter knows about, bonded
pub fn peer() -> DeviceInfo {
    DeviceInfo::new(Some("peer".into()), PEER_ADDR)
}

pub struct Harness {
    pub manager: SocketManager,
    pub adapter: Arc<MemoryAdapter>,
    pub transport: MemoryTransport,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(ManagerConfig::default(), MemoryAdapter::new())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        Self::build(config, MemoryAdapter::new())
    }

    pub fn with_adapter(adapter: MemoryAdapter) -> Self {
        Self::build(ManagerConfig::default(), adapter)
    }

    fn build(config: ManagerConfig, adapter: MemoryAdapter) -> Self {
        let dispatcher = EventDispatcher::new();
        let adapter = Arc::new(adapter.with_events(dispatcher.sink()));
        adapter.add_device(peer(), true);
        let transport = MemoryTransport::new();

        let manager = SocketManager::new(
            config,
            adapter.clone(),
            Arc::new(transport.clone()),
            dispatcher,
        );

        Self {
            manager,
            adapter,
            transport,
        }
    }

    /// Open a client connection to the peer and return the peer's end of it
    pub async fn connect_client(&self, key: &str) -> DuplexStream {
        let attempt = self.manager.connect(key, PEER_ADDR).await.unwrap();
        attempt.outcome().await.unwrap();
        self.transport.next_remote().await.unwrap().stream
    }
}

/// Wait for the next event on `sub`, failing the test after a second
pub async fn next_event(sub: &mut Subscription) -> Event {
    timeout(Duration::from_secs(1), sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription ended")
}

/// Assert nothing further arrives on `sub` for a short while
pub async fn no_event(sub: &mut Subscription) {
    if let Ok(Some(event)) = timeout(Duration::from_millis(50), sub.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}
