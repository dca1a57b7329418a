//! Socket manager: the request surface over listeners, connectors and connections

use crate::adapter::AdapterFacade;
use crate::connection::connector::{ClientConnector, ConnectAttempt};
use crate::connection::context::SocketContext;
use crate::connection::listener::ServerListener;
use crate::connection::registry::Registry;
use crate::connection::socket::ConnectionInfo;
use crate::events::{EventCategory, EventDispatcher, EventSink, Subscription};
use crate::transport::Transport;
use btsock_shared::codec::DEFAULT_MAX_FRAME_LEN;
use btsock_shared::service::{CONNECT_TIMEOUT_MS, SERVICE_NAME, SERVICE_UUID};
use btsock_shared::{AdapterState, DeviceInfo, SocketError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the socket manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Service identifier listeners bind to and connectors dial
    pub service_uuid: Uuid,
    /// Service record name advertised for listeners
    pub service_name: String,
    /// Upper bound on one outbound connect attempt
    pub connect_timeout: Duration,
    /// Longest accepted inbound frame, excluding the newline
    pub max_frame_len: usize,
    /// Size of each read from a stream
    pub read_buffer_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            service_uuid: SERVICE_UUID,
            service_name: SERVICE_NAME.into(),
            connect_timeout: Duration::from_millis(CONNECT_TIMEOUT_MS),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_buffer_size: 4096,
        }
    }
}

/// Manages keyed connections and listeners over one adapter and transport
pub struct SocketManager {
    ctx: Arc<SocketContext>,
    dispatcher: EventDispatcher,
    listener: ServerListener,
    connector: ClientConnector,
}

impl SocketManager {
    pub fn new(
        config: ManagerConfig,
        adapter: Arc<dyn AdapterFacade>,
        transport: Arc<dyn Transport>,
        dispatcher: EventDispatcher,
    ) -> Self {
        info!(
            "[SOCKET] Manager ready: service {} via {}",
            config.service_uuid,
            transport.name()
        );

        let ctx = Arc::new(SocketContext {
            config,
            adapter,
            transport,
            connections: Registry::new(),
            listeners: Registry::new(),
            events: dispatcher.sink(),
        });

        Self {
            listener: ServerListener::new(ctx.clone()),
            connector: ClientConnector::new(ctx.clone()),
            ctx,
            dispatcher,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.ctx.config
    }

    /// Subscribe to one event category, replacing any previous subscriber
    pub fn subscribe(&self, category: EventCategory) -> Subscription {
        self.dispatcher.subscribe(category)
    }

    /// Producer handle into the same delivery queue the manager uses
    pub fn events(&self) -> EventSink {
        self.dispatcher.sink()
    }

    pub fn listener(&self) -> &ServerListener {
        &self.listener
    }

    pub fn connector(&self) -> &ClientConnector {
        &self.connector
    }

    // ---- Socket requests ----

    /// Open an outbound connection to `address` under `key`
    pub async fn connect(&self, key: &str, address: &str) -> Result<ConnectAttempt, SocketError> {
        self.connector.connect(key, address).await
    }

    /// Start listening for inbound connections on the configured service
    pub async fn start_listener(&self, key: &str) -> Result<(), SocketError> {
        self.listener.start(key, self.ctx.config.service_uuid).await
    }

    pub fn stop_listener(&self, key: &str) -> Result<(), SocketError> {
        self.listener.stop(key)
    }

    /// Send `payload` as one newline-terminated frame
    pub async fn write(&self, key: &str, payload: &[u8]) -> Result<(), SocketError> {
        let conn = self
            .ctx
            .connections
            .get(key)
            .ok_or_else(|| SocketError::NotConnected(key.to_string()))?;
        conn.write_frame(payload).await
    }

    /// Close the connection under `key` and emit its `Close`
    ///
    /// A shutdown error is still reported as `IoFailure`, after cleanup.
    pub async fn disconnect(&self, key: &str) -> Result<(), SocketError> {
        let conn = self
            .ctx
            .connections
            .get(key)
            .ok_or_else(|| SocketError::NotConnected(key.to_string()))?;

        let closed = conn.close().await;
        self.ctx.release_connection(&conn);

        closed.map_err(|e| {
            warn!("[SOCKET] Closing {} reported: {}", key, e);
            SocketError::IoFailure(format!("{}: {}", key, e))
        })
    }

    // ---- Queries ----

    pub fn connection_info(&self, key: &str) -> Option<ConnectionInfo> {
        self.ctx.connections.get(key).map(|conn| conn.info())
    }

    pub fn connection_keys(&self) -> Vec<String> {
        self.ctx.connections.keys()
    }

    pub fn listener_keys(&self) -> Vec<String> {
        self.ctx.listeners.keys()
    }

    // ---- Adapter passthroughs ----

    pub fn is_supported(&self) -> bool {
        self.ctx.adapter.is_present()
    }

    pub async fn adapter_state(&self) -> Result<AdapterState, SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.state().await.map_err(adapter_error)
    }

    pub async fn is_enabled(&self) -> bool {
        self.ctx.adapter.is_enabled().await
    }

    pub async fn is_discoverable(&self) -> Result<bool, SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.is_discoverable().await.map_err(adapter_error)
    }

    pub async fn request_enable(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.request_enable().await.map_err(adapter_error)
    }

    pub async fn enable(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.set_enabled(true).await.map_err(adapter_error)
    }

    pub async fn disable(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.set_enabled(false).await.map_err(adapter_error)
    }

    pub async fn request_discoverable(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx
            .adapter
            .request_discoverable()
            .await
            .map_err(adapter_error)
    }

    /// Start discovery; found devices arrive as `Discovered` events
    pub async fn start_discovery(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx.ensure_enabled().await?;
        self.ctx.adapter.start_discovery().await.map_err(adapter_error)
    }

    pub async fn cancel_discovery(&self) -> Result<(), SocketError> {
        self.require_adapter()?;
        self.ctx.adapter.cancel_discovery().await.map_err(adapter_error)
    }

    pub async fn bonded_devices(&self) -> Result<Vec<DeviceInfo>, SocketError> {
        self.require_adapter()?;
        self.ctx.ensure_enabled().await?;
        self.ctx.adapter.bonded_devices().await.map_err(adapter_error)
    }

    fn require_adapter(&self) -> Result<(), SocketError> {
        if !self.ctx.adapter.is_present() {
            return Err(SocketError::AdapterUnavailable);
        }
        Ok(())
    }
}

fn adapter_error(e: anyhow::Error) -> SocketError {
    SocketError::Adapter(e.to_string())
}
