//! State shared by the listener, connector and connection tasks

use crate::adapter::AdapterFacade;
use crate::connection::listener::Listener;
use crate::connection::manager::ManagerConfig;
use crate::connection::registry::Registry;
use crate::connection::socket::{run_read_loop, Connection};
use crate::events::EventSink;
use crate::transport::{BoxedStream, Transport};
use btsock_shared::{ConnectionState, SocketError};
use std::sync::Arc;
use tokio::io::ReadHalf;
use tracing::info;

pub(crate) struct SocketContext {
    pub config: ManagerConfig,
    pub adapter: Arc<dyn AdapterFacade>,
    pub transport: Arc<dyn Transport>,
    pub connections: Registry<Arc<Connection>>,
    pub listeners: Registry<Arc<Listener>>,
    pub events: EventSink,
}

impl SocketContext {
    /// Fail `AdapterDisabled` unless an adapter is present and powered on
    pub async fn ensure_enabled(&self) -> Result<(), SocketError> {
        if !self.adapter.is_enabled().await {
            return Err(SocketError::AdapterDisabled);
        }
        Ok(())
    }

    /// Atomically register a new connection and announce it
    ///
    /// Returns false if the key is already taken; nothing is emitted then.
    /// `Connected` is emitted under the connection's lifecycle guard, so a
    /// racing disconnect cannot emit `Close` ahead of it.
    pub fn register_connection(&self, conn: &Arc<Connection>) -> bool {
        let _lifecycle = conn.lifecycle();
        if !self.connections.try_insert(conn.key(), conn.clone()) {
            return false;
        }
        self.events.emit(conn.connected_event());
        info!(
            "[SOCKET] {} open to {} ({})",
            conn.key(),
            conn.device().address,
            conn.device().name.as_deref().unwrap_or("unknown")
        );
        true
    }

    /// Launch the read loop for a registered connection
    pub fn spawn_reader(self: &Arc<Self>, conn: Arc<Connection>, reader: ReadHalf<BoxedStream>) {
        tokio::spawn(run_read_loop(self.clone(), conn, reader));
    }

    /// Remove a connection from the registry and emit its `Close`
    ///
    /// Only the first caller for a given connection wins; it returns true.
    pub fn release_connection(&self, conn: &Arc<Connection>) -> bool {
        if !self.connections.remove_exact(conn.key(), conn) {
            return false;
        }
        let mut state = conn.lifecycle();
        if *state == ConnectionState::Closed {
            return false;
        }
        let event = Connection::mark_closed(&mut state, conn.key());
        self.events.emit(event);
        info!("[SOCKET] {} closed", conn.key());
        true
    }

    /// Emit `Stopped` for a listener already removed from the registry
    pub fn finish_listener(&self, listener: &Listener) {
        if let Some(event) = listener.mark_stopped() {
            self.events.emit(event);
            info!("[LISTENER] {} stopped", listener.key());
        }
    }

    /// Remove a listener if it is still registered and emit its `Stopped`
    pub fn release_listener(&self, listener: &Arc<Listener>) -> bool {
        if !self.listeners.remove_exact(listener.key(), listener) {
            return false;
        }
        self.finish_listener(listener);
        true
    }
}
