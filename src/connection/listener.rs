//! Listening endpoints and their accept loops
//!
//! `Stopped` is gated on winning the registry removal: either `stop` or the
//! accept loop's own termination path removes the entry, never both, so each
//! listener lifetime ends with exactly one `Stopped`.

use crate::connection::context::SocketContext;
use crate::connection::socket::{Connection, ConnectionOrigin};
use crate::transport::{BoxedStream, TransportListener};
use btsock_shared::state::is_valid_listener_transition;
use btsock_shared::{generate_socket_key, DeviceInfo, ListenerState, SocketError, SocketEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Registry entry for one listening endpoint
pub struct Listener {
    key: String,
    service: Uuid,
    cancel: CancellationToken,
    state: Mutex<ListenerState>,
}

impl Listener {
    fn new(key: &str, service: Uuid) -> Self {
        Self {
            key: key.to_string(),
            service,
            cancel: CancellationToken::new(),
            state: Mutex::new(ListenerState::Listening),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn service(&self) -> Uuid {
        self.service
    }

    pub fn state(&self) -> ListenerState {
        *self.state_guard()
    }

    fn state_guard(&self) -> MutexGuard<'_, ListenerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close the endpoint out-of-band; the accept loop notices and exits
    fn close(&self) {
        self.cancel.cancel();
    }

    /// Move to Stopped, returning the terminal event the first time only
    pub(crate) fn mark_stopped(&self) -> Option<SocketEvent> {
        let mut state = self.state_guard();
        if !is_valid_listener_transition(*state, ListenerState::Stopped) {
            return None;
        }
        *state = ListenerState::Stopped;
        Some(SocketEvent::Stopped {
            listener_key: self.key.clone(),
        })
    }
}

/// Starts and stops keyed listeners
pub struct ServerListener {
    ctx: Arc<SocketContext>,
}

impl ServerListener {
    pub(crate) fn new(ctx: Arc<SocketContext>) -> Self {
        Self { ctx }
    }

    /// Bind a listening endpoint to `service` under `key` and launch its accept loop
    ///
    /// Returns as soon as the endpoint is bound; accepted connections are
    /// reported as server `Connected` events.
    pub async fn start(&self, key: &str, service: Uuid) -> Result<(), SocketError> {
        self.ctx.ensure_enabled().await?;

        if self.ctx.connections.contains(key) {
            return Err(SocketError::AlreadyConnected(key.to_string()));
        }

        let listener = Arc::new(Listener::new(key, service));
        if !self.ctx.listeners.try_insert(key, listener.clone()) {
            return Err(SocketError::AlreadyListening(key.to_string()));
        }

        let endpoint = match self
            .ctx
            .transport
            .listen(service, &self.ctx.config.service_name)
            .await
        {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("[LISTENER] {} failed to bind {}: {}", key, service, e);
                self.ctx.listeners.remove_exact(key, &listener);
                listener.close();
                return Err(SocketError::IoFailure(format!("{}: {}", key, e)));
            }
        };

        info!(
            "[LISTENER] {} listening on {} via {}",
            key,
            service,
            self.ctx.transport.name()
        );
        tokio::spawn(run_accept_loop(self.ctx.clone(), listener, endpoint));
        Ok(())
    }

    /// Stop the listener registered under `key`
    pub fn stop(&self, key: &str) -> Result<(), SocketError> {
        let listener = self
            .ctx
            .listeners
            .remove(key)
            .ok_or_else(|| SocketError::NotListening(key.to_string()))?;

        listener.close();
        self.ctx.finish_listener(&listener);
        Ok(())
    }
}

fn still_registered(ctx: &SocketContext, listener: &Arc<Listener>) -> bool {
    !listener.cancel.is_cancelled()
        && ctx
            .listeners
            .get(listener.key())
            .is_some_and(|current| Arc::ptr_eq(&current, listener))
}

async fn run_accept_loop(
    ctx: Arc<SocketContext>,
    listener: Arc<Listener>,
    mut endpoint: Box<dyn TransportListener>,
) {
    let reason = loop {
        let accepted = tokio::select! {
            biased;
            _ = listener.cancel.cancelled() => break "stopped".to_string(),
            accepted = endpoint.accept() => accepted,
        };

        let (stream, device) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => break format!("accept failed: {}", e),
        };

        if !still_registered(&ctx, &listener) {
            break "stopped".to_string();
        }

        install_accepted(&ctx, &listener, stream, device).await;
    };

    endpoint.close();
    debug!("[LISTENER] Accept loop for {} ending: {}", listener.key, reason);
    ctx.release_listener(&listener);
}

async fn install_accepted(
    ctx: &Arc<SocketContext>,
    listener: &Listener,
    stream: BoxedStream,
    device: DeviceInfo,
) {
    let origin = ConnectionOrigin::ServerAccepted {
        listener_key: listener.key.clone(),
    };
    let (conn, reader) = Connection::open(generate_socket_key(), device, origin, stream);

    if !ctx.register_connection(&conn) {
        warn!(
            "[LISTENER] {} generated a colliding key {}, dropping stream",
            listener.key,
            conn.key()
        );
        if let Err(e) = conn.close().await {
            trace!("[LISTENER] Ignoring close error on {}: {}", conn.key(), e);
        }
        return;
    }

    ctx.spawn_reader(conn, reader);
}
