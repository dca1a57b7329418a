//! Outbound connection attempts

use crate::connection::context::SocketContext;
use crate::connection::socket::{Connection, ConnectionOrigin};
use btsock_shared::{DeviceInfo, SocketError};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, trace, warn};

/// Pending outcome of a connect request
///
/// Dropping it does not cancel the attempt.
pub struct ConnectAttempt {
    key: String,
    outcome: oneshot::Receiver<Result<(), SocketError>>,
}

impl ConnectAttempt {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the attempt to finish
    pub async fn outcome(self) -> Result<(), SocketError> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(SocketError::ConnectionFailed(format!(
                "{}: connect task ended without a result",
                self.key
            ))),
        }
    }
}

/// Opens outbound connections under caller-supplied keys
pub struct ClientConnector {
    ctx: Arc<SocketContext>,
}

impl ClientConnector {
    pub(crate) fn new(ctx: Arc<SocketContext>) -> Self {
        Self { ctx }
    }

    /// Validate the request and launch the connect attempt
    ///
    /// Precondition failures are returned here. The attempt itself runs as
    /// its own task; its success or failure is reported through the
    /// returned [`ConnectAttempt`], and a `Connected` event is emitted only
    /// on success.
    pub async fn connect(&self, key: &str, address: &str) -> Result<ConnectAttempt, SocketError> {
        self.ctx.ensure_enabled().await?;

        if self.ctx.connections.contains(key) {
            return Err(SocketError::AlreadyConnected(key.to_string()));
        }

        let device = self
            .ctx
            .adapter
            .resolve_device(address)
            .await
            .ok_or_else(|| SocketError::DeviceNotFound(address.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        let task_key = key.to_string();
        tokio::spawn(async move {
            let outcome = attempt(ctx, task_key, device).await;
            let _ = tx.send(outcome);
        });

        Ok(ConnectAttempt {
            key: key.to_string(),
            outcome: rx,
        })
    }
}

async fn attempt(
    ctx: Arc<SocketContext>,
    key: String,
    device: DeviceInfo,
) -> Result<(), SocketError> {
    info!(
        "[CONNECT] {} dialing {} via {}",
        key,
        device.address,
        ctx.transport.name()
    );

    let connect = ctx.transport.connect(&device, ctx.config.service_uuid);
    let stream = match timeout(ctx.config.connect_timeout, connect).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("[CONNECT] {} to {} failed: {}", key, device.address, e);
            return Err(SocketError::ConnectionFailed(format!(
                "{}: {}",
                device.address, e
            )));
        }
        Err(_) => {
            warn!("[CONNECT] {} to {} timed out", key, device.address);
            return Err(SocketError::ConnectionFailed(format!(
                "{}: timed out after {:?}",
                device.address, ctx.config.connect_timeout
            )));
        }
    };

    let (conn, reader) = Connection::open(key, device, ConnectionOrigin::ClientInitiated, stream);
    if !ctx.register_connection(&conn) {
        warn!("[CONNECT] {} lost the registration race", conn.key());
        if let Err(e) = conn.close().await {
            trace!("[CONNECT] Ignoring close error on {}: {}", conn.key(), e);
        }
        return Err(SocketError::Interrupted(conn.key().to_string()));
    }

    ctx.spawn_reader(conn, reader);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abandoned_attempt_reports_failure() {
        let (tx, rx) = oneshot::channel::<Result<(), SocketError>>();
        drop(tx);
        let attempt = ConnectAttempt {
            key: "c1".into(),
            outcome: rx,
        };
        assert!(matches!(
            attempt.outcome().await,
            Err(SocketError::ConnectionFailed(_))
        ));
    }
}
