//! Transport trait abstraction for pluggable stream backends

use anyhow::Result;
use async_trait::async_trait;
use btsock_shared::DeviceInfo;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// A transport stream that can read and write bytes
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Owned, type-erased stream handed to a connection
pub type BoxedStream = Box<dyn TransportStream>;

/// A listening endpoint bound to one service identifier
#[async_trait]
pub trait TransportListener: Send {
    /// Block until the next inbound stream arrives
    ///
    /// Returns an error once the endpoint has been closed or has failed.
    async fn accept(&mut self) -> Result<(BoxedStream, DeviceInfo)>;

    /// Close the endpoint; idempotent
    fn close(&mut self);
}

/// Factory for outbound streams and listening endpoints
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open an outbound stream to `device` bound to `service`
    async fn connect(&self, device: &DeviceInfo, service: Uuid) -> Result<BoxedStream>;

    /// Open a listening endpoint bound to `service`
    async fn listen(&self, service: Uuid, name: &str) -> Result<Box<dyn TransportListener>>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
