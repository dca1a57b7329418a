//! Individual connection handling
//!
//! A connection owns one open stream. Its read loop is the only reader; the
//! write half sits behind an async mutex so concurrent writers are
//! serialized. Closing cancels the connection's token, which is how a blocked
//! read is interrupted, then shuts the write half down.

use crate::connection::context::SocketContext;
use crate::transport::BoxedStream;
use anyhow::Result;
use btsock_shared::codec::LineDecoder;
use btsock_shared::state::is_valid_connection_transition;
use btsock_shared::{codec, ConnectionState, DeviceInfo, SocketError, SocketEvent};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How a connection came to exist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOrigin {
    ClientInitiated,
    ServerAccepted { listener_key: String },
}

impl ConnectionOrigin {
    pub fn listener_key(&self) -> Option<&str> {
        match self {
            ConnectionOrigin::ClientInitiated => None,
            ConnectionOrigin::ServerAccepted { listener_key } => Some(listener_key),
        }
    }
}

/// Read-only snapshot of a live connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub key: String,
    pub device: DeviceInfo,
    pub origin: ConnectionOrigin,
    pub state: ConnectionState,
}

/// One open stream
pub struct Connection {
    key: String,
    device: DeviceInfo,
    origin: ConnectionOrigin,
    writer: tokio::sync::Mutex<WriteHalf<BoxedStream>>,
    cancel: CancellationToken,
    /// Guards lifecycle event emission for this connection
    lifecycle: Mutex<ConnectionState>,
}

impl Connection {
    /// Wrap a freshly opened stream, returning the read half for the read loop
    pub(crate) fn open(
        key: String,
        device: DeviceInfo,
        origin: ConnectionOrigin,
        stream: BoxedStream,
    ) -> (Arc<Self>, ReadHalf<BoxedStream>) {
        let (reader, writer) = tokio::io::split(stream);
        let conn = Arc::new(Self {
            key,
            device,
            origin,
            writer: tokio::sync::Mutex::new(writer),
            cancel: CancellationToken::new(),
            lifecycle: Mutex::new(ConnectionState::Open),
        });
        (conn, reader)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn origin(&self) -> &ConnectionOrigin {
        &self.origin
    }

    pub fn state(&self) -> ConnectionState {
        *self.lifecycle()
    }

    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            key: self.key.clone(),
            device: self.device.clone(),
            origin: self.origin.clone(),
            state: self.state(),
        }
    }

    pub(crate) fn lifecycle(&self) -> MutexGuard<'_, ConnectionState> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn connected_event(&self) -> SocketEvent {
        SocketEvent::Connected {
            name: self.device.name.clone(),
            address: self.device.address.clone(),
            socket_key: self.key.clone(),
            listener_key: self.origin.listener_key().map(str::to_string),
        }
    }

    /// Move to Closed and build the terminal event; the caller emits it under the guard
    pub(crate) fn mark_closed(state: &mut ConnectionState, key: &str) -> SocketEvent {
        debug_assert!(is_valid_connection_transition(*state, ConnectionState::Closed));
        *state = ConnectionState::Closed;
        SocketEvent::Close {
            socket_key: key.to_string(),
        }
    }

    /// Write one newline-terminated frame and flush
    ///
    /// A transport failure is reported as `Disconnected`; the read loop is
    /// left to discover the broken stream and emit `Close`. Closing the
    /// connection abandons a pending write and releases the write half.
    pub(crate) async fn write_frame(&self, payload: &[u8]) -> Result<(), SocketError> {
        let frame = codec::encode(payload);
        let written = async {
            let mut writer = self.writer.lock().await;
            writer.write_all(&frame).await?;
            writer.flush().await
        };

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(SocketError::Disconnected(self.key.clone()));
            }
            result = written => result,
        };

        result.map_err(|e| {
            warn!("[SOCKET] Write to {} failed: {}", self.key, e);
            SocketError::Disconnected(format!("{}: {}", self.key, e))
        })
    }

    /// Close the handle: interrupt the read loop, then shut the write half down
    pub(crate) async fn close(&self) -> std::io::Result<()> {
        self.cancel.cancel();
        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

/// Pulls newline-delimited frames off the read half
struct FrameReader<R> {
    reader: R,
    decoder: LineDecoder,
    buf: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    fn new(reader: R, max_frame_len: usize, read_buffer_size: usize) -> Self {
        Self {
            reader,
            decoder: LineDecoder::with_max_frame_len(max_frame_len),
            buf: vec![0u8; read_buffer_size.max(1)],
            eof: false,
        }
    }

    /// Read the next frame
    /// Returns None once the peer has closed the stream and the buffer is drained
    async fn next_frame(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.decoder.decode_next()? {
                return Ok(Some(line));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
                return Ok(self.decoder.finish());
            }
            self.decoder.extend(&self.buf[..n]);
        }
    }
}

/// Deliver frames until the stream fails, the peer closes, or the connection is closed locally
pub(crate) async fn run_read_loop(
    ctx: Arc<SocketContext>,
    conn: Arc<Connection>,
    reader: ReadHalf<BoxedStream>,
) {
    let mut frames = FrameReader::new(
        reader,
        ctx.config.max_frame_len,
        ctx.config.read_buffer_size,
    );

    let reason = loop {
        tokio::select! {
            biased;
            _ = conn.cancel.cancelled() => break "closed locally".to_string(),
            frame = frames.next_frame() => match frame {
                Ok(Some(data)) => {
                    trace!("[SOCKET] {} received {} bytes", conn.key, data.len());
                    let state = conn.lifecycle();
                    if *state == ConnectionState::Open {
                        ctx.events.emit(SocketEvent::DataReceived {
                            data,
                            socket_key: conn.key.clone(),
                        });
                    }
                }
                Ok(None) => break "peer closed the stream".to_string(),
                Err(e) => break format!("read failed: {}", e),
            },
        }
    };

    debug!("[SOCKET] Read loop for {} ending: {}", conn.key, reason);
    if let Err(e) = conn.close().await {
        trace!("[SOCKET] Ignoring close error on {}: {}", conn.key, e);
    }
    ctx.release_connection(&conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_reader_splits_chunks() {
        let (local, mut remote) = tokio::io::duplex(64);
        let mut frames = FrameReader::new(local, 1024, 4);

        remote.write_all(b"first\nsec").await.unwrap();
        remote.write_all(b"ond\r\n").await.unwrap();
        drop(remote);

        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("first"));
        assert_eq!(frames.next_frame().await.unwrap().as_deref(), Some("second"));
        assert_eq!(frames.next_frame().await.unwrap(), None);
        assert_eq!(frames.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_writes() {
        let (local, _remote) = tokio::io::duplex(64);
        let device = DeviceInfo::new(None, "AA:BB:CC:DD:EE:01");
        let (conn, _reader) = Connection::open(
            "c1".into(),
            device,
            ConnectionOrigin::ClientInitiated,
            Box::new(local),
        );

        conn.write_frame(b"ok").await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(
            conn.write_frame(b"late").await,
            Err(SocketError::Disconnected("c1".into()))
        );
        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(conn.connected_event().socket_key(), Some("c1"));
    }
}
