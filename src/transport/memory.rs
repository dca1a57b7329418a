//! In-memory transport used by the test suite
//!
//! Streams are `tokio::io::duplex` pairs. The test holds the remote half of
//! every stream and can inject refused connects, slow connects and accept
//! failures.

use crate::transport::traits::{BoxedStream, Transport, TransportListener};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use btsock_shared::DeviceInfo;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use uuid::Uuid;

const DUPLEX_CAPACITY: usize = 64 * 1024;

type Inbound = Result<(BoxedStream, DeviceInfo)>;

#[derive(Default)]
struct MemoryState {
    listeners: HashMap<Uuid, (u64, mpsc::UnboundedSender<Inbound>)>,
    next_listener_id: u64,
    refused: HashSet<String>,
    connect_delay: Option<Duration>,
    connect_attempts: usize,
}

/// Remote half of an outbound connection made through the transport
pub struct RemoteEnd {
    pub device: DeviceInfo,
    pub service: Uuid,
    pub stream: DuplexStream,
}

#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    remote_tx: mpsc::UnboundedSender<RemoteEnd>,
    remote_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            remote_tx,
            remote_rx: Arc::new(tokio::sync::Mutex::new(remote_rx)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make outbound connects to `address` fail
    pub fn refuse(&self, address: &str) {
        self.state().refused.insert(address.to_string());
    }

    /// Delay every outbound connect
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state().connect_delay = Some(delay);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn is_listening(&self, service: Uuid) -> bool {
        self.state()
            .listeners
            .get(&service)
            .is_some_and(|(_, tx)| !tx.is_closed())
    }

    /// Simulate a remote peer opening a stream to the local listener
    pub fn dial(&self, service: Uuid, peer: DeviceInfo) -> Result<DuplexStream> {
        let state = self.state();
        let (_, tx) = state
            .listeners
            .get(&service)
            .ok_or_else(|| anyhow!("nobody listening on {}", service))?;
        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        tx.send(Ok((Box::new(local), peer)))
            .map_err(|_| anyhow!("listener on {} is closed", service))?;
        Ok(remote)
    }

    /// Make the listener's pending or next accept fail
    pub fn fail_accept(&self, service: Uuid) -> Result<()> {
        let state = self.state();
        let (_, tx) = state
            .listeners
            .get(&service)
            .ok_or_else(|| anyhow!("nobody listening on {}", service))?;
        tx.send(Err(anyhow!("accept failed")))
            .map_err(|_| anyhow!("listener on {} is closed", service))
    }

    /// Wait for the remote half of the next successful outbound connect
    pub async fn next_remote(&self) -> Option<RemoteEnd> {
        self.remote_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, device: &DeviceInfo, service: Uuid) -> Result<BoxedStream> {
        let delay = {
            let mut state = self.state();
            state.connect_attempts += 1;
            if state.refused.contains(&device.address) {
                bail!("connection refused by {}", device.address);
            }
            state.connect_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let (local, remote) = tokio::io::duplex(DUPLEX_CAPACITY);
        self.remote_tx
            .send(RemoteEnd {
                device: device.clone(),
                service,
                stream: remote,
            })
            .map_err(|_| anyhow!("remote side dropped"))?;
        Ok(Box::new(local))
    }

    async fn listen(&self, service: Uuid, _name: &str) -> Result<Box<dyn TransportListener>> {
        let mut state = self.state();
        if state
            .listeners
            .get(&service)
            .is_some_and(|(_, tx)| !tx.is_closed())
        {
            bail!("service already has a listening endpoint");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        state.listeners.insert(service, (id, tx));

        Ok(Box::new(MemoryListener {
            id,
            service,
            inbound: rx,
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

struct MemoryListener {
    id: u64,
    service: Uuid,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

#[async_trait]
impl TransportListener for MemoryListener {
    async fn accept(&mut self) -> Result<(BoxedStream, DeviceInfo)> {
        if self.closed {
            bail!("listener is closed");
        }
        self.inbound
            .recv()
            .await
            .ok_or_else(|| anyhow!("listener is closed"))?
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.inbound.close();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state
            .listeners
            .get(&self.service)
            .is_some_and(|(id, _)| *id == self.id)
        {
            state.listeners.remove(&self.service);
        }
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.close();
    }
}
