//! RFCOMM transport implementation for Bluetooth connections
//!
//! BlueZ hands RFCOMM connections for a service identifier to whichever
//! process registered a profile for it. One profile is registered per
//! service, and a router task passes each incoming connection request either
//! to the outbound connect waiting on that device or to the listening
//! endpoint. Requests nobody is waiting for are rejected.

use crate::transport::traits::{BoxedStream, Transport, TransportListener};
use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use bluer::rfcomm::{ConnectRequest, Profile, ProfileHandle, ReqError};
use bluer::{Adapter, Address, Session};
use btsock_shared::{service, DeviceInfo};
use futures::StreamExt;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Configuration for the RFCOMM transport
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Fixed RFCOMM channel (BlueZ picks one when unset)
    pub channel: Option<u16>,
    /// Require an authenticated (paired) link
    pub require_authentication: bool,
    /// Require authorization of incoming connections
    pub require_authorization: bool,
    /// Service record name used when a profile is registered by a connect
    pub service_name: String,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            channel: None,
            require_authentication: false,
            require_authorization: false,
            service_name: service::SERVICE_NAME.into(),
        }
    }
}

#[derive(Default)]
struct Routes {
    pending: HashMap<Address, oneshot::Sender<ConnectRequest>>,
    listener: Option<(u64, mpsc::UnboundedSender<ConnectRequest>)>,
}

/// Routes connection requests for one registered profile
#[derive(Default)]
struct ProfileRouter {
    routes: Mutex<Routes>,
    next_listener_id: AtomicU64,
}

impl ProfileRouter {
    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, req: ConnectRequest) {
        let addr = req.device();
        let mut routes = self.routes();

        if let Some(waiter) = routes.pending.remove(&addr) {
            if let Err(req) = waiter.send(req) {
                req.reject(ReqError::Rejected);
            }
            return;
        }

        if let Some((id, tx)) = routes.listener.take() {
            match tx.send(req) {
                Ok(()) => routes.listener = Some((id, tx)),
                Err(mpsc::error::SendError(req)) => req.reject(ReqError::Rejected),
            }
            return;
        }

        debug!("[BT] Rejecting unsolicited connection from {}", addr);
        req.reject(ReqError::Rejected);
    }

    fn expect_from(&self, addr: Address, tx: oneshot::Sender<ConnectRequest>) -> Result<()> {
        let mut routes = self.routes();
        if routes.pending.get(&addr).is_some_and(|w| !w.is_closed()) {
            bail!("a connect to {} is already in progress", addr);
        }
        routes.pending.insert(addr, tx);
        Ok(())
    }

    fn forget(&self, addr: Address) {
        let mut routes = self.routes();
        if routes.pending.get(&addr).is_some_and(|w| w.is_closed()) {
            routes.pending.remove(&addr);
        }
    }

    fn attach_listener(&self, tx: mpsc::UnboundedSender<ConnectRequest>) -> Result<u64> {
        let mut routes = self.routes();
        if routes.listener.as_ref().is_some_and(|(_, l)| !l.is_closed()) {
            bail!("service already has a listening endpoint");
        }
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        routes.listener = Some((id, tx));
        Ok(id)
    }

    fn detach_listener(&self, id: u64) {
        let mut routes = self.routes();
        if routes.listener.as_ref().is_some_and(|(current, _)| *current == id) {
            routes.listener = None;
        }
    }
}

/// Drops the pending waiter for an address once the connect attempt ends
struct PendingGuard {
    router: Arc<ProfileRouter>,
    addr: Address,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.router.forget(self.addr);
    }
}

async fn route_requests(mut handle: ProfileHandle, router: Arc<ProfileRouter>, service: Uuid) {
    while let Some(req) = handle.next().await {
        router.route(req);
    }
    warn!("[BT] Profile handle for {} closed", service);
}

async fn device_name(adapter: &Adapter, addr: Address) -> Option<String> {
    match adapter.device(addr) {
        Ok(device) => device.name().await.ok().flatten(),
        Err(_) => None,
    }
}

/// RFCOMM transport backed by BlueZ
pub struct RfcommTransport {
    session: Session,
    adapter: Adapter,
    config: RfcommConfig,
    routers: tokio::sync::Mutex<HashMap<Uuid, Arc<ProfileRouter>>>,
}

impl RfcommTransport {
    /// Create a transport on the default adapter
    pub async fn new(config: RfcommConfig) -> Result<Self> {
        let session = Session::new().await?;
        let adapter = session.default_adapter().await?;
        Ok(Self::with_adapter(session, adapter, config))
    }

    /// Create a transport on a specific adapter
    pub fn with_adapter(session: Session, adapter: Adapter, config: RfcommConfig) -> Self {
        Self {
            session,
            adapter,
            config,
            routers: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Register the profile for `service` on first use
    async fn router(&self, service: Uuid, name: &str) -> Result<Arc<ProfileRouter>> {
        let mut routers = self.routers.lock().await;
        if let Some(router) = routers.get(&service) {
            return Ok(router.clone());
        }

        let profile = Profile {
            uuid: service,
            name: Some(name.to_string()),
            channel: self.config.channel,
            require_authentication: Some(self.config.require_authentication),
            require_authorization: Some(self.config.require_authorization),
            ..Default::default()
        };
        let handle = self
            .session
            .register_profile(profile)
            .await
            .with_context(|| format!("failed to register RFCOMM profile {}", service))?;
        info!("[BT] Registered RFCOMM profile {} ({})", service, name);

        let router = Arc::new(ProfileRouter::default());
        tokio::spawn(route_requests(handle, router.clone(), service));
        routers.insert(service, router.clone());
        Ok(router)
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    async fn connect(&self, device: &DeviceInfo, service: Uuid) -> Result<BoxedStream> {
        let addr = Address::from_str(&device.address)
            .map_err(|e| anyhow!("invalid address {}: {}", device.address, e))?;
        let router = self.router(service, &self.config.service_name).await?;

        // Declared before the receiver so it drops after it
        let _guard = PendingGuard {
            router: router.clone(),
            addr,
        };
        let (tx, mut rx) = oneshot::channel();
        router.expect_from(addr, tx)?;

        let remote = self.adapter.device(addr)?;
        info!("[BT] Connecting to {} service {}", addr, service);

        let connect = remote.connect_profile(&service);
        tokio::pin!(connect);
        let mut profile_connected = false;

        loop {
            tokio::select! {
                res = &mut connect, if !profile_connected => {
                    res.map_err(|e| anyhow!("RFCOMM connect failed: {}", e))?;
                    profile_connected = true;
                }
                req = &mut rx => {
                    let req = req.map_err(|_| anyhow!("profile router closed"))?;
                    let stream = req
                        .accept()
                        .map_err(|e| anyhow!("RFCOMM accept failed: {}", e))?;
                    info!("[BT] Connected to {}", addr);
                    return Ok(Box::new(stream));
                }
            }
        }
    }

    async fn listen(&self, service: Uuid, name: &str) -> Result<Box<dyn TransportListener>> {
        let router = self.router(service, name).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let id = router.attach_listener(tx)?;
        info!("[BT] Listening on service {}", service);

        Ok(Box::new(RfcommListener {
            id,
            service,
            requests: rx,
            router,
            adapter: self.adapter.clone(),
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

/// Listening endpoint fed by the profile router
pub struct RfcommListener {
    id: u64,
    service: Uuid,
    requests: mpsc::UnboundedReceiver<ConnectRequest>,
    router: Arc<ProfileRouter>,
    adapter: Adapter,
    closed: bool,
}

#[async_trait]
impl TransportListener for RfcommListener {
    async fn accept(&mut self) -> Result<(BoxedStream, DeviceInfo)> {
        if self.closed {
            bail!("listener on {} is closed", self.service);
        }
        let req = self
            .requests
            .recv()
            .await
            .ok_or_else(|| anyhow!("listener on {} is closed", self.service))?;

        let addr = req.device();
        let stream = req
            .accept()
            .map_err(|e| anyhow!("RFCOMM accept from {} failed: {}", addr, e))?;
        let name = device_name(&self.adapter, addr).await;

        Ok((Box::new(stream), DeviceInfo::new(name, addr.to_string())))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.router.detach_listener(self.id);
        self.requests.close();
        debug!("[BT] Closed listener on service {}", self.service);
    }
}

impl Drop for RfcommListener {
    fn drop(&mut self) {
        self.close();
    }
}
