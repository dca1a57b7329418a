//! BlueZ adapter facade
//!
//! Wraps the default `bluer` adapter. Adapter property changes are relayed
//! into the event sink for the lifetime of the facade; discovery results are
//! relayed while a discovery session is active.

use crate::adapter::traits::AdapterFacade;
use crate::events::EventSink;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::{Adapter, AdapterEvent as BluezEvent, AdapterProperty, Address, Session};
use btsock_shared::{AdapterEvent, AdapterState, DeviceInfo};
use futures::StreamExt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Adapter facade backed by the system Bluetooth daemon
pub struct BluezAdapter {
    session: Option<Session>,
    adapter: Option<Adapter>,
    events: EventSink,
    discovery: Mutex<Option<CancellationToken>>,
    relay: CancellationToken,
}

impl BluezAdapter {
    /// Open the default adapter and start relaying its notifications
    ///
    /// A missing daemon or adapter is not an error: the facade then reports
    /// itself as not present.
    pub async fn open(events: EventSink) -> Self {
        let session = match Session::new().await {
            Ok(session) => Some(session),
            Err(e) => {
                warn!("[BT] Bluetooth daemon unavailable: {}", e);
                None
            }
        };
        let adapter = match &session {
            Some(session) => match session.default_adapter().await {
                Ok(adapter) => Some(adapter),
                Err(e) => {
                    warn!("[BT] No default adapter: {}", e);
                    None
                }
            },
            None => None,
        };

        let facade = Self {
            session,
            adapter,
            events,
            discovery: Mutex::new(None),
            relay: CancellationToken::new(),
        };
        if let Err(e) = facade.start_relay().await {
            warn!("[BT] Adapter notifications unavailable: {}", e);
        }
        facade
    }

    /// The underlying session and adapter, for building a transport on the same adapter
    pub fn handles(&self) -> Option<(Session, Adapter)> {
        Some((self.session.clone()?, self.adapter.clone()?))
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .as_ref()
            .ok_or_else(|| anyhow!("Bluetooth is not supported"))
    }

    fn discovery(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.discovery.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn start_relay(&self) -> Result<()> {
        let adapter = self.adapter()?;
        let stream = adapter.events().await?;
        let events = self.events.clone();
        let cancel = self.relay.clone();

        tokio::spawn(async move {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    evt = stream.next() => match evt {
                        Some(evt) => {
                            if let Some(event) = relay_event(evt) {
                                events.emit(event);
                            }
                        }
                        None => break,
                    },
                }
            }
            debug!("[BT] Adapter notification relay stopped");
        });
        Ok(())
    }
}

impl Drop for BluezAdapter {
    fn drop(&mut self) {
        self.relay.cancel();
        if let Some(token) = self.discovery().take() {
            token.cancel();
        }
    }
}

/// Map a BlueZ adapter notification onto a relayed event
fn relay_event(evt: BluezEvent) -> Option<AdapterEvent> {
    match evt {
        BluezEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
            Some(AdapterEvent::StateChanged {
                state: AdapterState::from(powered),
            })
        }
        BluezEvent::PropertyChanged(AdapterProperty::Discoverable(discoverable)) => {
            Some(AdapterEvent::DiscoverableChanged { discoverable })
        }
        BluezEvent::PropertyChanged(AdapterProperty::Discovering(discovering)) => {
            Some(AdapterEvent::DiscoveryChanged { discovering })
        }
        _ => None,
    }
}

async fn device_info(adapter: &Adapter, addr: Address) -> Result<DeviceInfo> {
    let device = adapter.device(addr)?;
    let name = device.name().await.ok().flatten();
    Ok(DeviceInfo::new(name, addr.to_string()))
}

#[async_trait]
impl AdapterFacade for BluezAdapter {
    fn is_present(&self) -> bool {
        self.adapter.is_some()
    }

    async fn state(&self) -> Result<AdapterState> {
        let powered = self.adapter()?.is_powered().await?;
        Ok(AdapterState::from(powered))
    }

    async fn request_enable(&self) -> Result<()> {
        // BlueZ has no user prompt; powering on directly is the request
        self.set_enabled(true).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.adapter()?.set_powered(enabled).await?;
        info!("[BT] Adapter powered {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    async fn is_discoverable(&self) -> Result<bool> {
        Ok(self.adapter()?.is_discoverable().await?)
    }

    async fn request_discoverable(&self) -> Result<()> {
        self.adapter()?.set_discoverable(true).await?;
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        let adapter = self.adapter()?.clone();
        let token = CancellationToken::new();
        if let Some(previous) = self.discovery().replace(token.clone()) {
            previous.cancel();
        }

        let stream = adapter.discover_devices().await?;
        let events = self.events.clone();
        info!("[BT] Discovery started");

        tokio::spawn(async move {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    evt = stream.next() => match evt {
                        Some(BluezEvent::DeviceAdded(addr)) => match device_info(&adapter, addr).await {
                            Ok(info) => events.emit(AdapterEvent::DeviceFound {
                                name: info.name,
                                address: info.address,
                            }),
                            Err(e) => debug!("[BT] Skipping device {}: {}", addr, e),
                        },
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            info!("[BT] Discovery finished");
        });
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.adapter()?;
        if let Some(token) = self.discovery().take() {
            token.cancel();
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceInfo>> {
        let adapter = self.adapter()?;
        let mut devices = Vec::new();
        for addr in adapter.device_addresses().await? {
            let device = adapter.device(addr)?;
            if device.is_paired().await.unwrap_or(false) {
                devices.push(device_info(adapter, addr).await?);
            }
        }
        Ok(devices)
    }

    async fn resolve_device(&self, address: &str) -> Option<DeviceInfo> {
        let adapter = self.adapter().ok()?;
        let addr = Address::from_str(address).ok()?;
        device_info(adapter, addr).await.ok()
    }
}
