//! In-memory adapter used by the test suite

use crate::adapter::traits::AdapterFacade;
use crate::events::EventSink;
use anyhow::{bail, Result};
use async_trait::async_trait;
use btsock_shared::{AdapterEvent, AdapterState, DeviceInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct MemoryAdapter {
    present: bool,
    enabled: AtomicBool,
    discoverable: AtomicBool,
    discovering: AtomicBool,
    /// Devices `resolve_device` knows about, with their bonded flag
    devices: Mutex<Vec<(DeviceInfo, bool)>>,
    events: Option<EventSink>,
}

impl MemoryAdapter {
    /// A present, powered-on adapter
    pub fn new() -> Self {
        Self {
            present: true,
            enabled: AtomicBool::new(true),
            discoverable: AtomicBool::new(false),
            discovering: AtomicBool::new(false),
            devices: Mutex::new(Vec::new()),
            events: None,
        }
    }

    /// No adapter on this host
    pub fn absent() -> Self {
        Self {
            present: false,
            ..Self::new()
        }
    }

    /// Relay notifications into `events`
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn add_device(&self, device: DeviceInfo, bonded: bool) {
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((device, bonded));
    }

    /// Simulate the adapter being powered on or off out-of-band
    pub fn set_powered(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        self.notify(AdapterEvent::StateChanged {
            state: AdapterState::from(enabled),
        });
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn notify(&self, event: AdapterEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn ensure_present(&self) -> Result<()> {
        if !self.present {
            bail!("Bluetooth is not supported");
        }
        Ok(())
    }
}

#[async_trait]
impl AdapterFacade for MemoryAdapter {
    fn is_present(&self) -> bool {
        self.present
    }

    async fn state(&self) -> Result<AdapterState> {
        self.ensure_present()?;
        Ok(AdapterState::from(self.enabled.load(Ordering::SeqCst)))
    }

    async fn request_enable(&self) -> Result<()> {
        self.set_enabled(true).await
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.ensure_present()?;
        self.set_powered(enabled);
        Ok(())
    }

    async fn is_discoverable(&self) -> Result<bool> {
        self.ensure_present()?;
        Ok(self.discoverable.load(Ordering::SeqCst))
    }

    async fn request_discoverable(&self) -> Result<()> {
        self.ensure_present()?;
        self.discoverable.store(true, Ordering::SeqCst);
        self.notify(AdapterEvent::DiscoverableChanged { discoverable: true });
        Ok(())
    }

    async fn start_discovery(&self) -> Result<()> {
        self.ensure_present()?;
        self.discovering.store(true, Ordering::SeqCst);
        self.notify(AdapterEvent::DiscoveryChanged { discovering: true });
        let devices = self.devices.lock().unwrap_or_else(|e| e.into_inner()).clone();
        for (device, _) in devices {
            self.notify(AdapterEvent::DeviceFound {
                name: device.name,
                address: device.address,
            });
        }
        Ok(())
    }

    async fn cancel_discovery(&self) -> Result<()> {
        self.ensure_present()?;
        if self.discovering.swap(false, Ordering::SeqCst) {
            self.notify(AdapterEvent::DiscoveryChanged { discovering: false });
        }
        Ok(())
    }

    async fn bonded_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.ensure_present()?;
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, bonded)| *bonded)
            .map(|(device, _)| device.clone())
            .collect())
    }

    async fn resolve_device(&self, address: &str) -> Option<DeviceInfo> {
        if !self.present {
            return None;
        }
        self.devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|(device, _)| device.address.eq_ignore_ascii_case(address))
            .map(|(device, _)| device.clone())
    }
}
