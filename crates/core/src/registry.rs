use crate::device::Device;
use crate::error::StreamingError;
use dashmap::DashMap;
use std::sync::Arc;

/// Devices currently known to the server, keyed by device id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, Arc<Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device. A device already registered under the same id is
    /// closed and returned.
    pub fn add(&self, device: Device) -> Option<Arc<Device>> {
        let replaced = self
            .devices
            .insert(device.id().to_string(), Arc::new(device));
        if let Some(old) = &replaced {
            old.close();
        }
        replaced
    }

    /// Unregister and close a device
    pub fn remove(&self, device_id: &str) -> Option<Arc<Device>> {
        let (_, device) = self.devices.remove(device_id)?;
        device.close();
        Some(device)
    }

    pub fn get(&self, device_id: &str) -> Result<Arc<Device>, StreamingError> {
        self.devices
            .get(device_id)
            .map(|device| device.clone())
            .ok_or_else(|| StreamingError::UnknownDevice(device_id.to_string()))
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    pub fn all(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Devices reachable at a host address
    pub fn find_by_host(&self, host: &str) -> Vec<Arc<Device>> {
        self.devices
            .iter()
            .filter(|entry| entry.host() == host)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
