//! Server configuration, loaded from TOML.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! usable configuration.

use crate::device::{
    AirplayDevice, AirplayFeatures, AvTransportService, Device, DeviceKind, UpnpDevice,
    AV_TRANSPORT_SERVICE_TYPE,
};
use crate::error::ConfigError;
use crate::events::DEFAULT_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub airplay: AirplayConfig,
    #[serde(default)]
    pub upnp: UpnpConfig,
    /// Devices declared statically instead of discovered
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Status poll period, 0 disables polling
    #[serde(default = "StreamingConfig::default_status_update_delay")]
    pub status_update_delay_seconds: u64,
    #[serde(default = "StreamingConfig::default_event_capacity")]
    pub event_capacity: usize,
}

impl StreamingConfig {
    const fn default_status_update_delay() -> u64 {
        5
    }

    const fn default_event_capacity() -> usize {
        DEFAULT_EVENT_CAPACITY
    }

    /// Poll period, `None` when polling is disabled
    pub fn status_update_delay(&self) -> Option<Duration> {
        (self.status_update_delay_seconds > 0)
            .then(|| Duration::from_secs(self.status_update_delay_seconds))
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            status_update_delay_seconds: Self::default_status_update_delay(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirplayConfig {
    #[serde(default = "AirplayConfig::default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "AirplayConfig::default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// 0 disables the per-command timeout
    #[serde(default = "AirplayConfig::default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl AirplayConfig {
    const fn default_worker_pool_size() -> usize {
        4
    }

    const fn default_connect_timeout() -> u64 {
        5
    }

    const fn default_command_timeout() -> u64 {
        10
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }
}

impl Default for AirplayConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: Self::default_worker_pool_size(),
            connect_timeout_secs: Self::default_connect_timeout(),
            command_timeout_secs: Self::default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpnpConfig {
    #[serde(default = "UpnpConfig::default_action_timeout")]
    pub action_timeout_secs: u64,
}

impl UpnpConfig {
    const fn default_action_timeout() -> u64 {
        10
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Default for UpnpConfig {
    fn default() -> Self {
        Self {
            action_timeout_secs: Self::default_action_timeout(),
        }
    }
}

/// A `[[devices]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub kind: DeviceKind,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub control_url: Option<String>,
    #[serde(default)]
    pub service_type: Option<String>,
    #[serde(default)]
    pub mime_types: Vec<String>,
    #[serde(default)]
    pub features: Option<String>,
}

impl DeviceConfig {
    pub fn into_device(self) -> Result<Device, ConfigError> {
        match self.kind {
            DeviceKind::Upnp => {
                let id = self.id.ok_or_else(|| ConfigError::InvalidDevice {
                    name: self.name.clone(),
                    reason: "a upnp device needs an id".to_string(),
                })?;
                let control_url = self.control_url.ok_or_else(|| ConfigError::InvalidDevice {
                    name: self.name.clone(),
                    reason: "a upnp device needs a control_url".to_string(),
                })?;
                let av_transport = AvTransportService {
                    control_url,
                    service_type: self
                        .service_type
                        .unwrap_or_else(|| AV_TRANSPORT_SERVICE_TYPE.to_string()),
                };
                Ok(UpnpDevice::new(
                    id,
                    self.name,
                    self.host,
                    self.port,
                    av_transport,
                    self.mime_types,
                )
                .into())
            }
            DeviceKind::Airplay => {
                let id = self
                    .id
                    .unwrap_or_else(|| AirplayDevice::generate_id(&self.name, &self.host, self.port));
                let features = self
                    .features
                    .as_deref()
                    .map(AirplayFeatures::parse)
                    .unwrap_or_default();
                Ok(AirplayDevice::new(id, self.name, self.host, self.port, features).into())
            }
        }
    }
}
