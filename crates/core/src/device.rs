use crate::models::{MediaKind, MimeType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

/// Default AVTransport service type announced by MediaRenderers
pub const AV_TRANSPORT_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

const VIDEO_SUPPORTED_BIT: u32 = 0;
const IMAGE_SUPPORTED_BIT: u32 = 1;
const SLIDE_SHOW_SUPPORTED_BIT: u32 = 5;
const AUDIO_SUPPORTED_BIT: u32 = 9;

/// Protocol family of a device, selects the streamer that drives it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Upnp,
    Airplay,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Upnp => write!(f, "upnp"),
            DeviceKind::Airplay => write!(f, "airplay"),
        }
    }
}

/// What kind of content a device can render
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub video: bool,
    pub audio: bool,
    pub image: bool,
    pub slide_show: bool,
}

impl Capabilities {
    /// Capabilities of a renderer from the MIME types it accepts
    pub fn from_mime_types<S: AsRef<str>>(mime_types: &[S]) -> Self {
        let mut caps = Self::default();
        for mime in mime_types.iter().filter_map(|m| MimeType::parse(m.as_ref())) {
            match mime.kind() {
                MediaKind::Video => caps.video = true,
                MediaKind::Audio => caps.audio = true,
                MediaKind::Image => caps.image = true,
                MediaKind::Any => {
                    caps.video = true;
                    caps.audio = true;
                    caps.image = true;
                }
                MediaKind::Other => {}
            }
        }
        caps.slide_show = caps.image;
        caps
    }
}

/// AirPlay feature bitmask as advertised in the mDNS `features` record
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirplayFeatures {
    bits: u64,
}

impl AirplayFeatures {
    pub fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    /// Parse `0x5A7FFFF7` or the two-word `0x5A7FFFF7,0x1E` form.
    /// Unparsable input yields an empty feature set.
    pub fn parse(features: &str) -> Self {
        let low = features.split(',').next().unwrap_or_default().trim();
        let hex = low
            .strip_prefix("0x")
            .or_else(|| low.strip_prefix("0X"))
            .unwrap_or(low);

        match u64::from_str_radix(hex, 16) {
            Ok(bits) => Self { bits },
            Err(e) => {
                debug!("Ignoring unparsable AirPlay features '{}': {}", features, e);
                Self::default()
            }
        }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    fn bit(&self, index: u32) -> bool {
        self.bits & (1 << index) != 0
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            video: self.bit(VIDEO_SUPPORTED_BIT),
            audio: self.bit(AUDIO_SUPPORTED_BIT),
            image: self.bit(IMAGE_SUPPORTED_BIT),
            slide_show: self.bit(SLIDE_SHOW_SUPPORTED_BIT),
        }
    }
}

/// AVTransport service endpoint of a UPnP renderer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvTransportService {
    pub control_url: String,
    pub service_type: String,
}

impl AvTransportService {
    pub fn new(control_url: impl Into<String>) -> Self {
        Self {
            control_url: control_url.into(),
            service_type: AV_TRANSPORT_SERVICE_TYPE.to_string(),
        }
    }
}

/// A UPnP/DLNA MediaRenderer
#[derive(Clone, Debug, Serialize)]
pub struct UpnpDevice {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub av_transport: AvTransportService,
    pub mime_types: Vec<String>,
    capabilities: Capabilities,
}

impl UpnpDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        av_transport: AvTransportService,
        mime_types: Vec<String>,
    ) -> Self {
        let capabilities = Capabilities::from_mime_types(&mime_types);
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
            av_transport,
            mime_types,
            capabilities,
        }
    }
}

/// Socket slot of an AirPlay receiver, `None` until first use or after a failure
pub type AirplayStream = Option<BufReader<TcpStream>>;

/// The persistent control socket of an AirPlay receiver.
///
/// Opened lazily by the control point and reused for every command. Holding
/// the lock serializes commands for this device.
#[derive(Default)]
pub struct AirplayConnection {
    stream: Arc<Mutex<AirplayStream>>,
    closed: AtomicBool,
    close_notify: Notify,
}

impl AirplayConnection {
    pub fn stream(&self) -> &Mutex<AirplayStream> {
        &self.stream
    }

    /// Wait for exclusive use of the socket. The guard can move between tasks.
    pub async fn lock_stream(&self) -> OwnedMutexGuard<AirplayStream> {
        self.stream.clone().lock_owned().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let notified = self.close_notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_closed() {
            return;
        }
        notified.await;
    }

    /// Release the socket and abort any command blocked on it
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.close_notify.notify_waiters();
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
    }
}

/// An AirPlay receiver
#[derive(Serialize)]
pub struct AirplayDevice {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub features: AirplayFeatures,
    #[serde(skip)]
    connection: Arc<AirplayConnection>,
}

impl AirplayDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        features: AirplayFeatures,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
            features,
            connection: Arc::new(AirplayConnection::default()),
        }
    }

    /// Deterministic id for a receiver that has no UDN
    pub fn generate_id(name: &str, host: &str, port: u16) -> String {
        let namespace = Uuid::NAMESPACE_DNS;
        let uuid = Uuid::new_v5(&namespace, format!("{}@{}:{}", name, host, port).as_bytes());
        format!("airplay:{}", uuid)
    }

    pub fn connection(&self) -> &Arc<AirplayConnection> {
        &self.connection
    }
}

impl fmt::Debug for AirplayDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AirplayDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("features", &self.features)
            .field("closed", &self.connection.is_closed())
            .finish()
    }
}

/// A controllable playback endpoint
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Device {
    Upnp(UpnpDevice),
    Airplay(AirplayDevice),
}

impl Device {
    pub fn id(&self) -> &str {
        match self {
            Device::Upnp(d) => &d.id,
            Device::Airplay(d) => &d.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Device::Upnp(d) => &d.name,
            Device::Airplay(d) => &d.name,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Device::Upnp(d) => &d.host,
            Device::Airplay(d) => &d.host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Device::Upnp(d) => d.port,
            Device::Airplay(d) => d.port,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        match self {
            Device::Upnp(_) => DeviceKind::Upnp,
            Device::Airplay(_) => DeviceKind::Airplay,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Device::Upnp(d) => d.capabilities,
            Device::Airplay(d) => d.features.capabilities(),
        }
    }

    pub fn video_supported(&self) -> bool {
        self.capabilities().video
    }

    pub fn audio_supported(&self) -> bool {
        self.capabilities().audio
    }

    pub fn image_supported(&self) -> bool {
        self.capabilities().image
    }

    pub fn slide_show_supported(&self) -> bool {
        self.capabilities().slide_show
    }

    /// Release network resources held by the device
    pub fn close(&self) {
        if let Device::Airplay(d) = self {
            d.connection.close();
        }
    }
}

impl From<UpnpDevice> for Device {
    fn from(device: UpnpDevice) -> Self {
        Device::Upnp(device)
    }
}

impl From<AirplayDevice> for Device {
    fn from(device: AirplayDevice) -> Self {
        Device::Airplay(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_airplay_features_parse() {
        // Apple TV 3: 0x5A7FFFF7
        let features = AirplayFeatures::parse("0x5A7FFFF7");
        let caps = features.capabilities();
        assert!(caps.video);
        assert!(caps.image);
        assert!(caps.slide_show);
        assert!(caps.audio);
    }

    #[test]
    fn test_airplay_features_two_word_form() {
        let features = AirplayFeatures::parse("0x201,0x1E");
        assert_eq!(features.bits(), 0x201);
        let caps = features.capabilities();
        assert!(caps.video);
        assert!(caps.audio);
        assert!(!caps.image);
        assert!(!caps.slide_show);
    }

    #[test]
    fn test_airplay_features_invalid() {
        let features = AirplayFeatures::parse("not-hex");
        assert_eq!(features, AirplayFeatures::default());
        assert_eq!(features.capabilities(), Capabilities::default());
    }

    #[test]
    fn test_upnp_capabilities_from_mime_types() {
        let caps = Capabilities::from_mime_types(&["video/mp4", "http-get:*:audio/mpeg:*"]);
        assert!(caps.video);
        assert!(caps.audio);
        assert!(!caps.image);
        assert!(!caps.slide_show);

        let caps = Capabilities::from_mime_types(&["image/jpeg"]);
        assert!(caps.image);
        assert!(caps.slide_show);

        let caps = Capabilities::from_mime_types(&["*"]);
        assert!(caps.video && caps.audio && caps.image && caps.slide_show);
    }

    #[test]
    fn test_device_accessors() {
        let device: Device = UpnpDevice::new(
            "uuid:1234",
            "Living room",
            "192.168.1.20",
            49152,
            AvTransportService::new("http://192.168.1.20:49152/AVTransport/control"),
            vec!["video/mp4".to_string()],
        )
        .into();

        assert_eq!(device.id(), "uuid:1234");
        assert_eq!(device.name(), "Living room");
        assert_eq!(device.host(), "192.168.1.20");
        assert_eq!(device.port(), 49152);
        assert_eq!(device.kind(), DeviceKind::Upnp);
        assert!(device.video_supported());
        assert!(!device.audio_supported());
    }

    #[test]
    fn test_generated_airplay_id_is_stable() {
        let a = AirplayDevice::generate_id("Apple TV", "192.168.1.30", 7000);
        let b = AirplayDevice::generate_id("Apple TV", "192.168.1.30", 7000);
        let c = AirplayDevice::generate_id("Apple TV", "192.168.1.31", 7000);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("airplay:"));
    }

    #[test]
    fn test_device_serializes_with_kind_tag() {
        let device: Device = AirplayDevice::new(
            "airplay:1",
            "Apple TV",
            "192.168.1.30",
            7000,
            AirplayFeatures::from_bits(0x1),
        )
        .into();

        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["kind"], "airplay");
        assert_eq!(json["id"], "airplay:1");
        assert_eq!(json["port"], 7000);
    }

    #[tokio::test]
    async fn test_connection_close_wakes_waiters() {
        let device = std::sync::Arc::new(AirplayDevice::new(
            "airplay:1",
            "Apple TV",
            "127.0.0.1",
            7000,
            AirplayFeatures::default(),
        ));

        let waiter = {
            let device = device.clone();
            tokio::spawn(async move { device.connection().closed().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!device.connection().is_closed());

        device.connection().close();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("closed() should resolve")
            .unwrap();
        assert!(device.connection().is_closed());

        // Already closed: resolves immediately
        device.connection().closed().await;
    }
}
