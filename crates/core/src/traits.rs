use crate::device::{Device, DeviceKind};
use crate::models::MediaNode;
use async_trait::async_trait;
use std::sync::Arc;

/// Protocol driver for one device kind (UPnP, AirPlay).
///
/// Methods never return the device's answer. Each one reports its outcome by
/// publishing a `StreamingEvent` on the event bus the streamer was built with,
/// failures included.
#[async_trait]
pub trait DeviceStreamer: Send + Sync {
    /// Device kind this streamer drives
    fn kind(&self) -> DeviceKind;

    /// Point the device at `content_url` and start playback
    async fn play(&self, device: Arc<Device>, content_url: String, node: MediaNode);

    async fn stop(&self, device: Arc<Device>);

    async fn pause(&self, device: Arc<Device>);

    /// Resume from the device's own last position
    async fn resume(&self, device: Arc<Device>);

    /// Query playback progress. Publishes STATUS, STOP when the device has
    /// stopped transporting, or nothing while it is transitioning.
    async fn update_status(&self, device: Arc<Device>);
}

/// Read access to the media library
pub trait MediaCatalog: Send + Sync {
    fn node(&self, node_id: &str) -> Option<MediaNode>;

    /// URL a device can fetch the node's content from
    fn node_url(&self, node: &MediaNode) -> String;
}
