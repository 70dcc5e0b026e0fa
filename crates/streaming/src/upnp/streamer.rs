use super::control_point::{AvTransportControl, TransportState, UpnpError};
use super::didl;
use async_trait::async_trait;
use mediacast_core::{
    Device, DeviceKind, DeviceStreamer, EventBus, MediaNode, StreamingEvent, StreamingEventType,
    UpnpDevice,
};
use std::sync::Arc;
use tracing::debug;

/// Drives UPnP MediaRenderers through their AVTransport service
pub struct UpnpStreamer {
    control: Arc<dyn AvTransportControl>,
    events: EventBus,
}

impl UpnpStreamer {
    pub fn new(control: Arc<dyn AvTransportControl>, events: EventBus) -> Self {
        Self { control, events }
    }

    fn report(&self, kind: StreamingEventType, device_id: &str, result: Result<(), UpnpError>) {
        let event = match result {
            Ok(()) => StreamingEvent::success(kind, device_id),
            Err(e) => StreamingEvent::failure(kind, device_id, e.to_string()),
        };
        self.events.publish(event);
    }

    fn wrong_kind(&self, kind: StreamingEventType, device: &Device) {
        self.events.publish(StreamingEvent::failure(
            kind,
            device.id(),
            format!("{} is not a UPnP device", device.id()),
        ));
    }

    /// Load `content_url` unless the renderer already has it, then play.
    /// A renderer busy with other content is stopped first.
    async fn load_and_play(
        &self,
        device: &UpnpDevice,
        content_url: &str,
        node: &MediaNode,
    ) -> Result<(), UpnpError> {
        let service = &device.av_transport;
        let media_info = self.control.get_media_info(service).await?;

        match media_info.current_uri.as_deref() {
            None => {
                debug!("{} has no URI loaded", device.id);
            }
            Some(current) if current == content_url => {
                debug!("{} already has {} loaded", device.id, content_url);
                return self.control.play(service).await;
            }
            Some(current) => {
                let transport = self.control.get_transport_info(service).await?;
                debug!(
                    "{} has {} loaded, transport {}",
                    device.id, current, transport.state
                );
                if transport.state.is_active() {
                    self.control.stop(service).await?;
                }
            }
        }

        let metadata = didl::node_metadata(node, content_url);
        self.control
            .set_av_transport_uri(service, content_url, &metadata)
            .await?;
        self.control.play(service).await
    }

    /// Publish STATUS, STOP or nothing depending on the transport state
    async fn query_status(&self, device: &UpnpDevice) -> Result<Option<StreamingEvent>, UpnpError> {
        let service = &device.av_transport;
        let transport = self.control.get_transport_info(service).await?;

        if transport.state.is_active() {
            let position = self.control.get_position_info(service).await?;
            return Ok(Some(StreamingEvent::progress(
                &device.id,
                position.elapsed_secs(),
                position.duration_secs(),
            )));
        }

        match transport.state {
            TransportState::Transitioning => {
                debug!("{} is transitioning, no status", device.id);
                Ok(None)
            }
            _ => Ok(Some(StreamingEvent::success(
                StreamingEventType::Stop,
                &device.id,
            ))),
        }
    }
}

fn as_upnp(device: &Device) -> Option<&UpnpDevice> {
    match device {
        Device::Upnp(upnp) => Some(upnp),
        _ => None,
    }
}

#[async_trait]
impl DeviceStreamer for UpnpStreamer {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Upnp
    }

    async fn play(&self, device: Arc<Device>, content_url: String, node: MediaNode) {
        let Some(upnp) = as_upnp(&device) else {
            return self.wrong_kind(StreamingEventType::Play, &device);
        };
        let result = self.load_and_play(upnp, &content_url, &node).await;
        self.report(StreamingEventType::Play, &upnp.id, result);
    }

    async fn stop(&self, device: Arc<Device>) {
        let Some(upnp) = as_upnp(&device) else {
            return self.wrong_kind(StreamingEventType::Stop, &device);
        };
        let result = self.control.stop(&upnp.av_transport).await;
        self.report(StreamingEventType::Stop, &upnp.id, result);
    }

    async fn pause(&self, device: Arc<Device>) {
        let Some(upnp) = as_upnp(&device) else {
            return self.wrong_kind(StreamingEventType::Pause, &device);
        };
        let result = self.control.pause(&upnp.av_transport).await;
        self.report(StreamingEventType::Pause, &upnp.id, result);
    }

    /// Renderers resume from their own position on Play
    async fn resume(&self, device: Arc<Device>) {
        let Some(upnp) = as_upnp(&device) else {
            return self.wrong_kind(StreamingEventType::Resume, &device);
        };
        let result = self.control.play(&upnp.av_transport).await;
        self.report(StreamingEventType::Resume, &upnp.id, result);
    }

    async fn update_status(&self, device: Arc<Device>) {
        let Some(upnp) = as_upnp(&device) else {
            return self.wrong_kind(StreamingEventType::Status, &device);
        };
        match self.query_status(upnp).await {
            Ok(Some(event)) => self.events.publish(event),
            Ok(None) => {}
            Err(e) => self.events.publish(StreamingEvent::failure(
                StreamingEventType::Status,
                &upnp.id,
                e.to_string(),
            )),
        }
    }
}
