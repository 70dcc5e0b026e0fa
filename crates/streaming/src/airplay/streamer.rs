use super::codec::{AirplayCommand, ContentParameters};
use super::control_point::AirplayControlPoint;
use async_trait::async_trait;
use mediacast_core::{
    AirplayDevice, Device, DeviceKind, DeviceStreamer, EventBus, MediaNode, StreamingEvent,
    StreamingEventType,
};
use std::sync::Arc;
use tracing::debug;

/// Drives AirPlay receivers through the control point
pub struct AirplayStreamer {
    control_point: Arc<AirplayControlPoint>,
    events: EventBus,
}

impl AirplayStreamer {
    pub fn new(control_point: Arc<AirplayControlPoint>, events: EventBus) -> Self {
        Self {
            control_point,
            events,
        }
    }

    /// Run a command and publish its failure. Returns the response
    /// parameters on success without publishing anything.
    async fn send(
        &self,
        device: &Device,
        kind: StreamingEventType,
        command: AirplayCommand,
    ) -> Option<ContentParameters> {
        let Some(airplay) = as_airplay(device) else {
            self.events.publish(StreamingEvent::failure(
                kind,
                device.id(),
                format!("{} is not an AirPlay device", device.id()),
            ));
            return None;
        };

        match self.control_point.execute(airplay, command).await {
            Ok(parameters) => Some(parameters),
            Err(e) => {
                self.events
                    .publish(StreamingEvent::failure(kind, device.id(), e.to_string()));
                None
            }
        }
    }

    async fn send_and_report(
        &self,
        device: &Device,
        kind: StreamingEventType,
        command: AirplayCommand,
    ) {
        if self.send(device, kind, command).await.is_some() {
            self.events
                .publish(StreamingEvent::success(kind, device.id()));
        }
    }
}

fn as_airplay(device: &Device) -> Option<&AirplayDevice> {
    match device {
        Device::Airplay(airplay) => Some(airplay),
        _ => None,
    }
}

/// Whole seconds from a decimal parameter, 0 when absent
fn seconds(parameters: &ContentParameters, key: &str) -> u64 {
    parameters
        .get(key)
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .map_or(0, |value| value as u64)
}

#[async_trait]
impl DeviceStreamer for AirplayStreamer {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Airplay
    }

    async fn play(&self, device: Arc<Device>, content_url: String, _node: MediaNode) {
        let command = AirplayCommand::Play {
            content_url,
            start_position: 0.0,
        };
        self.send_and_report(&device, StreamingEventType::Play, command)
            .await;
    }

    async fn stop(&self, device: Arc<Device>) {
        self.send_and_report(&device, StreamingEventType::Stop, AirplayCommand::Stop)
            .await;
    }

    async fn pause(&self, device: Arc<Device>) {
        self.send_and_report(
            &device,
            StreamingEventType::Pause,
            AirplayCommand::Rate { value: 0.0 },
        )
        .await;
    }

    async fn resume(&self, device: Arc<Device>) {
        self.send_and_report(
            &device,
            StreamingEventType::Resume,
            AirplayCommand::Rate { value: 1.0 },
        )
        .await;
    }

    async fn update_status(&self, device: Arc<Device>) {
        let Some(parameters) = self
            .send(&device, StreamingEventType::Status, AirplayCommand::PlaybackStatus)
            .await
        else {
            return;
        };

        if parameters.is_empty() {
            debug!("No playback status from {}", device.id());
            return;
        }

        let duration = seconds(&parameters, "duration");
        let position = seconds(&parameters, "position");
        self.events
            .publish(StreamingEvent::progress(device.id(), position, duration));

        if duration > 0 && position >= duration {
            debug!("End of content reached on {}, stopping", device.id());
            self.stop(device).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediacast_core::{
        AirplayConfig, AirplayFeatures, AvTransportService, MimeType, NodeLocation, UpnpDevice,
    };
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::broadcast;

    fn node() -> MediaNode {
        MediaNode {
            id: "42".to_string(),
            parent_id: "0".to_string(),
            name: "Movie".to_string(),
            location: NodeLocation::Url("http://x/movie.mp4".to_string()),
            mime_type: MimeType::parse("video/mp4"),
            size: None,
        }
    }

    /// Answer every request with the next canned response; returns the
    /// request lines seen
    async fn fake_receiver(responses: Vec<String>) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(socket);
            let mut seen = Vec::new();
            for response in responses {
                let mut request_line = String::new();
                let mut length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap() == 0 {
                        return seen;
                    }
                    if request_line.is_empty() {
                        request_line = line.trim().to_string();
                    }
                    if let Some(value) = line.strip_prefix("Content-Length: ") {
                        length = value.trim().parse().unwrap();
                    }
                    if line == "\r\n" {
                        break;
                    }
                }
                let mut body = vec![0u8; length];
                reader.read_exact(&mut body).await.unwrap();
                seen.push(request_line);
                reader.get_mut().write_all(response.as_bytes()).await.unwrap();
            }
            seen
        });
        (port, handle)
    }

    fn ok() -> String {
        "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_string()
    }

    fn status(duration: &str, position: &str) -> String {
        let body = format!("duration: {}\nposition: {}\n", duration, position);
        format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/parameters\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn streamer(events: &EventBus) -> AirplayStreamer {
        let control_point = Arc::new(AirplayControlPoint::new(&AirplayConfig::default()));
        AirplayStreamer::new(control_point, events.clone())
    }

    fn device(port: u16) -> Arc<Device> {
        Arc::new(
            AirplayDevice::new("airplay:1", "Apple TV", "127.0.0.1", port, AirplayFeatures::default())
                .into(),
        )
    }

    async fn next(receiver: &mut broadcast::Receiver<StreamingEvent>) -> StreamingEvent {
        tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("event expected")
            .unwrap()
    }

    #[tokio::test]
    async fn test_commands_publish_events() {
        let (port, receiver_task) = fake_receiver(vec![ok(), ok(), ok(), ok()]).await;
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let streamer = streamer(&events);
        let device = device(port);

        streamer
            .play(device.clone(), "http://x/movie.mp4".to_string(), node())
            .await;
        assert_eq!(next(&mut rx).await, StreamingEvent::success(StreamingEventType::Play, "airplay:1"));

        streamer.pause(device.clone()).await;
        assert_eq!(next(&mut rx).await.kind, StreamingEventType::Pause);

        streamer.resume(device.clone()).await;
        assert_eq!(next(&mut rx).await.kind, StreamingEventType::Resume);

        streamer.stop(device.clone()).await;
        assert_eq!(next(&mut rx).await.kind, StreamingEventType::Stop);

        let seen = receiver_task.await.unwrap();
        assert_eq!(
            seen,
            vec![
                "POST /play HTTP/1.1",
                "POST /rate?value=0.000000 HTTP/1.1",
                "POST /rate?value=1.000000 HTTP/1.1",
                "POST /stop HTTP/1.1",
            ]
        );
    }

    #[tokio::test]
    async fn test_status_truncates_seconds() {
        let (port, _task) = fake_receiver(vec![status("120.900000", "30.500000")]).await;
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        streamer(&events).update_status(device(port)).await;
        assert_eq!(next(&mut rx).await, StreamingEvent::progress("airplay:1", 30, 120));
    }

    #[tokio::test]
    async fn test_status_at_end_of_content_stops() {
        let (port, receiver_task) = fake_receiver(vec![status("120.0", "120.0"), ok()]).await;
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        streamer(&events).update_status(device(port)).await;
        assert_eq!(next(&mut rx).await, StreamingEvent::progress("airplay:1", 120, 120));
        assert_eq!(next(&mut rx).await, StreamingEvent::success(StreamingEventType::Stop, "airplay:1"));
        assert_eq!(
            receiver_task.await.unwrap(),
            vec!["GET /scrub HTTP/1.1", "POST /stop HTTP/1.1"]
        );
    }

    #[tokio::test]
    async fn test_empty_status_publishes_nothing() {
        let (port, _task) = fake_receiver(vec![ok()]).await;
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        streamer(&events).update_status(device(port)).await;
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_device_publishes_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        streamer(&events)
            .play(device(port), "http://x/movie.mp4".to_string(), node())
            .await;

        let event = next(&mut rx).await;
        assert_eq!(event.kind, StreamingEventType::Play);
        assert!(!event.is_success());
        assert!(event.error_message().is_some());
    }

    #[tokio::test]
    async fn test_wrong_device_kind_publishes_failure() {
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let upnp: Arc<Device> = Arc::new(
            UpnpDevice::new(
                "uuid:1",
                "Renderer",
                "127.0.0.1",
                1400,
                AvTransportService::new("http://127.0.0.1:1400/control"),
                vec![],
            )
            .into(),
        );

        streamer(&events).stop(upnp).await;
        let event = next(&mut rx).await;
        assert_eq!(event.kind, StreamingEventType::Stop);
        assert_eq!(event.error_message(), Some("uuid:1 is not an AirPlay device"));
    }
}
