/// Streaming manager
///
/// Public entry point for driving playback. Commands are validated
/// synchronously (known device, bound streamer) and then handed to the
/// device's streamer on a background task. Outcomes come back as
/// `StreamingEvent`s on the shared event bus; a handler task applies them to
/// the session store.
use crate::poller::StatusPoller;
use dashmap::DashSet;
use mediacast_core::{
    Device, DeviceKind, DeviceRegistry, DeviceStreamer, EventBus, MediaCatalog, MediaNode,
    SessionStatus, SessionStore, StreamingConfig, StreamingError, StreamingEvent,
    StreamingEventType, StreamingSession,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// State shared by the manager, its event handler and the poller
struct SharedState {
    devices: DeviceRegistry,
    sessions: SessionStore,
    streamers: HashMap<DeviceKind, Arc<dyn DeviceStreamer>>,
    /// Devices with a poller-issued status update still running
    updating: Arc<DashSet<String>>,
}

/// Clears a device's `updating` mark when its status task ends
struct UpdateGuard {
    updating: Arc<DashSet<String>>,
    device_id: String,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.updating.remove(&self.device_id);
    }
}

impl SharedState {
    /// Device and the streamer bound to its kind
    fn resolve(
        &self,
        device_id: &str,
    ) -> Result<(Arc<Device>, Arc<dyn DeviceStreamer>), StreamingError> {
        let device = self.devices.get(device_id)?;
        let streamer = self
            .streamers
            .get(&device.kind())
            .cloned()
            .ok_or_else(|| StreamingError::UnsupportedDevice {
                device_id: device_id.to_string(),
                kind: device.kind(),
            })?;
        Ok((device, streamer))
    }

    fn handle_event(&self, event: &StreamingEvent) {
        if let Some(message) = event.error_message() {
            error!(
                "Streaming {} failed on {}: {}",
                event.kind, event.device_id, message
            );
            return;
        }

        debug!("Handling {} event for {}", event.kind, event.device_id);
        let result = match event.kind {
            StreamingEventType::Play | StreamingEventType::Resume => self
                .sessions
                .update_status(&event.device_id, SessionStatus::Playing),
            StreamingEventType::Stop => self
                .sessions
                .update_status(&event.device_id, SessionStatus::Waiting),
            StreamingEventType::Pause => self
                .sessions
                .update_status(&event.device_id, SessionStatus::Paused),
            StreamingEventType::Status => match event.progress_values() {
                Some((position, duration)) => {
                    self.sessions
                        .update_position(&event.device_id, position, duration)
                }
                None => Ok(()),
            },
        };

        if let Err(e) = result {
            warn!("Ignoring {} event: {}", event.kind, e);
        }
    }

    /// Fan out a status update to every device with a running session.
    /// A device still answering the previous update is skipped.
    fn poll_statuses(&self) {
        let device_ids = self.sessions.active_device_ids();
        debug!("Updating status of {} devices", device_ids.len());

        for device_id in device_ids {
            let (device, streamer) = match self.resolve(&device_id) {
                Ok(resolved) => resolved,
                Err(e) => {
                    debug!("Skipping status update: {}", e);
                    continue;
                }
            };
            if !self.updating.insert(device_id.clone()) {
                debug!("Status update of {} still running, skipping", device_id);
                continue;
            }

            let guard = UpdateGuard {
                updating: self.updating.clone(),
                device_id,
            };
            tokio::spawn(async move {
                let _guard = guard;
                streamer.update_status(device).await;
            });
        }
    }
}

pub struct StreamingManager {
    state: Arc<SharedState>,
    events: EventBus,
    handler: JoinHandle<()>,
    poller: Option<StatusPoller>,
}

impl StreamingManager {
    /// Build the manager and start its event handler and status poller.
    /// Must be called from within a tokio runtime.
    ///
    /// `events` must be the bus the streamers publish on. When two streamers
    /// claim the same device kind, the last one wins.
    pub fn new(
        config: &StreamingConfig,
        events: EventBus,
        streamers: Vec<Arc<dyn DeviceStreamer>>,
    ) -> Self {
        let streamers = streamers
            .into_iter()
            .map(|streamer| (streamer.kind(), streamer))
            .collect();
        let state = Arc::new(SharedState {
            devices: DeviceRegistry::new(),
            sessions: SessionStore::new(),
            streamers,
            updating: Arc::new(DashSet::new()),
        });

        let receiver = events.subscribe();
        let handler = tokio::spawn(run_event_handler(state.clone(), receiver));

        let poller = config.status_update_delay().and_then(|period| {
            let state = state.clone();
            StatusPoller::spawn(period, move || state.poll_statuses())
        });

        Self {
            state,
            events,
            handler,
            poller,
        }
    }

    pub fn add_device(&self, device: Device) {
        info!(
            "Adding {} device {} ({}) at {}:{}",
            device.kind(),
            device.id(),
            device.name(),
            device.host(),
            device.port()
        );
        if let Some(replaced) = self.state.devices.add(device) {
            debug!("Replaced previous registration of {}", replaced.id());
        }
    }

    /// Unregister a device, drop its session and release its connection
    pub fn remove_device(&self, device_id: &str) -> Result<(), StreamingError> {
        let device = self
            .state
            .devices
            .remove(device_id)
            .ok_or_else(|| StreamingError::UnknownDevice(device_id.to_string()))?;
        self.state.sessions.remove(device_id);
        info!("Removed {} device {}", device.kind(), device_id);
        Ok(())
    }

    /// Devices at a host address
    pub fn find_devices(&self, host: &str) -> Vec<Arc<Device>> {
        self.state.devices.find_by_host(host)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.state.devices.all()
    }

    pub fn device(&self, device_id: &str) -> Result<Arc<Device>, StreamingError> {
        self.state.devices.get(device_id)
    }

    /// Start `node` on a device. The session is reset to WAITING before the
    /// device is contacted.
    pub fn play(
        &self,
        device_id: &str,
        content_url: &str,
        node: MediaNode,
    ) -> Result<(), StreamingError> {
        let (device, streamer) = self.state.resolve(device_id)?;
        self.state
            .sessions
            .init_session(device_id, content_url, &node.name);

        info!("Playing {} on {}", content_url, device_id);
        let content_url = content_url.to_string();
        tokio::spawn(async move { streamer.play(device, content_url, node).await });
        Ok(())
    }

    /// Look a node up in the catalog and play it
    pub fn play_from_catalog(
        &self,
        catalog: &dyn MediaCatalog,
        device_id: &str,
        node_id: &str,
    ) -> Result<(), StreamingError> {
        self.state.devices.get(device_id)?;
        let node = catalog
            .node(node_id)
            .ok_or_else(|| StreamingError::UnknownNode(node_id.to_string()))?;
        let content_url = catalog.node_url(&node);
        self.play(device_id, &content_url, node)
    }

    pub fn stop(&self, device_id: &str) -> Result<(), StreamingError> {
        let (device, streamer) = self.state.resolve(device_id)?;
        debug!("Stopping {}", device_id);
        tokio::spawn(async move { streamer.stop(device).await });
        Ok(())
    }

    pub fn pause(&self, device_id: &str) -> Result<(), StreamingError> {
        let (device, streamer) = self.state.resolve(device_id)?;
        debug!("Pausing {}", device_id);
        tokio::spawn(async move { streamer.pause(device).await });
        Ok(())
    }

    pub fn resume(&self, device_id: &str) -> Result<(), StreamingError> {
        let (device, streamer) = self.state.resolve(device_id)?;
        debug!("Resuming {}", device_id);
        tokio::spawn(async move { streamer.resume(device).await });
        Ok(())
    }

    /// Query one device now instead of waiting for the poller
    pub fn update_status(&self, device_id: &str) -> Result<(), StreamingError> {
        let (device, streamer) = self.state.resolve(device_id)?;
        tokio::spawn(async move { streamer.update_status(device).await });
        Ok(())
    }

    pub fn session(&self, device_id: &str) -> Result<StreamingSession, StreamingError> {
        self.state.sessions.session(device_id)
    }

    pub fn sessions(&self) -> Vec<StreamingSession> {
        self.state.sessions.sessions()
    }

    /// Observe every streaming event
    pub fn subscribe(&self) -> broadcast::Receiver<StreamingEvent> {
        self.events.subscribe()
    }

    /// Apply an event to the session store. The background handler calls
    /// this for every event published on the bus.
    pub fn handle_event(&self, event: &StreamingEvent) {
        self.state.handle_event(event);
    }

    /// Stop the poller and the event handler
    pub fn shutdown(&self) {
        if let Some(poller) = &self.poller {
            poller.stop();
        }
        self.handler.abort();
        debug!("Streaming manager shut down");
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_event_handler(
    state: Arc<SharedState>,
    mut receiver: broadcast::Receiver<StreamingEvent>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => state.handle_event(&event),
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event handler lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
