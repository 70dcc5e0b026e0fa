//! Streaming events: the outcome of every device command and status query.
//!
//! Streamers publish events on an [`EventBus`]; the streaming manager and any
//! external observer (a web UI, a logger) subscribe to the same bus.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the event bus
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which command produced an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamingEventType {
    Play,
    Stop,
    Pause,
    Resume,
    Status,
}

impl fmt::Display for StreamingEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamingEventType::Play => "PLAY",
            StreamingEventType::Stop => "STOP",
            StreamingEventType::Pause => "PAUSE",
            StreamingEventType::Resume => "RESUME",
            StreamingEventType::Status => "STATUS",
        };
        f.write_str(name)
    }
}

/// Result carried by an event. Progress and failure are mutually exclusive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum EventOutcome {
    /// The command succeeded
    Done,
    /// A status query succeeded, values in seconds
    Progress { position: u64, duration: u64 },
    /// The command failed
    Failed { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamingEvent {
    #[serde(rename = "type")]
    pub kind: StreamingEventType,
    pub device_id: String,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

impl StreamingEvent {
    pub fn success(kind: StreamingEventType, device_id: impl Into<String>) -> Self {
        Self {
            kind,
            device_id: device_id.into(),
            outcome: EventOutcome::Done,
        }
    }

    /// A successful STATUS query
    pub fn progress(device_id: impl Into<String>, position: u64, duration: u64) -> Self {
        Self {
            kind: StreamingEventType::Status,
            device_id: device_id.into(),
            outcome: EventOutcome::Progress { position, duration },
        }
    }

    pub fn failure(
        kind: StreamingEventType,
        device_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            device_id: device_id.into(),
            outcome: EventOutcome::Failed {
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, EventOutcome::Failed { .. })
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            EventOutcome::Failed { message } => Some(message),
            _ => None,
        }
    }

    /// `(position, duration)` of a successful STATUS query
    pub fn progress_values(&self) -> Option<(u64, u64)> {
        match self.outcome {
            EventOutcome::Progress { position, duration } => Some((position, duration)),
            _ => None,
        }
    }
}

/// Broadcast channel shared by streamers (publishers) and observers
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<StreamingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: StreamingEvent) {
        debug!("Publishing streaming event: {:?}", event);
        if self.sender.send(event).is_err() {
            debug!("No subscriber for streaming event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
