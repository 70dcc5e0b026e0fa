use crate::error::StreamingError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Playback state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Nothing confirmed playing yet, or playback ended
    Waiting,
    Playing,
    Paused,
}

/// What a device is playing, as last reported
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamingSession {
    pub device_id: String,
    pub content_name: String,
    pub content_url: String,
    pub status: SessionStatus,
    /// Elapsed seconds
    pub position: u64,
    /// Total seconds, 0 when unknown
    pub duration: u64,
    pub updated_at: DateTime<Utc>,
}

impl StreamingSession {
    pub fn new(
        device_id: impl Into<String>,
        content_url: impl Into<String>,
        content_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            content_name: content_name.into(),
            content_url: content_url.into(),
            status: SessionStatus::Waiting,
            position: 0,
            duration: 0,
            updated_at: Utc::now(),
        }
    }
}

/// One session per device id, safe to share across tasks
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, StreamingSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session, replacing whatever the device had before
    pub fn init_session(&self, device_id: &str, content_url: &str, content_name: &str) {
        self.sessions.insert(
            device_id.to_string(),
            StreamingSession::new(device_id, content_url, content_name),
        );
    }

    pub fn update_status(
        &self,
        device_id: &str,
        status: SessionStatus,
    ) -> Result<(), StreamingError> {
        let mut session = self
            .sessions
            .get_mut(device_id)
            .ok_or_else(|| StreamingError::UnknownSession(device_id.to_string()))?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(())
    }

    /// Record the latest reported position; status is left untouched
    pub fn update_position(
        &self,
        device_id: &str,
        position: u64,
        duration: u64,
    ) -> Result<(), StreamingError> {
        let mut session = self
            .sessions
            .get_mut(device_id)
            .ok_or_else(|| StreamingError::UnknownSession(device_id.to_string()))?;
        session.position = position;
        session.duration = duration;
        session.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove(&self, device_id: &str) -> Option<StreamingSession> {
        self.sessions.remove(device_id).map(|(_, session)| session)
    }

    /// Snapshot of a device's session
    pub fn session(&self, device_id: &str) -> Result<StreamingSession, StreamingError> {
        self.sessions
            .get(device_id)
            .map(|session| session.clone())
            .ok_or_else(|| StreamingError::UnknownSession(device_id.to_string()))
    }

    pub fn sessions(&self) -> Vec<StreamingSession> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Devices whose session is playing or paused
    pub fn active_device_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.status != SessionStatus::Waiting)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_session_starts_waiting() {
        let store = SessionStore::new();
        store.init_session("dev1", "http://x/movie.mp4", "Movie");

        let session = store.session("dev1").unwrap();
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.content_url, "http://x/movie.mp4");
        assert_eq!(session.content_name, "Movie");
        assert_eq!(session.position, 0);
        assert_eq!(session.duration, 0);
    }

    #[test]
    fn test_init_session_overwrites_previous() {
        let store = SessionStore::new();
        store.init_session("dev1", "http://x/a.mp4", "A");
        store.update_status("dev1", SessionStatus::Playing).unwrap();
        store.update_position("dev1", 50, 100).unwrap();

        store.init_session("dev1", "http://x/b.mp4", "B");
        let session = store.session("dev1").unwrap();
        assert_eq!(session.content_name, "B");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.position, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_position_keeps_status() {
        let store = SessionStore::new();
        store.init_session("dev1", "http://x/a.mp4", "A");
        store.update_status("dev1", SessionStatus::Playing).unwrap();

        store.update_position("dev1", 120, 120).unwrap();
        let session = store.session("dev1").unwrap();
        assert_eq!(session.status, SessionStatus::Playing);
        assert_eq!((session.position, session.duration), (120, 120));

        // Last write wins
        store.update_position("dev1", 10, 120).unwrap();
        assert_eq!(store.session("dev1").unwrap().position, 10);
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::new();
        assert_eq!(
            store.session("ghost"),
            Err(StreamingError::UnknownSession("ghost".to_string()))
        );
        assert!(store.update_status("ghost", SessionStatus::Playing).is_err());
        assert!(store.update_position("ghost", 1, 2).is_err());
    }

    #[test]
    fn test_active_device_ids() {
        let store = SessionStore::new();
        store.init_session("waiting", "u", "n");
        store.init_session("playing", "u", "n");
        store.init_session("paused", "u", "n");
        store.update_status("playing", SessionStatus::Playing).unwrap();
        store.update_status("paused", SessionStatus::Paused).unwrap();

        let mut active = store.active_device_ids();
        active.sort();
        assert_eq!(active, vec!["paused".to_string(), "playing".to_string()]);
    }

    #[test]
    fn test_remove() {
        let store = SessionStore::new();
        store.init_session("dev1", "u", "n");
        assert!(store.remove("dev1").is_some());
        assert!(store.remove("dev1").is_none());
        assert!(store.is_empty());
    }
}
