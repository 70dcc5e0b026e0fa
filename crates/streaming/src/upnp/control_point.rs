/// AVTransport SOAP control for UPnP MediaRenderers
///
/// `AvTransportControl` is the seam the UPnP streamer talks to. The
/// production implementation, `SoapControlPoint`, posts SOAP envelopes to the
/// renderer's control URL:
/// - GetMediaInfo, GetTransportInfo, GetPositionInfo (queries)
/// - SetAVTransportURI, Play, Pause, Stop (transport actions)
use async_trait::async_trait;
use mediacast_core::AvTransportService;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum UpnpError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{action} failed with status {status}: {detail}")]
    Action {
        action: String,
        status: u16,
        detail: String,
    },

    #[error("malformed SOAP response: {0}")]
    Xml(String),
}

/// `CurrentTransportState` of a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    Transitioning,
    PausedPlayback,
    PausedRecording,
    Recording,
    NoMediaPresent,
    Other(String),
}

impl TransportState {
    pub fn parse(state: &str) -> Self {
        match state.trim() {
            "STOPPED" => TransportState::Stopped,
            "PLAYING" => TransportState::Playing,
            "TRANSITIONING" => TransportState::Transitioning,
            "PAUSED_PLAYBACK" => TransportState::PausedPlayback,
            "PAUSED_RECORDING" => TransportState::PausedRecording,
            "RECORDING" => TransportState::Recording,
            "NO_MEDIA_PRESENT" => TransportState::NoMediaPresent,
            other => TransportState::Other(other.to_string()),
        }
    }

    /// Content is loaded and playing or paused
    pub fn is_active(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::PausedPlayback)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportState::Stopped => f.write_str("STOPPED"),
            TransportState::Playing => f.write_str("PLAYING"),
            TransportState::Transitioning => f.write_str("TRANSITIONING"),
            TransportState::PausedPlayback => f.write_str("PAUSED_PLAYBACK"),
            TransportState::PausedRecording => f.write_str("PAUSED_RECORDING"),
            TransportState::Recording => f.write_str("RECORDING"),
            TransportState::NoMediaPresent => f.write_str("NO_MEDIA_PRESENT"),
            TransportState::Other(state) => f.write_str(state),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    pub state: TransportState,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaInfo {
    /// `None` when the renderer has no URI loaded
    pub current_uri: Option<String>,
}

/// Position information, times in H:MM:SS form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionInfo {
    pub track_duration: String,
    pub rel_time: String,
}

impl PositionInfo {
    pub fn duration_secs(&self) -> u64 {
        parse_time(&self.track_duration)
    }

    pub fn elapsed_secs(&self) -> u64 {
        parse_time(&self.rel_time)
    }
}

/// Seconds in an `H+:MM:SS[.F+]` duration. `NOT_IMPLEMENTED`, other
/// unparsable values and overflowing values read as 0.
pub fn parse_time(time: &str) -> u64 {
    let time = time.trim();
    let whole = time.split('.').next().unwrap_or_default();

    let mut seconds = 0u64;
    let mut fields = 0;
    for field in whole.split(':') {
        let Ok(value) = field.trim_start_matches('+').parse::<u64>() else {
            return 0;
        };
        let Some(total) = seconds.checked_mul(60).and_then(|s| s.checked_add(value)) else {
            return 0;
        };
        seconds = total;
        fields += 1;
    }

    if fields == 3 {
        seconds
    } else {
        0
    }
}

/// Access to the AVTransport actions of a renderer
#[async_trait]
pub trait AvTransportControl: Send + Sync {
    async fn get_media_info(&self, service: &AvTransportService) -> Result<MediaInfo, UpnpError>;

    async fn get_transport_info(
        &self,
        service: &AvTransportService,
    ) -> Result<TransportInfo, UpnpError>;

    async fn get_position_info(
        &self,
        service: &AvTransportService,
    ) -> Result<PositionInfo, UpnpError>;

    async fn set_av_transport_uri(
        &self,
        service: &AvTransportService,
        uri: &str,
        metadata: &str,
    ) -> Result<(), UpnpError>;

    async fn play(&self, service: &AvTransportService) -> Result<(), UpnpError>;

    async fn pause(&self, service: &AvTransportService) -> Result<(), UpnpError>;

    async fn stop(&self, service: &AvTransportService) -> Result<(), UpnpError>;
}

/// AVTransport over SOAP/HTTP
pub struct SoapControlPoint {
    client: reqwest::Client,
}

impl SoapControlPoint {
    /// Renderers live on the local network, so environment proxies are ignored
    pub fn new(timeout: Duration) -> Result<Self, UpnpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Send a SOAP action and return the response's leaf element values
    async fn send_soap_action(
        &self,
        service: &AvTransportService,
        action: &str,
        arguments: &[(&str, &str)],
    ) -> Result<HashMap<String, String>, UpnpError> {
        let body = soap_envelope(&service.service_type, action, arguments);
        let soap_action = format!("\"{}#{}\"", service.service_type, action);

        debug!("Sending SOAP action: {}", soap_action);
        debug!("To URL: {}", service.control_url);
        debug!("Body: {}", body);

        let response = self
            .client
            .post(&service.control_url)
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("SOAPAction", soap_action)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;
        debug!("SOAP response ({}): {}", status, response_text);

        if !status.is_success() {
            let detail = parse_response_values(&response_text)
                .ok()
                .and_then(|values| fault_detail(&values))
                .unwrap_or(response_text);
            return Err(UpnpError::Action {
                action: action.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        parse_response_values(&response_text)
    }
}

#[async_trait]
impl AvTransportControl for SoapControlPoint {
    async fn get_media_info(&self, service: &AvTransportService) -> Result<MediaInfo, UpnpError> {
        let values = self
            .send_soap_action(service, "GetMediaInfo", &[("InstanceID", "0")])
            .await?;

        let current_uri = values
            .get("CurrentURI")
            .map(|uri| uri.trim().to_string())
            .filter(|uri| !uri.is_empty());
        Ok(MediaInfo { current_uri })
    }

    async fn get_transport_info(
        &self,
        service: &AvTransportService,
    ) -> Result<TransportInfo, UpnpError> {
        let values = self
            .send_soap_action(service, "GetTransportInfo", &[("InstanceID", "0")])
            .await?;

        let state = values
            .get("CurrentTransportState")
            .map(|state| TransportState::parse(state))
            .ok_or_else(|| UpnpError::Xml("missing CurrentTransportState".to_string()))?;
        if values.get("CurrentTransportStatus").map(String::as_str) == Some("ERROR_OCCURRED") {
            debug!("Renderer at {} reports ERROR_OCCURRED", service.control_url);
        }

        Ok(TransportInfo { state })
    }

    async fn get_position_info(
        &self,
        service: &AvTransportService,
    ) -> Result<PositionInfo, UpnpError> {
        let values = self
            .send_soap_action(service, "GetPositionInfo", &[("InstanceID", "0")])
            .await?;

        let track_duration = values
            .get("TrackDuration")
            .cloned()
            .unwrap_or_else(|| "0:00:00".to_string());
        let rel_time = values
            .get("RelTime")
            .cloned()
            .unwrap_or_else(|| "0:00:00".to_string());

        Ok(PositionInfo {
            track_duration,
            rel_time,
        })
    }

    async fn set_av_transport_uri(
        &self,
        service: &AvTransportService,
        uri: &str,
        metadata: &str,
    ) -> Result<(), UpnpError> {
        info!("Setting AVTransport URI on {}: {}", service.control_url, uri);
        self.send_soap_action(
            service,
            "SetAVTransportURI",
            &[
                ("InstanceID", "0"),
                ("CurrentURI", uri),
                ("CurrentURIMetaData", metadata),
            ],
        )
        .await?;
        Ok(())
    }

    async fn play(&self, service: &AvTransportService) -> Result<(), UpnpError> {
        info!("Starting playback on {}", service.control_url);
        self.send_soap_action(service, "Play", &[("InstanceID", "0"), ("Speed", "1")])
            .await?;
        Ok(())
    }

    async fn pause(&self, service: &AvTransportService) -> Result<(), UpnpError> {
        info!("Pausing playback on {}", service.control_url);
        self.send_soap_action(service, "Pause", &[("InstanceID", "0")])
            .await?;
        Ok(())
    }

    async fn stop(&self, service: &AvTransportService) -> Result<(), UpnpError> {
        info!("Stopping playback on {}", service.control_url);
        self.send_soap_action(service, "Stop", &[("InstanceID", "0")])
            .await?;
        Ok(())
    }
}

/// Build the SOAP envelope for an action. Argument values are escaped.
pub fn soap_envelope(service_type: &str, action: &str, arguments: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (name, value) in arguments {
        body.push_str(&format!("      <{0}>{1}</{0}>\n", name, escape_xml(value)));
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"
            s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">
  <s:Body>
    <u:{action} xmlns:u="{service_type}">
{body}    </u:{action}>
  </s:Body>
</s:Envelope>"#
    )
}

/// Collect the text of every leaf element, keyed by local name
pub fn parse_response_values(xml: &str) -> Result<HashMap<String, String>, UpnpError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut values = HashMap::new();
    let mut current: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                values.insert(name, String::new());
                current = None;
            }
            Ok(Event::Text(e)) => {
                let unescaped = e
                    .unescape()
                    .map_err(|e| UpnpError::Xml(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if current.as_deref() == Some(name.as_str()) {
                    values.insert(name, text.trim().to_string());
                }
                current = None;
                text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(UpnpError::Xml(format!(
                    "error at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(values)
}

fn fault_detail(values: &HashMap<String, String>) -> Option<String> {
    match (values.get("errorCode"), values.get("errorDescription")) {
        (Some(code), Some(description)) => Some(format!("UPnP error {}: {}", code, description)),
        (Some(code), None) => Some(format!("UPnP error {}", code)),
        _ => values.get("faultstring").cloned(),
    }
}

/// Escape XML special characters
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
