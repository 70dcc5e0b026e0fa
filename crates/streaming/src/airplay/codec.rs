/// AirPlay video/photo control protocol codec
///
/// Requests are HTTP/1.1-shaped text sent over a raw, persistent TCP socket.
/// Responses carry either an opaque text body or a `text/parameters` body,
/// a newline separated list of `key: value` pairs.
use std::collections::{BTreeMap, HashMap};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const USER_AGENT: &str = "MediaControl/1.0";
pub const TEXT_PARAMETERS: &str = "text/parameters";

/// Largest response body accepted from a device
pub const MAX_BODY_LEN: usize = 64 * 1024;

/// Decoded `text/parameters` body
pub type ContentParameters = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("connection closed by device")]
    ConnectionClosed,

    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),

    #[error("truncated response: {0}")]
    Truncated(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A command understood by an AirPlay receiver
#[derive(Debug, Clone, PartialEq)]
pub enum AirplayCommand {
    /// Load and start `content_url`, `start_position` is a 0..1 fraction
    Play {
        content_url: String,
        start_position: f64,
    },
    /// Playback rate, 0 pauses and 1 resumes
    Rate { value: f64 },
    Stop,
    /// Query duration and position
    PlaybackStatus,
    /// Jump to `position` seconds
    Seek { position: f64 },
}

impl AirplayCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AirplayCommand::Play { .. } => "play",
            AirplayCommand::Rate { .. } => "rate",
            AirplayCommand::Stop => "stop",
            AirplayCommand::PlaybackStatus => "playback-status",
            AirplayCommand::Seek { .. } => "seek",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            AirplayCommand::PlaybackStatus => "GET",
            _ => "POST",
        }
    }

    /// Request target, query string included
    pub fn path(&self) -> String {
        match self {
            AirplayCommand::Play { .. } => "/play".to_string(),
            AirplayCommand::Rate { value } => format!("/rate?value={:.6}", value),
            AirplayCommand::Stop => "/stop".to_string(),
            AirplayCommand::PlaybackStatus => "/scrub".to_string(),
            AirplayCommand::Seek { position } => format!("/scrub?position={:.6}", position),
        }
    }

    fn body(&self) -> Option<String> {
        match self {
            AirplayCommand::Play {
                content_url,
                start_position,
            } => {
                let mut parameters = ContentParameters::new();
                parameters.insert("Content-Location".to_string(), content_url.clone());
                parameters.insert("Start-Position".to_string(), format!("{:.6}", start_position));
                Some(encode_parameters(&parameters))
            }
            _ => None,
        }
    }

    /// Full request text, ready to write on the socket
    pub fn encode(&self) -> String {
        let body = self.body();

        let mut request = format!("{} {} HTTP/1.1\r\n", self.method(), self.path());
        request.push_str(&format!(
            "Content-Length: {}\r\n",
            body.as_ref().map_or(0, String::len)
        ));
        request.push_str(&format!("User-Agent: {}\r\n", USER_AGENT));
        if body.is_some() {
            request.push_str(&format!("Content-Type: {}\r\n", TEXT_PARAMETERS));
        }
        request.push_str("\r\n");

        if let Some(body) = body {
            request.push_str(&body);
        }
        request
    }
}

/// Body of a device response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    Empty,
    Text(String),
    Parameters(ContentParameters),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirplayResponse {
    pub code: u16,
    pub message: String,
    /// Header names are lowercased
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl AirplayResponse {
    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Parameters of a `text/parameters` body, empty for any other body
    pub fn into_parameters(self) -> ContentParameters {
        match self.body {
            ResponseBody::Parameters(parameters) => parameters,
            _ => ContentParameters::new(),
        }
    }
}

pub fn encode_parameters(parameters: &ContentParameters) -> String {
    parameters
        .iter()
        .map(|(key, value)| format!("{}: {}\n", key, value))
        .collect()
}

/// Lines without a colon are skipped
pub fn decode_parameters(body: &str) -> ContentParameters {
    body.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Split `HTTP/1.1 200 OK` into code and message
pub fn parse_status_line(line: &str) -> Result<(u16, String), CodecError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(3, ' ');

    let protocol = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|code| code.parse::<u16>().ok());
    match code {
        Some(code) if !protocol.is_empty() => {
            let message = parts.next().unwrap_or_default().trim().to_string();
            Ok((code, message))
        }
        _ => Err(CodecError::MalformedStatusLine(line.to_string())),
    }
}

/// Read one response: status line, headers up to a blank line, then exactly
/// `Content-Length` bytes of body.
pub async fn read_response<R>(reader: &mut R) -> Result<AirplayResponse, CodecError>
where
    R: AsyncBufRead + Unpin,
{
    let mut status_line = String::new();
    if reader.read_line(&mut status_line).await? == 0 {
        return Err(CodecError::ConnectionClosed);
    }
    let (code, message) = parse_status_line(&status_line)?;

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(CodecError::Truncated("headers not terminated"));
        }

        let line = line.trim();
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|length| *length <= MAX_BODY_LEN)
            .ok_or_else(|| CodecError::InvalidContentLength(value.clone()))?,
        None => 0,
    };

    let body = if length > 0 {
        let mut data = vec![0u8; length];
        reader.read_exact(&mut data).await.map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                CodecError::Truncated("body shorter than Content-Length")
            } else {
                CodecError::Io(e)
            }
        })?;
        let text = String::from_utf8_lossy(&data).into_owned();

        let is_parameters = headers
            .get("content-type")
            .is_some_and(|value| value.to_ascii_lowercase().starts_with(TEXT_PARAMETERS));
        if is_parameters {
            ResponseBody::Parameters(decode_parameters(&text))
        } else {
            ResponseBody::Text(text)
        }
    } else {
        ResponseBody::Empty
    };

    Ok(AirplayResponse {
        code,
        message,
        headers,
        body,
    })
}
