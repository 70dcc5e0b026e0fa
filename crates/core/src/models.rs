use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Broad media family of a MIME type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
    /// `*` or `*/*`, accepts everything
    Any,
    Other,
}

/// A parsed `type/subtype` MIME type
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MimeType {
    pub media_type: String,
    pub sub_type: String,
}

impl MimeType {
    pub fn new(media_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into().to_lowercase(),
            sub_type: sub_type.into().to_lowercase(),
        }
    }

    /// Parse a MIME type, accepting a UPnP protocolInfo entry as well
    /// (`http-get:*:video/mp4:*` yields `video/mp4`).
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let mime = match input.split(':').collect::<Vec<_>>().as_slice() {
            [_, _, content_format, _] => *content_format,
            _ => input,
        };

        if mime == "*" {
            return Some(Self::new("*", "*"));
        }

        let (media_type, sub_type) = mime.split_once('/')?;
        let (media_type, sub_type) = (media_type.trim(), sub_type.trim());
        if media_type.is_empty() || sub_type.is_empty() {
            return None;
        }

        // Drop parameters such as "; charset=utf-8"
        let sub_type = sub_type.split(';').next().unwrap_or(sub_type).trim();
        Some(Self::new(media_type, sub_type))
    }

    pub fn kind(&self) -> MediaKind {
        match self.media_type.as_str() {
            "video" => MediaKind::Video,
            "audio" => MediaKind::Audio,
            "image" => MediaKind::Image,
            "*" => MediaKind::Any,
            _ => MediaKind::Other,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.sub_type)
    }
}

/// Error type for invalid MIME type strings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseMimeTypeError(pub String);

impl fmt::Display for ParseMimeTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mime type: {}", self.0)
    }
}

impl std::error::Error for ParseMimeTypeError {}

impl FromStr for MimeType {
    type Err = ParseMimeTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseMimeTypeError(s.to_string()))
    }
}

/// Where the catalog serves a node from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeLocation {
    Path(PathBuf),
    Url(String),
}

/// A media catalog entry handed to `play`.
///
/// Container nodes (folders, playlists, podcasts) carry no MIME type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaNode {
    pub id: String,
    pub parent_id: String,
    pub name: String,
    pub location: NodeLocation,
    pub mime_type: Option<MimeType>,
    pub size: Option<u64>,
}

impl MediaNode {
    /// Media family of this node, `None` for containers
    pub fn media_kind(&self) -> Option<MediaKind> {
        self.mime_type.as_ref().map(MimeType::kind)
    }
}
