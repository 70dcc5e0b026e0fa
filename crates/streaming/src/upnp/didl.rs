/// DIDL-Lite metadata sent along with `SetAVTransportURI`
use super::control_point::escape_xml;
use mediacast_core::{MediaKind, MediaNode};

/// Sent instead of DIDL-Lite when a node cannot be described
pub const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";

/// UPnP class matching a media kind
fn upnp_class(kind: MediaKind) -> Option<&'static str> {
    match kind {
        MediaKind::Video => Some("object.item.videoItem.movie"),
        MediaKind::Audio => Some("object.item.audioItem.musicTrack"),
        MediaKind::Image => Some("object.item.imageItem.photo"),
        MediaKind::Any | MediaKind::Other => None,
    }
}

/// Build a one-item DIDL-Lite document for `node` served at `content_url`.
///
/// Containers and nodes that are neither video, audio nor image yield
/// [`NOT_IMPLEMENTED`].
pub fn node_metadata(node: &MediaNode, content_url: &str) -> String {
    let Some(mime_type) = &node.mime_type else {
        return NOT_IMPLEMENTED.to_string();
    };
    let Some(class) = upnp_class(mime_type.kind()) else {
        return NOT_IMPLEMENTED.to_string();
    };

    let protocol_info = format!("http-get:*:{}:*", mime_type);

    let mut didl = String::new();
    didl.push_str(r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" "#);
    didl.push_str(r#"xmlns:dc="http://purl.org/dc/elements/1.1/" "#);
    didl.push_str(r#"xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/">"#);

    didl.push_str(&format!(
        r#"<item id="{}" parentID="{}" restricted="1">"#,
        escape_xml(&node.id),
        escape_xml(&node.parent_id)
    ));
    didl.push_str(&format!("<dc:title>{}</dc:title>", escape_xml(&node.name)));
    didl.push_str(&format!("<upnp:class>{}</upnp:class>", class));

    didl.push_str(&format!(r#"<res protocolInfo="{}""#, escape_xml(&protocol_info)));
    if let Some(size) = node.size {
        didl.push_str(&format!(r#" size="{}""#, size));
    }
    didl.push('>');
    didl.push_str(&escape_xml(content_url));
    didl.push_str("</res>");

    didl.push_str("</item>");
    didl.push_str("</DIDL-Lite>");

    didl
}
