/// UPnP/DLNA MediaRenderer support
pub mod control_point;
pub mod didl;
pub mod streamer;

pub use control_point::{
    AvTransportControl, MediaInfo, PositionInfo, SoapControlPoint, TransportInfo, TransportState,
    UpnpError,
};
pub use streamer::UpnpStreamer;
