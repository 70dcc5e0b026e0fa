pub mod airplay;
pub mod manager;
pub mod poller;
pub mod upnp;

pub use airplay::{AirplayCommand, AirplayControlPoint, AirplayStreamer, ControlPointError};
pub use manager::StreamingManager;
pub use poller::StatusPoller;
pub use upnp::{AvTransportControl, SoapControlPoint, UpnpError, UpnpStreamer};
