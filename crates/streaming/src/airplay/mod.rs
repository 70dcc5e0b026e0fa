pub mod codec;
pub mod control_point;
pub mod streamer;

pub use codec::{AirplayCommand, AirplayResponse, CodecError, ContentParameters, ResponseBody};
pub use control_point::{AirplayControlPoint, ControlPointError};
pub use streamer::AirplayStreamer;
