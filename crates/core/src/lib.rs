pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod models;
pub mod registry;
pub mod session;
pub mod traits;

pub use config::*;
pub use device::*;
pub use error::*;
pub use events::*;
pub use models::*;
pub use registry::*;
pub use session::*;
pub use traits::*;
