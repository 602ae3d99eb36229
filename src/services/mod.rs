// SeedStream Services
// Business logic layer

mod catalog;
mod error;
mod events;
mod hwaccel;
mod log_manager;
mod path_validator;
mod progress;
mod range;
mod settings_manager;
mod stream_session;
mod transcode_args;
mod transcode_queue;

pub use catalog::*;
pub use error::*;
pub use events::*;
pub use hwaccel::*;
pub use log_manager::*;
pub use path_validator::*;
pub use progress::*;
pub use range::*;
pub use settings_manager::*;
pub use stream_session::*;
pub use transcode_args::*;
pub use transcode_queue::*;
