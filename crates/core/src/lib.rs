pub mod atomic;
pub mod config;
pub mod format;
pub mod model;

pub use config::AppConfig;
pub use format::format_duration;
pub use model::{TrackInfo, UNKNOWN_ARTIST};
