//! Local track registry: an in-memory collection of [`TrackInfo`] records
//! persisted as a pretty-printed JSON array with crash-safe saves.
//!
//! One process owns the registry file. Separate CLI invocations racing on the
//! same file are not coordinated.

pub mod error;
pub mod registry;
pub mod rescan;
mod storage;

pub use error::{LibraryError, Result};
pub use registry::{BatchGuard, TrackRegistry};
pub use rescan::{rescan, RescanReport};
pub use ytpl_core::TrackInfo;
