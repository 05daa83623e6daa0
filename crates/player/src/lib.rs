//! Control of the external media player: the persisted player state, the
//! JSON IPC channel and the process lifecycle around them.

pub mod error;
pub mod ipc;
pub mod player;
pub mod process;
pub mod state;

pub use error::{PlayerError, Result, StateError};
pub use player::{
    track_id_from_path, Advance, Direction, PlaybackStatus, Player, PlayerConfig, ProcessPhase,
    Queued, TrackLookup,
};
pub use state::{PlayerState, StateStore};
