use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("player is not running")]
    NotRunning,

    #[error("player not reachable at {}, possibly stopped: {source}", socket.display())]
    Unreachable {
        socket: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("player rejected '{command}': {error}")]
    Command { command: String, error: String },

    #[error("player protocol error: {0}")]
    Protocol(String),

    #[error("failed to start {player}: {source}")]
    Spawn {
        player: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("volume must be between 0 and 100, got {0}")]
    InvalidVolume(i64),

    #[error("no files to play")]
    EmptyPlaylist,

    #[error(transparent)]
    State(#[from] StateError),
}

impl PlayerError {
    /// Whether the error means there is no live player to talk to.
    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning | Self::Unreachable { .. })
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("failed to {op} state file {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed state file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode player state: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
