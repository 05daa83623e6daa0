use crate::error::StateError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use ytpl_core::atomic;

const HISTORY_LIMIT: usize = 100;

/// What is playing, as last observed or commanded.
///
/// A nonzero `pid` is advisory until the control socket answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlayerState {
    pub pid: u32,
    pub ipc_socket_path: PathBuf,
    pub current_track_id: String,
    pub current_track_title: String,
    #[serde(rename = "downloaded_file_path")]
    pub current_file_path: PathBuf,
    /// Empty when not playing from a named playlist.
    #[serde(rename = "current_playlist")]
    pub current_playlist_name: String,
    pub is_playing: bool,
    pub volume: u8,
    /// Position in the active playlist or shuffle queue, -1 when unknown.
    #[serde(rename = "last_played_track_index")]
    pub last_played_index: i64,
    pub shuffle_queue: Vec<String>,
    pub playback_history: Vec<String>,
}

impl PlayerState {
    pub fn is_running(&self) -> bool {
        self.pid != 0
    }

    /// Forgets the process and everything about the current playback.
    /// Volume and socket path survive.
    pub fn reset_playback(&mut self) {
        self.pid = 0;
        self.current_track_id.clear();
        self.current_track_title.clear();
        self.current_file_path = PathBuf::new();
        self.current_playlist_name.clear();
        self.is_playing = false;
        self.last_played_index = -1;
        self.shuffle_queue.clear();
        self.playback_history.clear();
    }

    pub fn clear_current_track(&mut self) {
        self.current_track_id.clear();
        self.current_track_title.clear();
        self.current_file_path = PathBuf::new();
        self.last_played_index = -1;
    }

    pub fn record_history(&mut self, id: &str) {
        if self.playback_history.last().map(String::as_str) == Some(id) {
            return;
        }
        self.playback_history.push(id.to_string());
        if self.playback_history.len() > HISTORY_LIMIT {
            let excess = self.playback_history.len() - HISTORY_LIMIT;
            self.playback_history.drain(..excess);
        }
    }

    /// Index into `shuffle_queue` if `last_played_index` points inside it.
    pub fn queue_position(&self) -> Option<usize> {
        usize::try_from(self.last_played_index)
            .ok()
            .filter(|i| *i < self.shuffle_queue.len())
    }
}

/// The single player-state record and the file it lives in.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: PlayerState,
}

impl StateStore {
    /// Loads the record, or a fresh one when the file does not exist yet.
    /// The configured socket path always replaces a stored one.
    pub fn load(path: impl Into<PathBuf>, socket_path: &Path) -> Result<Self, StateError> {
        let path = path.into();
        let mut state = match std::fs::read(&path) {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => PlayerState::default(),
            Ok(data) => serde_json::from_slice(&data).map_err(|source| StateError::Malformed {
                path: path.clone(),
                source,
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state file yet");
                PlayerState {
                    last_played_index: -1,
                    ..PlayerState::default()
                }
            }
            Err(source) => {
                return Err(StateError::Io {
                    op: "read",
                    path,
                    source,
                })
            }
        };

        if state.ipc_socket_path != socket_path {
            if !state.ipc_socket_path.as_os_str().is_empty() {
                info!(
                    stored = %state.ipc_socket_path.display(),
                    configured = %socket_path.display(),
                    "using configured ipc socket path"
                );
            }
            state.ipc_socket_path = socket_path.to_path_buf();
        }

        Ok(Self { path, state })
    }

    /// Writes the whole record through a temporary file.
    pub fn save(&self) -> Result<(), StateError> {
        let data = serde_json::to_vec_pretty(&self.state)?;
        atomic::write(&self.path, ".state.tmp.", &data).map_err(|source| StateError::Io {
            op: "write",
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), pid = self.state.pid, "saved player state");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &PlayerState {
        &self.state
    }

    pub fn get_mut(&mut self) -> &mut PlayerState {
        &mut self.state
    }

    /// Applies `f` and saves.
    pub fn update(&mut self, f: impl FnOnce(&mut PlayerState)) -> Result<(), StateError> {
        f(&mut self.state);
        self.save()
    }
}
