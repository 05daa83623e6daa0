use crate::error::{PlayerError, Result};
use crate::ipc::{self, IpcRequest};
use crate::process::{self, LaunchSpec};
use crate::state::{PlayerState, StateStore};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use ytpl_core::AppConfig;

/// Timings and launch settings for the controlled player.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub program: String,
    pub socket: PathBuf,
    pub default_volume: u8,
    pub start_delay: Duration,
    pub probe_timeout: Duration,
    pub quit_grace: Duration,
}

impl PlayerConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            program: cfg.player_path.clone(),
            socket: cfg.player_ipc_socket_path.clone(),
            default_volume: cfg.default_volume,
            start_delay: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(2),
            quit_grace: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    Stopped,
    /// Spawned, control socket not confirmed yet.
    Starting,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// A track handed to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queued {
    pub id: String,
    pub title: String,
    pub path: PathBuf,
}

/// Resolves track ids for status and queue navigation.
pub trait TrackLookup {
    fn title(&self, id: &str) -> Option<String>;
    fn file(&self, id: &str) -> PathBuf;
}

/// Outcome of a next/prev request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// Forwarded to the player's own playlist.
    Playlist,
    /// Loaded the neighbouring shuffle-queue entry.
    Loaded { id: String, index: usize },
    /// Moved past the last queue entry; the player was stopped.
    EndOfQueue,
    StartOfQueue,
    MissingFile { id: String },
    NoQueue,
}

/// A live view of playback for display.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub track_id: String,
    pub title: String,
    pub file_path: PathBuf,
    pub playlist: Option<String>,
    pub index: i64,
    pub is_playing: bool,
    pub position: Option<f64>,
    pub duration: Option<f64>,
    pub volume: Option<f64>,
}

/// Owns the persisted player state and drives the external player.
///
/// Every control call that cannot reach the player resets the stored pid to
/// zero and saves before returning [`PlayerError::Unreachable`].
#[derive(Debug)]
pub struct Player {
    cfg: PlayerConfig,
    store: StateStore,
}

impl Player {
    pub fn new(cfg: PlayerConfig, store: StateStore) -> Self {
        Self { cfg, store }
    }

    pub fn state(&self) -> &PlayerState {
        self.store.get()
    }

    pub fn update(&mut self, f: impl FnOnce(&mut PlayerState)) -> Result<()> {
        Ok(self.store.update(f)?)
    }

    /// Stopped when no pid is tracked; otherwise the process is believed to run.
    pub fn phase(&self) -> ProcessPhase {
        if self.state().is_running() {
            ProcessPhase::Running
        } else {
            ProcessPhase::Stopped
        }
    }

    async fn request(&mut self, req: &IpcRequest) -> Result<Value> {
        let state = self.store.get();
        if !state.is_running() || state.ipc_socket_path.as_os_str().is_empty() {
            return Err(PlayerError::NotRunning);
        }
        let socket = state.ipc_socket_path.clone();
        let pid = state.pid;

        match ipc::send(&socket, req).await {
            Err(err @ PlayerError::Unreachable { .. }) => {
                warn!(pid, error = %err, "assuming player is no longer running");
                let state = self.store.get_mut();
                state.pid = 0;
                state.is_playing = false;
                if let Err(save_err) = self.store.save() {
                    warn!(error = %save_err, "failed to persist stopped player state");
                }
                Err(err)
            }
            other => other,
        }
    }

    pub async fn get_property(&mut self, name: &str) -> Result<Value> {
        self.request(&IpcRequest::get_property(name)).await
    }

    pub async fn set_property(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.request(&IpcRequest::set_property(name, value)).await?;
        Ok(())
    }

    async fn number_property(&mut self, name: &str) -> Option<f64> {
        self.get_property(name).await.ok().and_then(|v| v.as_f64())
    }

    /// File the player has loaded and its zero-based playlist position.
    /// The position is -1 when the player cannot report one.
    pub async fn currently_playing(&mut self) -> Result<(PathBuf, i64)> {
        let path = match self.get_property("path").await? {
            Value::String(s) => PathBuf::from(s),
            Value::Null => PathBuf::new(),
            other => {
                return Err(PlayerError::Protocol(format!(
                    "'path' property is not a string: {other}"
                )))
            }
        };

        let position = match self.get_property("playlist-pos").await {
            Ok(v) => v.as_f64().map(|p| p as i64).unwrap_or(-1),
            Err(err) => {
                debug!(error = %err, "no playlist position");
                -1
            }
        };
        Ok((path, position))
    }

    pub async fn pause(&mut self) -> Result<()> {
        self.set_property("pause", true).await?;
        self.update(|s| s.is_playing = false)
    }

    pub async fn resume(&mut self) -> Result<()> {
        self.set_property("pause", false).await?;
        self.update(|s| s.is_playing = true)
    }

    pub async fn set_volume(&mut self, volume: i64) -> Result<()> {
        let level = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(PlayerError::InvalidVolume(volume))?;
        self.set_property("volume", level).await?;
        self.update(|s| s.volume = level)
    }

    /// Replaces whatever is playing with `path` in the running player.
    pub async fn load_file(&mut self, path: &Path) -> Result<()> {
        self.request(&IpcRequest::loadfile(path, "replace")).await?;
        Ok(())
    }

    /// Plays one file, replacing any running player.
    pub async fn start_single(&mut self, track: Queued) -> Result<ProcessPhase> {
        let phase = self.launch(vec![track.path.clone()], 0).await?;
        self.update(|s| {
            s.current_playlist_name.clear();
            s.shuffle_queue.clear();
            s.last_played_index = -1;
            set_current(s, &track);
        })?;
        Ok(phase)
    }

    /// Plays `tracks` as the player's own playlist starting at `start_index`.
    pub async fn start_playlist(
        &mut self,
        name: &str,
        tracks: &[Queued],
        start_index: usize,
    ) -> Result<ProcessPhase> {
        if tracks.is_empty() {
            return Err(PlayerError::EmptyPlaylist);
        }
        let start = if start_index < tracks.len() { start_index } else { 0 };
        let files = tracks.iter().map(|t| t.path.clone()).collect();
        let phase = self.launch(files, start).await?;

        self.update(|s| {
            s.current_playlist_name = name.to_string();
            s.shuffle_queue.clear();
            s.last_played_index = start as i64;
            set_current(s, &tracks[start]);
        })?;
        Ok(phase)
    }

    async fn launch(&mut self, files: Vec<PathBuf>, start_index: usize) -> Result<ProcessPhase> {
        if self.state().is_running() {
            info!(pid = self.state().pid, "stopping current player first");
            if let Err(err) = self.stop().await {
                warn!(error = %err, "could not stop existing player");
            }
        }

        let volume = match self.state().volume {
            0 => self.cfg.default_volume,
            v => v,
        };
        let spec = LaunchSpec {
            program: self.cfg.program.clone(),
            socket: self.cfg.socket.clone(),
            volume,
            files,
            start_index,
        };

        let pid = match process::spawn(&spec) {
            Ok(pid) => pid,
            Err(err) => {
                self.update(|s| s.pid = 0)?;
                return Err(err);
            }
        };
        self.update(|s| {
            s.pid = pid;
            s.ipc_socket_path = spec.socket.clone();
            s.is_playing = true;
        })?;

        tokio::time::sleep(self.cfg.start_delay).await;
        if ipc::probe(&spec.socket, self.cfg.probe_timeout).await {
            Ok(ProcessPhase::Running)
        } else {
            warn!(pid, socket = %spec.socket.display(), "player ipc socket not ready yet");
            Ok(ProcessPhase::Starting)
        }
    }

    /// Quits the player, falling back to SIGTERM when the socket does not
    /// answer, then clears all playback fields and saves.
    pub async fn stop(&mut self) -> Result<()> {
        let pid = self.state().pid;
        if pid == 0 {
            debug!("stop: player is not running");
            return Ok(());
        }
        let socket = self.state().ipc_socket_path.clone();

        let mut outcome = Ok(());
        match ipc::send(&socket, &IpcRequest::quit()).await {
            Ok(_) => {
                tokio::time::sleep(self.cfg.quit_grace).await;
                info!(pid, "sent quit to player");
            }
            Err(err) => {
                warn!(pid, error = %err, "quit via ipc failed; signalling process");
                if process::is_alive(pid) {
                    outcome = process::terminate(pid);
                } else {
                    debug!(pid, "player process already exited");
                }
            }
        }

        process::remove_socket(&socket);
        self.update(PlayerState::reset_playback)?;
        outcome
    }

    /// Pulls the loaded file from the player into the stored state.
    pub async fn refresh_status(&mut self, lookup: &impl TrackLookup) -> Result<()> {
        let (path, position) = match self.currently_playing().await {
            Ok(found) => found,
            // Only the `path` query can fail this way; a failed position is already -1.
            Err(PlayerError::Command { error, .. }) => {
                debug!(%error, "player has nothing loaded");
                (PathBuf::new(), -1)
            }
            Err(err) => return Err(err),
        };

        let state = self.store.get_mut();
        if path.as_os_str().is_empty() {
            state.clear_current_track();
        } else {
            let id = track_id_from_path(&path);
            state.current_track_title = lookup.title(&id).unwrap_or_else(|| id.clone());
            if !state.current_playlist_name.is_empty() {
                state.last_played_index = position;
            }
            if state.current_track_id != id {
                state.record_history(&id);
            }
            state.current_track_id = id;
            state.current_file_path = path;
        }
        self.store.save()?;
        Ok(())
    }

    /// Reconciles with the player and polls time, duration, volume and pause.
    pub async fn status(&mut self, lookup: &impl TrackLookup) -> Result<PlaybackStatus> {
        self.refresh_status(lookup).await?;

        let position = self.number_property("playback-time").await;
        let duration = self.number_property("duration").await;
        let volume = self.number_property("volume").await;
        if let Ok(Value::Bool(paused)) = self.get_property("pause").await {
            if self.state().is_playing == paused {
                self.update(|s| s.is_playing = !paused)?;
            }
        }
        if !self.state().is_running() {
            return Err(PlayerError::NotRunning);
        }

        let s = self.state();
        Ok(PlaybackStatus {
            track_id: s.current_track_id.clone(),
            title: s.current_track_title.clone(),
            file_path: s.current_file_path.clone(),
            playlist: (!s.current_playlist_name.is_empty()).then(|| s.current_playlist_name.clone()),
            index: s.last_played_index,
            is_playing: s.is_playing,
            position,
            duration,
            volume,
        })
    }

    /// Moves within the active playlist or shuffle queue.
    pub async fn step(&mut self, direction: Direction, lookup: &impl TrackLookup) -> Result<Advance> {
        if !self.state().is_running() {
            return Err(PlayerError::NotRunning);
        }

        if !self.state().current_playlist_name.is_empty() {
            let req = match direction {
                Direction::Next => IpcRequest::playlist_next(),
                Direction::Prev => IpcRequest::playlist_prev(),
            };
            self.request(&req).await?;
            return Ok(Advance::Playlist);
        }

        let queue_len = self.state().shuffle_queue.len();
        if queue_len == 0 {
            return Ok(Advance::NoQueue);
        }

        // An unknown slot starts the queue over on next.
        let index = match (self.state().queue_position(), direction) {
            (Some(current), Direction::Next) => current + 1,
            (None, Direction::Next) => 0,
            (Some(0) | None, Direction::Prev) => return Ok(Advance::StartOfQueue),
            (Some(current), Direction::Prev) => current - 1,
        };
        if index >= queue_len {
            info!("end of shuffle queue");
            self.stop().await?;
            return Ok(Advance::EndOfQueue);
        }

        let id = self.state().shuffle_queue[index].clone();
        let path = lookup.file(&id);
        if !path.exists() {
            return Ok(Advance::MissingFile { id });
        }

        self.load_file(&path).await?;
        let track = Queued {
            title: lookup.title(&id).unwrap_or_else(|| id.clone()),
            id: id.clone(),
            path,
        };
        self.update(|s| {
            s.last_played_index = index as i64;
            set_current(s, &track);
        })?;
        Ok(Advance::Loaded { id, index })
    }
}

fn set_current(state: &mut PlayerState, track: &Queued) {
    state.current_track_id = track.id.clone();
    state.current_track_title = track.title.clone();
    state.current_file_path = track.path.clone();
    state.is_playing = true;
    state.record_history(&track.id);
}

/// Track ids are the audio file's stem.
pub fn track_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
