//! Named playlists stored as plain text: one `<name>.ytpl` file per playlist,
//! one track id per line. Older `<name>.txt` files are still read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use ytpl_core::atomic;

const EXTENSION: &str = "ytpl";
const LEGACY_EXTENSION: &str = "txt";

#[derive(Error, Debug)]
pub enum PlaylistError {
    #[error("playlist '{0}' not found")]
    NotFound(String),

    #[error("playlist '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid playlist name '{0}'")]
    InvalidName(String),

    #[error("track '{track_id}' is already in playlist '{playlist}'")]
    DuplicateTrack { playlist: String, track_id: String },

    #[error("track '{track_id}' is not in playlist '{playlist}'")]
    TrackNotInPlaylist { playlist: String, track_id: String },

    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, PlaylistError>;

fn io_err(op: &'static str, path: &Path) -> impl FnOnce(std::io::Error) -> PlaylistError {
    let path = path.to_path_buf();
    move |source| PlaylistError::Io { op, path, source }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    pub name: String,
    pub track_ids: Vec<String>,
}

impl Playlist {
    pub fn contains(&self, id: &str) -> bool {
        self.track_ids.iter().any(|t| t == id)
    }

    fn render(&self) -> String {
        self.track_ids.iter().map(|id| format!("{id}\n")).collect()
    }
}

/// Maps a user-supplied name to a safe file stem.
pub fn sanitize_name(name: &str) -> String {
    let name = name.trim();
    let name = name.strip_suffix(".ytpl").unwrap_or(name);
    name.replace(std::path::MAIN_SEPARATOR, "_")
        .replace('/', "_")
        .replace("..", "__")
}

#[derive(Debug, Clone)]
pub struct PlaylistStore {
    dir: PathBuf,
}

impl PlaylistStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, name: &str, extension: &str) -> Result<PathBuf> {
        let stem = sanitize_name(name);
        if stem.is_empty() {
            return Err(PlaylistError::InvalidName(name.to_string()));
        }
        Ok(self.dir.join(format!("{stem}.{extension}")))
    }

    /// The file a playlist is read from, preferring the current format.
    fn existing_file(&self, name: &str) -> Result<Option<PathBuf>> {
        let current = self.file_for(name, EXTENSION)?;
        if current.is_file() {
            return Ok(Some(current));
        }
        let legacy = self.file_for(name, LEGACY_EXTENSION)?;
        Ok(legacy.is_file().then_some(legacy))
    }

    pub fn exists(&self, name: &str) -> bool {
        matches!(self.existing_file(name), Ok(Some(_)))
    }

    pub fn create(&self, name: &str) -> Result<()> {
        if self.existing_file(name)?.is_some() {
            return Err(PlaylistError::AlreadyExists(name.to_string()));
        }
        self.save(&Playlist {
            name: name.to_string(),
            track_ids: Vec::new(),
        })?;
        info!(playlist = name, "created playlist");
        Ok(())
    }

    /// Removes both the current and the legacy file.
    pub fn delete(&self, name: &str) -> Result<()> {
        let mut removed = false;
        for ext in [EXTENSION, LEGACY_EXTENSION] {
            let path = self.file_for(name, ext)?;
            match std::fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(io_err("remove", &path)(source)),
            }
        }
        if !removed {
            return Err(PlaylistError::NotFound(name.to_string()));
        }
        info!(playlist = name, "deleted playlist");
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Playlist> {
        let path = self
            .existing_file(name)?
            .ok_or_else(|| PlaylistError::NotFound(name.to_string()))?;
        let data = std::fs::read_to_string(&path).map_err(io_err("read", &path))?;

        let track_ids = data
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Playlist {
            name: name.to_string(),
            track_ids,
        })
    }

    /// Writes the playlist in the current format and drops any legacy file.
    pub fn save(&self, playlist: &Playlist) -> Result<()> {
        let path = self.file_for(&playlist.name, EXTENSION)?;
        atomic::write(&path, ".playlist.tmp.", playlist.render().as_bytes())
            .map_err(io_err("write", &path))?;

        let legacy = self.file_for(&playlist.name, LEGACY_EXTENSION)?;
        if legacy.is_file() {
            if let Err(err) = std::fs::remove_file(&legacy) {
                warn!(path = %legacy.display(), error = %err, "failed to remove legacy playlist file");
            }
        }
        debug!(playlist = %playlist.name, tracks = playlist.track_ids.len(), "saved playlist");
        Ok(())
    }

    /// Appends `track_id`, creating the playlist if needed.
    pub fn add(&self, name: &str, track_id: &str) -> Result<()> {
        let mut playlist = match self.load(name) {
            Ok(p) => p,
            Err(PlaylistError::NotFound(_)) => Playlist {
                name: name.to_string(),
                track_ids: Vec::new(),
            },
            Err(err) => return Err(err),
        };
        if playlist.contains(track_id) {
            return Err(PlaylistError::DuplicateTrack {
                playlist: name.to_string(),
                track_id: track_id.to_string(),
            });
        }
        playlist.track_ids.push(track_id.to_string());
        self.save(&playlist)
    }

    pub fn remove(&self, name: &str, track_id: &str) -> Result<()> {
        let mut playlist = self.load(name)?;
        let before = playlist.track_ids.len();
        playlist.track_ids.retain(|id| id != track_id);
        if playlist.track_ids.len() == before {
            return Err(PlaylistError::TrackNotInPlaylist {
                playlist: name.to_string(),
                track_id: track_id.to_string(),
            });
        }
        self.save(&playlist)
    }

    /// Playlist names, sorted, each listed once.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_err("read directory", &self.dir)(source)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err("read directory", &self.dir))?.path();
            if !path.is_file() {
                continue;
            }
            let is_playlist = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == EXTENSION || e == LEGACY_EXTENSION);
            if let (true, Some(stem)) = (is_playlist, path.file_stem()) {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Drops `track_id` from every playlist holding it; returns their names.
    pub fn remove_track_everywhere(&self, track_id: &str) -> Result<Vec<String>> {
        let mut touched = Vec::new();
        for name in self.list()? {
            let mut playlist = match self.load(&name) {
                Ok(p) => p,
                Err(err) => {
                    warn!(playlist = %name, error = %err, "skipping unreadable playlist");
                    continue;
                }
            };
            if !playlist.contains(track_id) {
                continue;
            }
            playlist.track_ids.retain(|id| id != track_id);
            self.save(&playlist)?;
            debug!(playlist = %name, track_id, "removed track from playlist");
            touched.push(name);
        }
        Ok(touched)
    }
}
