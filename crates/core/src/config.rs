use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "ytpl";

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub download_dir: PathBuf,
    pub playlist_dir: PathBuf,
    pub state_path: PathBuf,
    pub player_path: String,
    pub player_ipc_socket_path: PathBuf,
    pub default_volume: u8,
    pub rescan_concurrency: usize,
    pub log_level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME);
        let state = dirs::state_dir()
            .map(|d| d.join(APP_NAME))
            .unwrap_or_else(|| data.clone());
        let socket = match dirs::runtime_dir() {
            Some(runtime) => runtime.join(APP_NAME).join("mpv-socket"),
            None => std::env::temp_dir().join(format!("{APP_NAME}-mpv-socket")),
        };

        Self {
            schema_version: default_schema_version(),
            download_dir: data.join("stock"),
            playlist_dir: data.join("playlists"),
            state_path: state.join("state.json"),
            player_path: "mpv".to_string(),
            player_ipc_socket_path: socket,
            default_volume: 80,
            rescan_concurrency: 10,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Path of the track registry document inside the download directory.
    pub fn tracks_path(&self) -> PathBuf {
        self.download_dir.join(".tracks")
    }

    /// Expected audio file for a track id.
    pub fn track_file(&self, id: &str) -> PathBuf {
        self.download_dir.join(format!("{id}.mp3"))
    }

    pub fn info_file(&self, id: &str) -> PathBuf {
        self.download_dir.join(format!("{id}.info.json"))
    }

    /// Expands `$VAR`/`${VAR}` in path fields and clamps numeric settings
    /// into their valid ranges.
    pub fn normalize(&mut self) {
        self.download_dir = expand_path(&self.download_dir);
        self.playlist_dir = expand_path(&self.playlist_dir);
        self.state_path = expand_path(&self.state_path);
        self.player_ipc_socket_path = expand_path(&self.player_ipc_socket_path);
        self.player_path = expand_env(&self.player_path);
        self.log_file = self.log_file.as_deref().map(expand_path);

        self.default_volume = self.default_volume.min(100);
        self.rescan_concurrency = self.rescan_concurrency.max(1);
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env(&path.to_string_lossy()))
}

/// Replaces `$NAME` and `${NAME}` with the value of the environment variable.
/// Unset variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }

        let name: String = if chars.peek() == Some(&'{') {
            chars.next();
            let mut name = String::new();
            for n in chars.by_ref() {
                if n == '}' {
                    break;
                }
                name.push(n);
            }
            name
        } else {
            let mut name = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    name.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            name
        };

        if name.is_empty() {
            out.push('$');
        } else if let Some(value) = lookup(&name) {
            out.push_str(&value);
        }
    }

    out
}
