mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::App;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use ytpl_core::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "ytpl",
    version,
    about = "Play locally stocked tracks through mpv"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a track by id or by part of its title
    Play { query: String },
    Pause,
    Resume,
    Stop,
    /// Set the volume (0-100)
    Vol {
        #[arg(allow_negative_numbers = true)]
        level: i64,
    },
    Status,
    Next,
    Prev,
    /// Play every track in random order
    Shuffle,
    /// Rebuild the track list from the download directory
    Rebuild,
    /// List tracks, optionally filtered
    Tracks { query: Option<String> },
    /// Rename a track
    Edit { id: String, title: String },
    /// Delete a track, its files and its playlist entries
    Del { id: String },
    /// Manage playlists; lists them when no action is given
    List {
        #[command(subcommand)]
        action: Option<ListAction>,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ListAction {
    Create {
        name: String,
    },
    Delete {
        name: String,
    },
    /// Add a track; defaults to the one playing now
    Add {
        name: String,
        id: Option<String>,
    },
    Remove {
        name: String,
        id: String,
    },
    Show {
        name: String,
    },
    Play {
        name: String,
        /// 1-based position to start from
        #[arg(long)]
        from: Option<usize>,
    },
    Shuffle {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    if let Commands::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        init_config(&cfg_path)?;
        println!("Initialized config at {}", cfg_path.display());
        return Ok(());
    }

    let cfg = load_or_default(&cfg_path)?;
    init_logging(&cfg.log_level, cfg.log_file.as_deref())?;

    let mut app = App::open(cfg)?;
    let finished = tokio::select! {
        res = app.run(cli.command) => Some(res),
        _ = shutdown_signal() => None,
    };

    match finished {
        Some(res) => res,
        None => {
            info!("received shutdown signal");
            app.shutdown().await;
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("ytpl").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg);
    cfg.normalize();
    Ok(cfg)
}

/// Logs go to stderr, or to `log_file` when set, so stdout stays clean.
fn init_logging(log_level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create log directory {}", parent.display())
                })?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
    Ok(())
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("YTPL_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Ok(v) = std::env::var("YTPL_DOWNLOAD_DIR") {
        if !v.trim().is_empty() {
            cfg.download_dir = PathBuf::from(v);
        }
    }
    if let Ok(v) = std::env::var("YTPL_PLAYER_PATH") {
        if !v.trim().is_empty() {
            cfg.player_path = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{init_config, load_or_default, Cli, Commands, ListAction};
    use clap::Parser;

    #[test]
    fn parses_negative_volume() {
        let cli = Cli::try_parse_from(["ytpl", "vol", "-5"]).unwrap();
        assert!(matches!(cli.command, Commands::Vol { level: -5 }));
    }

    #[test]
    fn parses_playlist_actions() {
        let cli =
            Cli::try_parse_from(["ytpl", "list", "play", "road trip", "--from", "3"]).unwrap();
        match cli.command {
            Commands::List {
                action: Some(ListAction::Play { name, from }),
            } => {
                assert_eq!(name, "road trip");
                assert_eq!(from, Some(3));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["ytpl", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List { action: None }));
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.default_volume, 80);
        assert_eq!(cfg.rescan_concurrency, 10);
    }

    #[test]
    fn partial_config_is_filled_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_volume = 250\nrescan_concurrency = 0\n").unwrap();

        let cfg = load_or_default(&path).unwrap();
        assert_eq!(cfg.default_volume, 100);
        assert_eq!(cfg.rescan_concurrency, 1);
        assert!(cfg.tracks_path().ends_with(".tracks"));
    }

    #[test]
    fn malformed_config_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_volume = [").unwrap();

        let err = load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn init_writes_a_loadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path).unwrap();
        assert!(load_or_default(&path).is_ok());
    }
}
