use crate::{Commands, ListAction};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use ytpl_core::{format_duration, AppConfig, TrackInfo};
use ytpl_library::{rescan, TrackRegistry};
use ytpl_player::{
    Advance, Direction, Player, PlayerConfig, PlayerError, ProcessPhase, Queued, StateStore,
    TrackLookup,
};
use ytpl_playlist::{PlaylistError, PlaylistStore};

/// Playlist name recorded while the whole library plays shuffled.
pub const GLOBAL_SHUFFLE: &str = "all songs (shuffled)";

/// Registry-backed id resolution for the player.
struct Library<'a> {
    cfg: &'a AppConfig,
    registry: &'a TrackRegistry,
}

impl TrackLookup for Library<'_> {
    fn title(&self, id: &str) -> Option<String> {
        self.registry.get(id).map(|t| t.title)
    }

    fn file(&self, id: &str) -> PathBuf {
        self.cfg.track_file(id)
    }
}

pub struct App {
    cfg: AppConfig,
    registry: Arc<TrackRegistry>,
    playlists: PlaylistStore,
    player: Player,
}

impl App {
    pub fn open(cfg: AppConfig) -> Result<Self> {
        let registry = TrackRegistry::open(cfg.tracks_path())
            .with_context(|| format!("failed to load track list {}", cfg.tracks_path().display()))?;
        let store = StateStore::load(&cfg.state_path, &cfg.player_ipc_socket_path)
            .with_context(|| format!("failed to load player state {}", cfg.state_path.display()))?;
        let player = Player::new(PlayerConfig::from_app_config(&cfg), store);
        debug!(tracks = registry.len(), pid = player.state().pid, "loaded library and player state");

        Ok(Self {
            playlists: PlaylistStore::new(&cfg.playlist_dir),
            registry: Arc::new(registry),
            player,
            cfg,
        })
    }

    pub async fn run(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Play { query } => self.play(&query).await,
            Commands::Pause => {
                let res = self.player.pause().await;
                quiet(res.map(|()| println!("Paused.")))
            }
            Commands::Resume => {
                let res = self.player.resume().await;
                quiet(res.map(|()| println!("Resumed.")))
            }
            Commands::Stop => self.stop().await,
            Commands::Vol { level } => self.volume(level).await,
            Commands::Status => self.status().await,
            Commands::Next => self.step(Direction::Next).await,
            Commands::Prev => self.step(Direction::Prev).await,
            Commands::Shuffle => self.shuffle_all().await,
            Commands::Rebuild => self.rebuild().await,
            Commands::Tracks { query } => {
                self.tracks(query.as_deref());
                Ok(())
            }
            Commands::Edit { id, title } => self.edit(&id, &title),
            Commands::Del { id } => self.delete(&id),
            Commands::List { action } => self.playlist(action).await,
            Commands::Config { .. } => Ok(()),
        }
    }

    /// Stops a player left running by an interrupted command.
    pub async fn shutdown(&mut self) {
        if !self.player.state().is_running() {
            return;
        }
        if let Err(err) = self.player.stop().await {
            warn!(error = %err, "failed to stop player during shutdown");
        }
    }

    fn queued(&self, track: &TrackInfo) -> Queued {
        Queued {
            id: track.id.clone(),
            title: track.title.clone(),
            path: self.cfg.track_file(&track.id),
        }
    }

    async fn play(&mut self, query: &str) -> Result<()> {
        let matches = find_matches(&self.registry, query);
        let track = match matches.as_slice() {
            [] => {
                println!("No track matches '{query}'.");
                return Ok(());
            }
            [track] => track,
            many => {
                println!("{} tracks match '{query}'; pick one by id:", many.len());
                for t in many {
                    print_track(t);
                }
                return Ok(());
            }
        };

        let queued = self.queued(track);
        if !queued.path.exists() {
            println!(
                "File for '{}' is missing: {}",
                track.title,
                queued.path.display()
            );
            return Ok(());
        }

        let phase = self.player.start_single(queued).await?;
        println!("Playing: {} - {}", track.title, track.artist());
        report_phase(phase);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.player.state().is_running() {
            println!("Player is not running.");
            return Ok(());
        }
        self.player.stop().await?;
        println!("Stopped.");
        Ok(())
    }

    async fn volume(&mut self, level: i64) -> Result<()> {
        let clamped = level.clamp(0, 100);
        if clamped != level {
            println!("Volume {level} is out of range; using {clamped}.");
        }
        let res = self.player.set_volume(clamped).await;
        quiet(res.map(|()| println!("Volume: {clamped}%")))
    }

    async fn status(&mut self) -> Result<()> {
        if !self.player.state().is_running() {
            println!("Player is not running.");
            return Ok(());
        }
        let lookup = Library {
            cfg: &self.cfg,
            registry: &self.registry,
        };
        let status = match self.player.status(&lookup).await {
            Ok(status) => status,
            Err(err) => return quiet(Err(err)),
        };

        if status.track_id.is_empty() {
            println!("Nothing loaded.");
            return Ok(());
        }
        let artist = self
            .registry
            .get(&status.track_id)
            .map(|t| t.artist().to_string());

        println!("Now playing: {} [{}]", status.title, status.track_id);
        if let Some(artist) = artist {
            println!("Artist: {artist}");
        }
        println!("State: {}", if status.is_playing { "playing" } else { "paused" });
        if let Some(position) = status.position {
            let total = status
                .duration
                .map(format_duration)
                .unwrap_or_else(|| "?".to_string());
            println!("Time: {} / {}", format_duration(position), total);
        }
        if let Some(volume) = status.volume {
            println!("Volume: {}%", volume.round());
        }
        if let Some(playlist) = status.playlist {
            match status.index {
                i if i >= 0 => println!("Playlist: {playlist} (track {})", i + 1),
                _ => println!("Playlist: {playlist}"),
            }
        }
        Ok(())
    }

    async fn step(&mut self, direction: Direction) -> Result<()> {
        let lookup = Library {
            cfg: &self.cfg,
            registry: &self.registry,
        };
        let advance = match self.player.step(direction, &lookup).await {
            Ok(advance) => advance,
            Err(err) => return quiet(Err(err)),
        };

        match advance {
            Advance::Playlist => println!(
                "Skipped to {} track.",
                if direction == Direction::Next { "next" } else { "previous" }
            ),
            Advance::Loaded { .. } => {
                println!("Now playing: {}", self.player.state().current_track_title)
            }
            Advance::EndOfQueue => println!("End of shuffle queue; player stopped."),
            Advance::StartOfQueue => println!("Already at the first track."),
            Advance::MissingFile { id } => println!("File for track '{id}' is missing; not skipping."),
            Advance::NoQueue => println!("Not playing a playlist or shuffle queue."),
        }
        Ok(())
    }

    async fn shuffle_all(&mut self) -> Result<()> {
        let mut tracks: Vec<Queued> = self
            .registry
            .list()
            .iter()
            .map(|t| self.queued(t))
            .filter(|q| q.path.exists())
            .collect();
        if tracks.is_empty() {
            println!("No playable tracks. Try `ytpl rebuild`.");
            return Ok(());
        }
        tracks.shuffle(&mut rand::thread_rng());

        let phase = self.player.start_playlist(GLOBAL_SHUFFLE, &tracks, 0).await?;
        let ids: Vec<String> = tracks.iter().map(|t| t.id.clone()).collect();
        self.player.update(|s| s.shuffle_queue = ids)?;

        println!("Shuffling {} tracks. Playing: {}", tracks.len(), tracks[0].title);
        report_phase(phase);
        Ok(())
    }

    async fn rebuild(&mut self) -> Result<()> {
        let report = rescan(
            Arc::clone(&self.registry),
            &self.cfg.download_dir,
            self.cfg.rescan_concurrency,
        )
        .await
        .with_context(|| format!("failed to rebuild from {}", self.cfg.download_dir.display()))?;

        println!(
            "Rebuilt track list: {} added, {} skipped.",
            report.added, report.skipped
        );
        Ok(())
    }

    fn tracks(&self, query: Option<&str>) {
        let tracks = match query {
            Some(q) => find_matches(&self.registry, q),
            None => self.registry.list(),
        };
        if tracks.is_empty() {
            println!("No tracks.");
            return;
        }
        for t in &tracks {
            print_track(t);
        }
        println!("{} track(s)", tracks.len());
    }

    fn edit(&mut self, id: &str, title: &str) -> Result<()> {
        if !self.registry.update_title(id, title)? {
            println!("Track '{id}' not found.");
            return Ok(());
        }
        if self.player.state().current_track_id == id {
            self.player.update(|s| s.current_track_title = title.to_string())?;
        }
        info!(track_id = id, title, "renamed track");
        println!("Renamed '{id}' to '{title}'.");
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let Some(track) = self.registry.get(id) else {
            println!("Track '{id}' not found.");
            return Ok(());
        };

        self.registry.remove(id)?;
        let touched = self.playlists.remove_track_everywhere(id)?;

        let files = [
            self.cfg.track_file(id),
            self.cfg.info_file(id),
            self.cfg.download_dir.join(format!("{id}.jpg")),
        ];
        for path in files {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted file"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), error = %err, "failed to delete file"),
            }
        }

        println!(
            "Deleted '{}' (removed from {} playlist(s)).",
            track.title,
            touched.len()
        );
        Ok(())
    }

    async fn playlist(&mut self, action: Option<ListAction>) -> Result<()> {
        let Some(action) = action else {
            let names = self.playlists.list()?;
            if names.is_empty() {
                println!("No playlists.");
            }
            for name in names {
                println!("{name}");
            }
            return Ok(());
        };

        match action {
            ListAction::Create { name } => {
                let res = self.playlists.create(&name);
                user_facing(res.map(|()| println!("Created playlist '{name}'.")))
            }
            ListAction::Delete { name } => {
                let res = self.playlists.delete(&name);
                user_facing(res.map(|()| println!("Deleted playlist '{name}'.")))
            }
            ListAction::Add { name, id } => {
                let id = match id {
                    Some(id) => id,
                    None if !self.player.state().current_track_id.is_empty() => {
                        self.player.state().current_track_id.clone()
                    }
                    None => {
                        println!("Nothing is playing; give a track id.");
                        return Ok(());
                    }
                };
                let Some(track) = self.registry.get(&id) else {
                    println!("Track '{id}' not found.");
                    return Ok(());
                };
                if !self.playlists.exists(&name) {
                    println!("Creating playlist '{name}'.");
                }
                let res = self.playlists.add(&name, &id);
                user_facing(res.map(|()| println!("Added '{}' to '{name}'.", track.title)))
            }
            ListAction::Remove { name, id } => {
                let res = self.playlists.remove(&name, &id);
                user_facing(res.map(|()| println!("Removed '{id}' from '{name}'.")))
            }
            ListAction::Show { name } => {
                let playlist = match self.playlists.load(&name) {
                    Ok(p) => p,
                    Err(err) => return user_facing(Err(err)),
                };
                if playlist.track_ids.is_empty() {
                    println!("Playlist '{name}' is empty.");
                }
                for (i, id) in playlist.track_ids.iter().enumerate() {
                    match self.registry.get(id) {
                        Some(t) => println!(
                            "{:>3}. {} - {} ({})",
                            i + 1,
                            t.title,
                            t.artist(),
                            format_duration(t.duration)
                        ),
                        None => println!("{:>3}. {id} (not in library)", i + 1),
                    }
                }
                Ok(())
            }
            ListAction::Play { name, from } => {
                let start = from.unwrap_or(1).saturating_sub(1);
                self.play_playlist(&name, start, false).await
            }
            ListAction::Shuffle { name } => self.play_playlist(&name, 0, true).await,
        }
    }

    async fn play_playlist(&mut self, name: &str, start: usize, shuffle: bool) -> Result<()> {
        let playlist = match self.playlists.load(name) {
            Ok(p) => p,
            Err(err) => return user_facing(Err(err)),
        };

        let mut entries: Vec<(usize, Queued)> = Vec::new();
        for (i, id) in playlist.track_ids.iter().enumerate() {
            let Some(track) = self.registry.get(id) else {
                warn!(playlist = name, track_id = %id, "track not in library; skipping");
                continue;
            };
            let queued = self.queued(&track);
            if queued.path.exists() {
                entries.push((i, queued));
            } else {
                warn!(playlist = name, track_id = %id, "track file missing; skipping");
            }
        }
        if entries.is_empty() {
            println!("Playlist '{name}' has no playable tracks.");
            return Ok(());
        }

        let start_index = if shuffle {
            entries.shuffle(&mut rand::thread_rng());
            0
        } else {
            entries.iter().position(|(i, _)| *i >= start).unwrap_or(0)
        };
        let tracks: Vec<Queued> = entries.into_iter().map(|(_, q)| q).collect();

        let phase = self.player.start_playlist(name, &tracks, start_index).await?;
        println!(
            "Playing playlist '{name}' ({} tracks): {}",
            tracks.len(),
            tracks[start_index].title
        );
        report_phase(phase);
        Ok(())
    }
}

/// Exact id first, then case-insensitive substring of title or id.
fn find_matches(registry: &TrackRegistry, query: &str) -> Vec<TrackInfo> {
    if let Some(track) = registry.get(query) {
        return vec![track];
    }
    let needle = query.to_lowercase();
    registry
        .list()
        .into_iter()
        .filter(|t| t.title.to_lowercase().contains(&needle) || t.id.to_lowercase().contains(&needle))
        .collect()
}

fn print_track(track: &TrackInfo) {
    println!(
        "{:<12} {:>8}  {} - {}",
        track.id,
        format_duration(track.duration),
        track.title,
        track.artist()
    );
}

fn report_phase(phase: ProcessPhase) {
    if phase == ProcessPhase::Starting {
        println!("(player is still starting up)");
    }
}

/// Turns "player not running" into a message and exit 0.
fn quiet(res: std::result::Result<(), PlayerError>) -> Result<()> {
    match res {
        Err(err) if err.is_not_running() => {
            println!("Player is not running.");
            Ok(())
        }
        Err(PlayerError::Command { command, error }) => {
            println!("Player refused '{command}': {error}");
            Ok(())
        }
        other => Ok(other?),
    }
}

/// Prints playlist mistakes the user can fix; other errors propagate.
fn user_facing(res: std::result::Result<(), PlaylistError>) -> Result<()> {
    match res {
        Err(err @ PlaylistError::Io { .. }) => Err(err.into()),
        Err(err) => {
            println!("{err}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}
