//! Rebuilds the registry from the audio files and `.info.json` documents
//! found in the download directory.

use crate::error::{LibraryError, Result};
use crate::registry::TrackRegistry;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use ytpl_core::{atomic, TrackInfo};

/// Fields kept when an info document is slimmed down.
const INFO_FIELDS: [&str; 8] = [
    "id",
    "title",
    "uploader",
    "creator",
    "duration",
    "release_year",
    "upload_date",
    "webpage_url",
];

const AUDIO_EXTENSION: &str = "mp3";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RescanReport {
    pub added: usize,
    pub skipped: usize,
}

impl RescanReport {
    fn merge(&mut self, other: RescanReport) {
        self.added += other.added;
        self.skipped += other.skipped;
    }
}

/// Clears the registry and repopulates it from `download_dir` using
/// `workers` concurrent tasks, then writes the registry once.
pub async fn rescan(
    registry: Arc<TrackRegistry>,
    download_dir: &Path,
    workers: usize,
) -> Result<RescanReport> {
    let files = audio_files(download_dir).await?;
    info!(dir = %download_dir.display(), files = files.len(), workers, "rescanning library");

    let report = {
        let _batch = registry.batch();
        registry.clear();

        let (tx, rx) = mpsc::channel::<PathBuf>(files.len().max(1));
        for file in files {
            // Capacity covers every file, so this never waits.
            if tx.send(file).await.is_err() {
                break;
            }
        }
        drop(tx);

        let queue = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();
        for worker in 0..workers.max(1) {
            pool.spawn(run_worker(worker, Arc::clone(&queue), Arc::clone(&registry)));
        }

        let mut report = RescanReport::default();
        while let Some(joined) = pool.join_next().await {
            report.merge(joined?);
        }
        report
    };

    registry.save_all()?;
    info!(added = report.added, skipped = report.skipped, "rescan complete");
    Ok(report)
}

async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    registry: Arc<TrackRegistry>,
) -> RescanReport {
    let mut report = RescanReport::default();
    loop {
        let next = queue.lock().await.recv().await;
        let Some(audio) = next else { break };

        match ingest(&audio).await {
            Ok(track) => {
                debug!(worker, track_id = %track.id, artist = %track.artist(), "adding track");
                match registry.upsert(track) {
                    Ok(()) => report.added += 1,
                    Err(err) => {
                        warn!(file = %audio.display(), error = %err, "failed to add track");
                        report.skipped += 1;
                    }
                }
            }
            Err(err) => {
                warn!(file = %audio.display(), error = %err, "skipping file");
                report.skipped += 1;
            }
        }
    }
    report
}

async fn audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(LibraryError::io("read directory", dir))?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(LibraryError::io("read directory", dir))?
    {
        let path = entry.path();
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(AUDIO_EXTENSION));
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_audio && is_file {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Slims the info document next to `audio` and parses it.
async fn ingest(audio: &Path) -> Result<TrackInfo> {
    let id = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let info_path = audio.with_file_name(format!("{id}.info.json"));

    let raw = tokio::fs::read(&info_path)
        .await
        .map_err(LibraryError::io("read", &info_path))?;

    let path = info_path.clone();
    let fallback_id = id.clone();
    let optimized = tokio::task::spawn_blocking(move || optimize_info(&path, &raw, &fallback_id))
        .await?;

    let doc = match optimized {
        Ok(doc) => doc,
        Err(err) => {
            warn!(track_id = %id, error = %err, "failed to optimize info file");
            let raw = tokio::fs::read(&info_path)
                .await
                .map_err(LibraryError::io("read", &info_path))?;
            serde_json::from_slice(&raw).map_err(|source| LibraryError::Malformed {
                path: info_path.clone(),
                source,
            })?
        }
    };

    let mut track: TrackInfo =
        serde_json::from_value(doc).map_err(|source| LibraryError::Malformed {
            path: info_path,
            source,
        })?;
    if track.id.is_empty() {
        track.id = id;
    }
    Ok(track)
}

/// Rewrites `path` keeping only [`INFO_FIELDS`] and returns the slimmed document.
/// Running it twice on the same file yields the same result.
pub fn optimize_info(path: &Path, raw: &[u8], id: &str) -> Result<Value> {
    let full: Map<String, Value> =
        serde_json::from_slice(raw).map_err(|source| LibraryError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

    let mut slim: Map<String, Value> = INFO_FIELDS
        .iter()
        .filter_map(|field| full.get(*field).map(|v| (field.to_string(), v.clone())))
        .collect();
    slim.entry("id").or_insert_with(|| Value::String(id.to_string()));

    let doc = Value::Object(slim);
    let data = serde_json::to_vec_pretty(&doc)?;
    atomic::write(path, ".info.tmp.", &data).map_err(LibraryError::io("rewrite", path))?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::{optimize_info, rescan};
    use crate::TrackRegistry;
    use std::path::Path;
    use std::sync::Arc;

    fn stock(dir: &Path, id: &str, info: &str) {
        std::fs::write(dir.join(format!("{id}.mp3")), b"ID3").unwrap();
        std::fs::write(dir.join(format!("{id}.info.json")), info).unwrap();
    }

    #[tokio::test]
    async fn rebuilds_from_download_dir_with_one_write() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..30 {
            stock(
                dir.path(),
                &format!("vid{i:02}"),
                &format!(r#"{{"id":"vid{i:02}","title":"Track {i:02}","duration":{i},"formats":[1,2,3]}}"#),
            );
        }
        std::fs::write(dir.path().join("orphan.mp3"), b"ID3").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"jpg").unwrap();

        let registry = Arc::new(TrackRegistry::new(dir.path().join(".tracks")));
        registry
            .upsert(ytpl_core::TrackInfo::new("stale", "Stale", 1.0))
            .unwrap();
        let writes_before = registry.write_count();

        let report = rescan(Arc::clone(&registry), dir.path(), 4).await.unwrap();

        assert_eq!(report.added, 30);
        assert_eq!(report.skipped, 1);
        assert_eq!(registry.write_count(), writes_before + 1);
        assert!(!registry.batch_mode());
        assert!(registry.get("stale").is_none());

        let listed = registry.list();
        assert_eq!(listed.len(), 30);
        assert_eq!(listed[0].title, "Track 00");

        let reopened = TrackRegistry::open(registry.path()).unwrap();
        assert_eq!(reopened.list(), listed);

        let slim = std::fs::read_to_string(dir.path().join("vid03.info.json")).unwrap();
        assert!(!slim.contains("formats"));
    }

    #[tokio::test]
    async fn live_stream_without_duration_is_added() {
        let dir = tempfile::tempdir().unwrap();
        stock(dir.path(), "live1", r#"{"id":"live1","title":"Live Set","duration":null}"#);

        let registry = Arc::new(TrackRegistry::new(dir.path().join(".tracks")));
        let report = rescan(Arc::clone(&registry), dir.path(), 2).await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(registry.get("live1").unwrap().duration, 0.0);
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TrackRegistry::new(dir.path().join(".tracks")));
        assert!(rescan(registry, &dir.path().join("nope"), 2).await.is_err());
    }

    #[test]
    fn optimize_is_idempotent_and_fills_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.info.json");
        let raw = br#"{"title":"Song","uploader":"Chan","thumbnails":[],"duration":3.5}"#;
        std::fs::write(&path, raw).unwrap();

        let first = optimize_info(&path, raw, "abc").unwrap();
        let rewritten = std::fs::read(&path).unwrap();
        let second = optimize_info(&path, &rewritten, "abc").unwrap();

        assert_eq!(first, second);
        assert_eq!(first["id"], "abc");
        assert!(first.get("thumbnails").is_none());
        assert_eq!(std::fs::read(&path).unwrap(), rewritten);
    }
}
