use crate::error::Result;
use crate::storage;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};
use ytpl_core::TrackInfo;

/// In-memory track collection persisted as one JSON array.
///
/// The lock only guards the in-memory vector. Every save copies a snapshot
/// under a read lock and performs file I/O after releasing it.
#[derive(Debug)]
pub struct TrackRegistry {
    path: PathBuf,
    tracks: RwLock<Vec<TrackInfo>>,
    batch: AtomicBool,
    writes: AtomicU64,
}

impl TrackRegistry {
    /// An empty registry bound to `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tracks: RwLock::new(Vec::new()),
            batch: AtomicBool::new(false),
            writes: AtomicU64::new(0),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let registry = Self::new(path);
        registry.load()?;
        Ok(registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory collection with the file contents.
    pub fn load(&self) -> Result<()> {
        let loaded = storage::read_tracks(&self.path)?;
        info!(path = %self.path.display(), count = loaded.len(), "loaded track registry");
        *self.tracks.write() = loaded;
        Ok(())
    }

    /// Inserts or replaces the record with the same id, keeps the collection
    /// ordered by title and saves unless batch mode is active.
    ///
    /// A failed save leaves the in-memory change applied.
    pub fn upsert(&self, track: TrackInfo) -> Result<()> {
        {
            let mut tracks = self.tracks.write();
            match tracks.iter_mut().find(|t| t.id == track.id) {
                Some(existing) => {
                    debug!(track_id = %track.id, "replacing track");
                    *existing = track;
                }
                None => {
                    debug!(track_id = %track.id, "adding track");
                    tracks.push(track);
                }
            }
            sort_by_title(&mut tracks);
        }
        self.save_unless_batched()
    }

    pub fn get(&self, id: &str) -> Option<TrackInfo> {
        self.tracks.read().iter().find(|t| t.id == id).cloned()
    }

    /// Owned copy of every record, ordered by title.
    pub fn list(&self) -> Vec<TrackInfo> {
        self.tracks.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    /// Deletes the record if present. Absence is not an error; the return
    /// value tells whether anything was removed.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut tracks = self.tracks.write();
            let before = tracks.len();
            tracks.retain(|t| t.id != id);
            tracks.len() != before
        };

        if !removed {
            debug!(track_id = %id, "remove: no such track");
            return Ok(false);
        }
        self.save_unless_batched()?;
        Ok(true)
    }

    /// Renames a track. Returns `false` when no record has that id.
    pub fn update_title(&self, id: &str, title: &str) -> Result<bool> {
        let found = {
            let mut tracks = self.tracks.write();
            let found = match tracks.iter_mut().find(|t| t.id == id) {
                Some(track) => {
                    track.title = title.to_string();
                    true
                }
                None => false,
            };
            if found {
                sort_by_title(&mut tracks);
            }
            found
        };

        if found {
            self.save_unless_batched()?;
        }
        Ok(found)
    }

    /// Empties the in-memory collection. The file is untouched until the next save.
    pub fn clear(&self) {
        self.tracks.write().clear();
    }

    pub fn set_batch_mode(&self, enabled: bool) {
        self.batch.store(enabled, Ordering::SeqCst);
    }

    pub fn batch_mode(&self) -> bool {
        self.batch.load(Ordering::SeqCst)
    }

    /// Enables batch mode until the returned guard is dropped.
    pub fn batch(&self) -> BatchGuard<'_> {
        self.set_batch_mode(true);
        BatchGuard { registry: self }
    }

    /// Durably writes the current collection, regardless of batch mode.
    pub fn save_all(&self) -> Result<()> {
        let snapshot = self.list();
        storage::write_tracks(&self.path, &snapshot).inspect_err(|err| {
            warn!(path = %self.path.display(), error = %err, "failed to save track registry");
        })?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        info!(path = %self.path.display(), count = snapshot.len(), "saved track registry");
        Ok(())
    }

    /// Writes the current snapshot to a temporary sibling without replacing
    /// the registry file; committing the result completes the save.
    #[cfg(test)]
    pub(crate) fn stage_save(&self) -> Result<ytpl_core::atomic::StagedFile> {
        let snapshot = self.list();
        storage::stage_tracks(&self.path, &snapshot)
    }

    /// Number of completed registry file writes by this instance.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn save_unless_batched(&self) -> Result<()> {
        if self.batch_mode() {
            return Ok(());
        }
        self.save_all()
    }
}

/// Restores non-batched saves on drop.
#[must_use = "batch mode ends when the guard is dropped"]
pub struct BatchGuard<'a> {
    registry: &'a TrackRegistry,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.registry.set_batch_mode(false);
    }
}

fn sort_by_title(tracks: &mut [TrackInfo]) {
    tracks.sort_by(|a, b| a.title.cmp(&b.title));
}

#[cfg(test)]
mod tests {
    use super::TrackRegistry;
    use std::sync::Arc;
    use ytpl_core::TrackInfo;

    fn registry() -> (tempfile::TempDir, TrackRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = TrackRegistry::open(dir.path().join(".tracks")).expect("open");
        (dir, registry)
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_dir, registry) = registry();
        assert!(registry.is_empty());
        assert_eq!(registry.write_count(), 0);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(".tracks");
        std::fs::write(&path, "[{\"id\": ").unwrap();

        let err = TrackRegistry::open(&path).expect_err("malformed registry");
        assert!(err.to_string().contains(".tracks"));
    }

    #[test]
    fn upsert_replaces_same_id() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "original title", 10.0)).unwrap();
        registry.upsert(TrackInfo::new("2", "other", 10.0)).unwrap();
        let size = registry.len();

        registry.upsert(TrackInfo::new("1", "updated title", 10.0)).unwrap();

        assert_eq!(registry.len(), size);
        let matching: Vec<_> = registry.list().into_iter().filter(|t| t.id == "1").collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0].title, "updated title");
    }

    #[test]
    fn list_stays_sorted_by_title() {
        let (_dir, registry) = registry();
        for (id, title) in [("1", "b track"), ("2", "a track"), ("3", "B track"), ("4", "c")] {
            registry.upsert(TrackInfo::new(id, title, 1.0)).unwrap();
        }
        registry.upsert(TrackInfo::new("4", "A", 1.0)).unwrap();

        let titles: Vec<_> = registry.list().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["A", "B track", "a track", "b track"]);
    }

    #[test]
    fn two_upserts_list_in_title_order() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("abc", "Song B", 200.0)).unwrap();
        registry.upsert(TrackInfo::new("xyz", "Song A", 150.0)).unwrap();

        let listed = registry.list();
        assert_eq!(
            listed,
            vec![
                TrackInfo::new("xyz", "Song A", 150.0),
                TrackInfo::new("abc", "Song B", 200.0),
            ]
        );
    }

    #[test]
    fn list_is_a_detached_copy() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "one", 1.0)).unwrap();
        let listed = registry.list();

        registry.upsert(TrackInfo::new("2", "two", 1.0)).unwrap();
        registry.remove("1").unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "1");
    }

    #[test]
    fn remove_missing_is_a_no_op() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "one", 1.0)).unwrap();
        let writes = registry.write_count();

        assert!(!registry.remove("not-present").unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.write_count(), writes);

        assert!(registry.remove("1").unwrap());
        assert!(registry.get("1").is_none());
    }

    #[test]
    fn get_reports_absence() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "one", 1.0)).unwrap();
        assert_eq!(registry.get("1").map(|t| t.title), Some("one".to_string()));
        assert!(registry.get("2").is_none());
    }

    #[test]
    fn round_trip_through_fresh_instance() {
        let (dir, registry) = registry();
        let mut rich = TrackInfo::new("jp", "夜に駆ける", 0.0);
        rich.uploader = Some("YOASOBI".to_string());
        rich.release_year = Some(2019);
        rich.view_count = Some(1_000_000);
        rich.upload_date = Some("20191215".to_string());

        registry.set_batch_mode(true);
        registry.upsert(rich).unwrap();
        registry.upsert(TrackInfo::new("zero", "Zero length", 0.0)).unwrap();
        registry.upsert(TrackInfo::new("emoji", "🎵 tune", 42.5)).unwrap();
        registry.save_all().unwrap();

        let reopened = TrackRegistry::open(dir.path().join(".tracks")).unwrap();
        assert_eq!(reopened.list(), registry.list());
    }

    #[test]
    fn interrupted_save_keeps_previous_file() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "kept", 1.0)).unwrap();
        let before = std::fs::read(registry.path()).unwrap();

        registry.clear();
        registry.set_batch_mode(true);
        registry.upsert(TrackInfo::new("2", "never committed", 1.0)).unwrap();

        let staged = registry.stage_save().unwrap();
        assert_ne!(staged.temp_path(), registry.path());
        assert_eq!(std::fs::read(registry.path()).unwrap(), before);
        drop(staged);

        assert_eq!(std::fs::read(registry.path()).unwrap(), before);
        let reopened = TrackRegistry::open(registry.path()).unwrap();
        assert_eq!(reopened.list(), vec![TrackInfo::new("1", "kept", 1.0)]);
    }

    #[test]
    fn batch_mode_coalesces_writes() {
        let batched_dir = tempfile::tempdir().unwrap();
        let batched = TrackRegistry::open(batched_dir.path().join(".tracks")).unwrap();
        let single_dir = tempfile::tempdir().unwrap();
        let single = TrackRegistry::open(single_dir.path().join(".tracks")).unwrap();

        let tracks: Vec<_> = (0..25)
            .map(|i| TrackInfo::new(format!("id{i}"), format!("title {:02}", 25 - i), i as f64))
            .collect();

        {
            let _batch = batched.batch();
            for t in &tracks {
                batched.upsert(t.clone()).unwrap();
            }
            assert_eq!(batched.write_count(), 0);
            batched.save_all().unwrap();
        }
        assert!(!batched.batch_mode());

        for t in &tracks {
            single.upsert(t.clone()).unwrap();
        }

        assert_eq!(batched.write_count(), 1);
        assert_eq!(single.write_count(), tracks.len() as u64);
        assert_eq!(
            std::fs::read(batched.path()).unwrap(),
            std::fs::read(single.path()).unwrap()
        );
    }

    #[test]
    fn clear_does_not_touch_file() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "one", 1.0)).unwrap();
        registry.clear();
        assert!(registry.is_empty());

        let reopened = TrackRegistry::open(registry.path()).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn update_title_resorts_and_reports_absence() {
        let (_dir, registry) = registry();
        registry.upsert(TrackInfo::new("1", "a", 1.0)).unwrap();
        registry.upsert(TrackInfo::new("2", "b", 1.0)).unwrap();

        assert!(registry.update_title("1", "c").unwrap());
        assert!(!registry.update_title("missing", "x").unwrap());

        let ids: Vec<_> = registry.list().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[test]
    fn failed_save_keeps_in_memory_change() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let registry = TrackRegistry::new(blocker.join(".tracks"));

        assert!(registry.upsert(TrackInfo::new("1", "one", 1.0)).is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.write_count(), 0);
    }

    #[test]
    fn concurrent_upserts_are_linearized() {
        let (_dir, registry) = registry();
        let registry = Arc::new(registry);
        let _batch = registry.batch();

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let id = format!("t{}", i % 20);
                        registry
                            .upsert(TrackInfo::new(id, format!("w{worker} #{i}"), 1.0))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(registry.len(), 20);
        let titles: Vec<_> = registry.list().into_iter().map(|t| t.title).collect();
        let mut sorted = titles.clone();
        sorted.sort();
        assert_eq!(titles, sorted);
    }
}
