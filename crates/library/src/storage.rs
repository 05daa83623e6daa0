use crate::error::{LibraryError, Result};
use std::io::ErrorKind;
use std::path::Path;
use ytpl_core::atomic::{self, StagedFile};
use ytpl_core::TrackInfo;

const TEMP_PREFIX: &str = ".tracks.tmp.";

/// Reads the registry document. A missing or empty file is an empty registry.
pub(crate) fn read_tracks(path: &Path) -> Result<Vec<TrackInfo>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(LibraryError::io("read", path)(err)),
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&data).map_err(|source| LibraryError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Serializes and stages the snapshot next to `path` without replacing it.
pub(crate) fn stage_tracks(path: &Path, tracks: &[TrackInfo]) -> Result<StagedFile> {
    let data = serde_json::to_vec_pretty(tracks)?;
    atomic::stage(path, TEMP_PREFIX, &data).map_err(LibraryError::io("stage", path))
}

pub(crate) fn write_tracks(path: &Path, tracks: &[TrackInfo]) -> Result<()> {
    stage_tracks(path, tracks)?
        .commit()
        .map_err(LibraryError::io("replace", path))
}
