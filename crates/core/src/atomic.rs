//! Crash-safe file replacement.
//!
//! Contents are written to a fresh temporary file in the target's directory,
//! flushed to stable storage and closed; only then is the temporary renamed
//! over the target. Readers observe either the old file or the new one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

/// A fully written temporary file that has not yet replaced its target.
///
/// Dropping it without calling [`StagedFile::commit`] deletes the temporary
/// and leaves the target untouched.
#[derive(Debug)]
pub struct StagedFile {
    temp: TempPath,
    target: PathBuf,
}

impl StagedFile {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn commit(self) -> io::Result<()> {
        self.temp.persist(&self.target).map_err(|err| err.error)
    }
}

/// Writes `data` into a temporary sibling of `target` (prefix `prefix`),
/// syncs and closes it. The parent directory is created if missing.
pub fn stage(target: &Path, prefix: &str, data: &[u8]) -> io::Result<StagedFile> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;

    Ok(StagedFile {
        temp: file.into_temp_path(),
        target: target.to_path_buf(),
    })
}

pub fn write(target: &Path, prefix: &str, data: &[u8]) -> io::Result<()> {
    stage(target, prefix, data)?.commit()
}
