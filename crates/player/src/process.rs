//! Spawning and signalling the external media player.

use crate::error::{PlayerError, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

/// How a player process is launched.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub socket: PathBuf,
    pub volume: u8,
    pub files: Vec<PathBuf>,
    pub start_index: usize,
}

impl LaunchSpec {
    /// Command-line arguments: IPC endpoint, starting volume, no terminal,
    /// window or video output, idle when the list ends.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--input-ipc-server={}", self.socket.display()),
            "--no-terminal".to_string(),
            format!("--volume={}", self.volume),
            "--idle=yes".to_string(),
            "--force-window=no".to_string(),
            "--no-video".to_string(),
        ];
        if self.files.len() > 1 {
            let start = if self.start_index < self.files.len() {
                self.start_index
            } else {
                0
            };
            args.push(format!("--playlist-start={start}"));
        }
        args.push("--".to_string());
        args.extend(self.files.iter().map(|f| f.to_string_lossy().into_owned()));
        args
    }
}

/// Starts the player in its own process group so it outlives this process.
pub fn spawn(spec: &LaunchSpec) -> Result<u32> {
    let spawn_err = |source: std::io::Error| PlayerError::Spawn {
        player: spec.program.clone(),
        source,
    };

    if let Some(dir) = spec.socket.parent() {
        std::fs::create_dir_all(dir).map_err(spawn_err)?;
    }
    remove_socket(&spec.socket);

    let child = tokio::process::Command::new(&spec.program)
        .args(spec.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(spawn_err)?;

    let pid = child.id().ok_or_else(|| {
        spawn_err(std::io::Error::other("process exited before reporting a pid"))
    })?;
    info!(pid, program = %spec.program, files = spec.files.len(), "started player");
    Ok(pid)
}

/// Whether a process with this id exists.
pub fn is_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Sends SIGTERM.
pub fn terminate(pid: u32) -> Result<()> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| PlayerError::Signal {
        pid,
        source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
    })?;
    // SAFETY: plain kill(2) on a pid we started.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc != 0 {
        return Err(PlayerError::Signal {
            pid,
            source: std::io::Error::last_os_error(),
        });
    }
    debug!(pid, "sent SIGTERM to player");
    Ok(())
}

pub fn remove_socket(socket: &Path) {
    match std::fs::remove_file(socket) {
        Ok(()) => debug!(socket = %socket.display(), "removed ipc socket"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => debug!(socket = %socket.display(), error = %err, "could not remove ipc socket"),
    }
}

#[cfg(test)]
mod tests {
    use super::{is_alive, LaunchSpec};
    use std::path::PathBuf;

    fn spec(files: &[&str], start_index: usize) -> LaunchSpec {
        LaunchSpec {
            program: "mpv".to_string(),
            socket: PathBuf::from("/tmp/ytpl/mpv-socket"),
            volume: 70,
            files: files.iter().map(PathBuf::from).collect(),
            start_index,
        }
    }

    #[test]
    fn single_file_arguments() {
        let args = spec(&["/m/a.mp3"], 0).args();
        assert_eq!(
            args,
            vec![
                "--input-ipc-server=/tmp/ytpl/mpv-socket",
                "--no-terminal",
                "--volume=70",
                "--idle=yes",
                "--force-window=no",
                "--no-video",
                "--",
                "/m/a.mp3",
            ]
        );
    }

    #[test]
    fn playlist_start_is_bounded() {
        let args = spec(&["/m/a.mp3", "/m/b.mp3"], 1).args();
        assert!(args.contains(&"--playlist-start=1".to_string()));

        let args = spec(&["/m/a.mp3", "/m/b.mp3"], 9).args();
        assert!(args.contains(&"--playlist-start=0".to_string()));
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(!is_alive(0));
    }
}
