//! Client side of mpv's JSON IPC: one request per connection, one
//! newline-terminated JSON object each way.

use crate::error::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, trace};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

const SUCCESS: &str = "success";

#[derive(Debug, Clone, Serialize)]
pub struct IpcRequest {
    pub command: Vec<Value>,
}

impl IpcRequest {
    pub fn new(command: Vec<Value>) -> Self {
        Self { command }
    }

    pub fn get_property(name: &str) -> Self {
        Self::new(vec!["get_property".into(), name.into()])
    }

    pub fn set_property(name: &str, value: impl Into<Value>) -> Self {
        Self::new(vec!["set_property".into(), name.into(), value.into()])
    }

    pub fn loadfile(path: &Path, mode: &str) -> Self {
        Self::new(vec![
            "loadfile".into(),
            path.to_string_lossy().into_owned().into(),
            mode.into(),
        ])
    }

    pub fn playlist_next() -> Self {
        Self::new(vec!["playlist-next".into()])
    }

    pub fn playlist_prev() -> Self {
        Self::new(vec!["playlist-prev".into()])
    }

    pub fn quit() -> Self {
        Self::new(vec!["quit".into()])
    }

    /// Space-joined command for messages, e.g. `get_property path`.
    pub fn describe(&self) -> String {
        self.command
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)
            .map_err(|err| PlayerError::Protocol(format!("failed to encode request: {err}")))?;
        line.push(b'\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IpcResponse {
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

/// Connects to `socket`, sends `request` and returns the response payload.
///
/// Failing to connect maps to [`PlayerError::Unreachable`]. Asynchronous
/// event lines the player may interleave are skipped.
pub async fn send(socket: &Path, request: &IpcRequest) -> Result<Value> {
    let unreachable_err = |source: std::io::Error| PlayerError::Unreachable {
        socket: socket.to_path_buf(),
        source,
    };

    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket))
        .await
        .map_err(|_| unreachable_err(std::io::ErrorKind::TimedOut.into()))?
        .map_err(unreachable_err)?;

    let payload = request.encode()?;
    stream
        .write_all(&payload)
        .await
        .map_err(|err| PlayerError::Protocol(format!("failed to send request: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| PlayerError::Protocol(format!("failed to send request: {err}")))?;
    debug!(command = %request.describe(), "sent ipc request");

    let response = tokio::time::timeout(RESPONSE_TIMEOUT, read_response(stream))
        .await
        .map_err(|_| PlayerError::Protocol("timed out waiting for response".to_string()))??;

    if response.error != SUCCESS {
        return Err(PlayerError::Command {
            command: request.describe(),
            error: response.error.to_lowercase(),
        });
    }
    Ok(response.data)
}

async fn read_response(stream: UnixStream) -> Result<IpcResponse> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|err| PlayerError::Protocol(format!("failed to read response: {err}")))?;
        if n == 0 {
            return Err(PlayerError::Protocol(
                "connection closed before response".to_string(),
            ));
        }

        let value: Value = serde_json::from_str(line.trim())
            .map_err(|err| PlayerError::Protocol(format!("malformed response: {err}")))?;
        if value.get("event").is_some() {
            trace!(event = %value, "skipping player event");
            continue;
        }
        return serde_json::from_value(value)
            .map_err(|err| PlayerError::Protocol(format!("malformed response: {err}")));
    }
}

/// Best-effort reachability check used after spawning a player.
pub async fn probe(socket: &Path, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, UnixStream::connect(socket)).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
pub(crate) mod fake {
    //! A scripted stand-in for the media player's IPC endpoint.

    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;
    use tokio::task::JoinHandle;

    pub type Log = Arc<Mutex<Vec<Vec<Value>>>>;

    /// Serves every connection with `reply(command)`; records each command.
    pub fn serve(
        socket: &Path,
        reply: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> (Log, JoinHandle<()>) {
        let listener = UnixListener::bind(socket).expect("bind fake player socket");
        let log: Log = Arc::default();
        let seen = Arc::clone(&log);
        let reply = Arc::new(reply);

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let reply = Arc::clone(&reply);
                tokio::spawn(async move {
                    let (read, mut write) = stream.into_split();
                    let mut lines = BufReader::new(read).lines();
                    if let Ok(Some(line)) = lines.next_line().await {
                        let req: Value = serde_json::from_str(&line).expect("request json");
                        let command = req["command"].as_array().cloned().unwrap_or_default();
                        seen.lock().unwrap().push(command.clone());
                        let mut out = reply(&command).to_string();
                        out.push('\n');
                        let _ = write.write_all(out.as_bytes()).await;
                    }
                });
            }
        });
        (log, handle)
    }

    pub fn ok(data: Value) -> Value {
        json!({ "error": "success", "data": data })
    }
}
