//! Error taxonomy for the session engine.
//!
//! Launch problems and transport problems propagate as typed errors; a
//! response timeout is not an error (callers get `None` and decide), and a
//! failed refactor patch is surfaced through the editor collaborator.

use std::path::PathBuf;

/// The server process could not be started.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("java executable not found at {}", .0.display())]
    JavaNotFound(PathBuf),
    #[error("java executable at {} is not executable", .0.display())]
    JavaNotExecutable(PathBuf),
    #[error("server artifacts missing: {0}")]
    MissingArtifacts(String),
    #[error("no launch strategy is installed for this project")]
    NoInstalledStrategy,
    #[error("cannot prepare {}: {source}", path.display())]
    CacheDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("spawning the server process failed: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A transport-level failure on the persistent server socket.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("connecting to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("send failed after one reconnect attempt: {0}")]
    Send(#[source] std::io::Error),
    #[error("server closed the connection")]
    Disconnected,
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the size limit")]
    Oversized(usize),
    #[error("reading from the socket failed: {0}")]
    Read(#[source] std::io::Error),
}
