//! Handle for one launched analysis-server process.
//!
//! The server publishes its listening port by writing it to a well-known
//! file inside the project cache directory once its socket is bound; until
//! then the process is alive but not ready. Readiness is therefore "alive
//! AND a TCP connect to the published port succeeds".

use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Child;

/// File the server writes its HTTP/websocket port into after binding.
pub const PORT_FILE: &str = "http";
/// Legacy port marker kept alongside [`PORT_FILE`] by some server versions.
pub const LEGACY_PORT_FILE: &str = "port";
/// File the launcher persists the child pid into.
pub const PID_FILE: &str = "server.pid";
/// Server stdout/stderr log, recreated fresh on every launch.
pub const LOG_FILE: &str = "server.log";

/// Probe timeout for one readiness connect attempt. Kept short because the
/// readiness poll loop calls this from an async task.
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// One launched analysis-server instance.
pub struct ServerProcess {
    cache_dir: PathBuf,
    child: Child,
    stopped_manually: bool,
}

impl ServerProcess {
    pub(crate) fn new(cache_dir: PathBuf, child: Child) -> Self {
        Self {
            cache_dir,
            child,
            stopped_manually: false,
        }
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Whether the subprocess is still alive. Permanently false once
    /// [`stop`](Self::stop) has been called.
    pub fn is_running(&mut self) -> bool {
        if self.stopped_manually {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// True if the process exited without `stop()` having been called —
    /// a crash rather than a shutdown.
    pub fn aborted(&mut self) -> bool {
        !(self.stopped_manually || self.is_running())
    }

    /// The port published by the server, if the marker file exists yet.
    ///
    /// A missing or unparsable file is a normal transient during startup.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        let text = std::fs::read_to_string(self.cache_dir.join(PORT_FILE)).ok()?;
        text.trim().parse().ok()
    }

    /// Readiness probe: alive and accepting connections on the published port.
    pub fn is_ready(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(port) = self.port() else {
            return false;
        };
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
    }

    /// Terminate the process and remove its marker files. Idempotent;
    /// stopping a process that already exited on its own does not fail.
    pub fn stop(&mut self) {
        if self.stopped_manually {
            return;
        }
        self.stopped_manually = true;

        if let Some(pid) = self.child.id() {
            if !terminate(pid) {
                tracing::warn!(pid, "graceful termination refused, killing server process");
                let _ = self.child.start_kill();
            }
        }

        for marker in [PORT_FILE, LEGACY_PORT_FILE, PID_FILE] {
            let _ = std::fs::remove_file(self.cache_dir.join(marker));
        }
        tracing::info!(cache_dir = %self.cache_dir.display(), "server process stopped");
    }
}

/// Async readiness probe for the session's polling task: true when the
/// loopback port accepts a connection within the probe timeout.
pub async fn port_open(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let connect = tokio::net::TcpStream::connect(addr);
    matches!(tokio::time::timeout(PROBE_TIMEOUT, connect).await, Ok(Ok(_)))
}

/// Ask the process to terminate gracefully. Returns false when the signal
/// could not be delivered and a forceful kill is needed.
#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    // SAFETY: plain syscall; the pid came from our own child handle.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    // No graceful signal on this platform; callers fall through to kill().
    false
}
