//! Session engine: one live conversation with an analysis server.
//!
//! A [`Session`] owns the launched server process, the persistent socket,
//! and every piece of state correlated across them: in-flight calls, stored
//! responses, accumulated notes, refactor bookkeeping. Three background
//! tasks run alongside callers: the readiness poll during startup, a writer
//! task that owns the socket's write half, and the router task that reads
//! frames for the whole session lifetime and feeds the dispatch table.
//!
//! Requests carry a client-assigned `callId`; responses echo it back.
//! Synchronous callers park in [`Session::await_response`], which polls the
//! stored-response table rather than using a wait/notify primitive — the
//! poll interval is explicit configuration, and the router checks the
//! running flag at every loop boundary so teardown is deterministic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use ensime_config::ProjectConfig;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;

use crate::codec::{self, FrameReader, FrameWriter};
use crate::editor::{EditorSink, Suggestion};
use crate::errors::WireError;
use crate::handlers;
use crate::launcher::ServerLauncher;
use crate::notes::NoteStore;
use crate::process::ServerProcess;
use crate::protocol::{self, OutboundEnvelope};

pub type CallId = u64;

/// Whether a caller will wait for the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// The caller retrieves the response via [`Session::await_response`];
    /// the router stashes it instead of dispatching.
    Sync,
    /// Fire-and-forget; the router dispatches the response like an event.
    Async,
}

/// Caller-supplied context recorded at send time and consulted by the
/// handler of the matching response.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// The file the request was issued for, when a handler needs it later
    /// (import suggestions, doc lookups).
    pub file: Option<PathBuf>,
    /// Whether a returned documentation URL should be opened.
    pub browse: bool,
}

impl CallContext {
    #[must_use]
    pub fn for_file(file: &Path) -> Self {
        Self {
            file: Some(file.to_path_buf()),
            browse: false,
        }
    }

    #[must_use]
    pub fn browsing(mut self) -> Self {
        self.browse = true;
        self
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Launching,
    Connecting,
    Connected,
    /// The transport died while the session believed it was running.
    /// Terminal like [`TornDown`](Self::TornDown); construct a fresh
    /// session to retry.
    Disconnected,
    /// Deliberately shut down; terminal.
    TornDown,
}

/// Tunables for the session's polling loops and retention caps.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long to wait for the launched process to publish its port.
    pub connect_timeout: Duration,
    /// Interval of the startup readiness probe.
    pub readiness_interval: Duration,
    /// Interval at which `await_response` re-checks the response table.
    pub poll_interval: Duration,
    /// Grace period the router waits for a reconnect-swapped socket before
    /// treating a read failure as a real disconnect.
    pub reconnect_grace: Duration,
    /// Stored responses and call records older than this are evicted.
    pub response_max_age: Duration,
    /// Hard cap on stored responses awaiting retrieval.
    pub response_cap: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(60),
            readiness_interval: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
            reconnect_grace: Duration::from_secs(1),
            response_max_age: Duration::from_secs(120),
            response_cap: 128,
        }
    }
}

/// Metadata recorded at the moment a request is sent.
#[derive(Debug)]
pub(crate) struct PendingCall {
    pub mode: CallMode,
    pub context: CallContext,
    pub sent_at: Instant,
}

#[derive(Debug)]
pub(crate) struct StoredResponse {
    pub payload: serde_json::Value,
    pub stored_at: Instant,
}

/// Everything correlated across the router task and foreground callers.
///
/// One lock covers all tables because cross-table invariants (a response is
/// either pending or already dispatched, never both) must be observed
/// atomically.
pub(crate) struct SessionTables {
    pub status: SessionStatus,
    pub server_version: Option<String>,
    pub analyzer_ready: bool,
    pub indexer_ready: bool,
    /// Flipped on when the analyzer announces readiness; the editor layer
    /// consults it before drawing note marks.
    pub notes_visible: bool,
    pub next_call_id: CallId,
    pub calls: HashMap<CallId, PendingCall>,
    pub responses: HashMap<CallId, StoredResponse>,
    /// Locally generated refactor-procedure ID → file the refactor targets.
    pub refactors: HashMap<u64, PathBuf>,
    pub next_refactor_id: u64,
    pub notes: NoteStore,
    pub suggestions: Vec<Suggestion>,
    pub completion_prefix: Option<String>,
}

impl SessionTables {
    fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            server_version: None,
            analyzer_ready: false,
            indexer_ready: false,
            notes_visible: false,
            next_call_id: 1,
            calls: HashMap::new(),
            responses: HashMap::new(),
            refactors: HashMap::new(),
            next_refactor_id: 1,
            notes: NoteStore::new(),
            suggestions: Vec::new(),
            completion_prefix: None,
        }
    }
}

/// Lock helper: a poisoned session lock only means a handler panicked with
/// the guard held; the tables themselves stay usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

type Handler = fn(&Shared, Option<CallId>, &serde_json::Value);

/// State shared between the session facade and its background tasks.
pub(crate) struct Shared {
    pub settings: SessionSettings,
    pub editor: Arc<dyn EditorSink>,
    pub running: AtomicBool,
    pub tables: Mutex<SessionTables>,
    pub process: Mutex<Option<ServerProcess>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<serde_json::Value>>>,
    handlers: HashMap<&'static str, Handler>,
}

impl Shared {
    fn new(settings: SessionSettings, editor: Arc<dyn EditorSink>) -> Self {
        Self {
            settings,
            editor,
            running: AtomicBool::new(false),
            tables: Mutex::new(SessionTables::new()),
            process: Mutex::new(None),
            outbound: Mutex::new(None),
            handlers: handlers::table(),
        }
    }

    /// Allocate the next call ID and record the call's metadata.
    pub(crate) fn record_call(&self, mode: CallMode, context: CallContext) -> CallId {
        let mut tables = lock(&self.tables);
        let id = tables.next_call_id;
        tables.next_call_id += 1;
        tables.calls.insert(
            id,
            PendingCall {
                mode,
                context,
                sent_at: Instant::now(),
            },
        );
        id
    }

    /// Serialize and enqueue a request. Returns `None` when the session has
    /// no live connection.
    pub(crate) fn send_request(
        &self,
        req: serde_json::Value,
        mode: CallMode,
        context: CallContext,
    ) -> Option<CallId> {
        if !self.running.load(Ordering::SeqCst) {
            tracing::debug!("dropping request, session is not running");
            return None;
        }
        let sender = lock(&self.outbound).clone()?;

        let id = self.record_call(mode, context);
        let frame = match serde_json::to_value(OutboundEnvelope {
            call_id: id,
            req,
        }) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(call_id = id, "cannot serialize request: {e}");
                lock(&self.tables).calls.remove(&id);
                return None;
            }
        };
        tracing::debug!(call_id = id, "queueing request");
        if sender.send(frame).is_err() {
            tracing::warn!(call_id = id, "writer task is gone, dropping request");
            lock(&self.tables).calls.remove(&id);
            return None;
        }
        Some(id)
    }

    /// Run the typed handler for a payload, exactly once per server message.
    pub(crate) fn dispatch(&self, call_id: Option<CallId>, payload: &serde_json::Value) {
        let Some(hint) = protocol::typehint(payload) else {
            tracing::warn!("payload without typehint dropped");
            return;
        };
        match self.handlers.get(hint) {
            Some(handler) => {
                tracing::debug!(typehint = hint, ?call_id, "dispatching");
                handler(self, call_id, payload);
            }
            None => {
                // Absence from the table is the "not supported" signal.
                tracing::warn!(typehint = hint, "no handler registered, dropping payload");
            }
        }
    }

    /// Dispatch a stored response, then discard its call record. The record
    /// stays alive through the dispatch so the handler can read the context
    /// captured at send time.
    pub(crate) fn dispatch_stored(&self, call_id: CallId, payload: &serde_json::Value) {
        self.dispatch(Some(call_id), payload);
        lock(&self.tables).calls.remove(&call_id);
    }

    /// Route one decoded frame per the correlation protocol.
    pub(crate) fn route_frame(&self, frame: &serde_json::Value) {
        let Some(inbound) = protocol::parse_inbound(frame) else {
            tracing::trace!("ignoring frame without payload");
            return;
        };

        let Some(id) = inbound.call_id else {
            // Unsolicited server event.
            self.dispatch(None, &inbound.payload);
            return;
        };

        {
            let mut tables = lock(&self.tables);
            match tables.calls.get(&id) {
                Some(call) if call.mode == CallMode::Sync => {
                    // Parked caller; stash the payload for retrieval.
                    tables.responses.insert(
                        id,
                        StoredResponse {
                            payload: inbound.payload,
                            stored_at: Instant::now(),
                        },
                    );
                    return;
                }
                Some(_) => {}
                None => {
                    tracing::warn!(call_id = id, "response for unknown call dropped");
                    return;
                }
            }
        }

        self.dispatch(Some(id), &inbound.payload);
    }

    /// Drop stored responses nobody retrieved and call records nobody will
    /// complete, so slow leaks cannot build up over a long session.
    ///
    /// Evicted responses are returned so the caller can dispatch each one
    /// exactly once before it is forgotten — side effects still land even
    /// when the original caller timed out long ago.
    pub(crate) fn evict_stale(&self) -> Vec<(CallId, serde_json::Value)> {
        let max_age = self.settings.response_max_age;
        let cap = self.settings.response_cap;
        let now = Instant::now();
        let mut evicted = Vec::new();

        let mut tables = lock(&self.tables);
        let expired: Vec<CallId> = tables
            .responses
            .iter()
            .filter(|(_, stored)| now.duration_since(stored.stored_at) > max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(stored) = tables.responses.remove(&id) {
                evicted.push((id, stored.payload));
            }
        }
        while tables.responses.len() > cap {
            let oldest = tables
                .responses
                .iter()
                .min_by_key(|(_, stored)| stored.stored_at)
                .map(|(id, _)| *id);
            let Some(id) = oldest else { break };
            if let Some(stored) = tables.responses.remove(&id) {
                evicted.push((id, stored.payload));
            }
        }
        // Call records for evicted responses survive this sweep; the caller
        // removes each one via dispatch_stored after the handler has read
        // its context.
        let SessionTables {
            calls, responses, ..
        } = &mut *tables;
        calls.retain(|id, call| {
            now.duration_since(call.sent_at) <= max_age
                || responses.contains_key(id)
                || evicted.iter().any(|(evicted_id, _)| evicted_id == id)
        });
        drop(tables);

        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted stale pending responses");
        }
        evicted
    }

    /// Stop the subprocess without touching connection state.
    pub(crate) fn shutdown_server(&self) {
        if let Some(mut process) = lock(&self.process).take() {
            process.stop();
        }
    }

    /// Full teardown on an unexpected transport failure: stop the server,
    /// mark the session terminal, emit exactly one user-visible warning.
    pub(crate) fn escalate_disconnect(&self, reason: &str) {
        if !self.running.swap(false, Ordering::SeqCst) {
            // Already shutting down; this is expected noise.
            return;
        }
        tracing::error!("connection to the analysis server lost: {reason}");
        let cache_dir = lock(&self.process)
            .as_ref()
            .map(|process| process.cache_dir().display().to_string());
        self.shutdown_server();
        *lock(&self.outbound) = None;
        // An unexpected disconnect is terminal; the session cannot recover.
        lock(&self.tables).status = SessionStatus::Disconnected;
        let hint = cache_dir
            .map(|dir| format!(" Server logs are in {dir}."))
            .unwrap_or_default();
        self.editor.error_message(&format!(
            "Lost the connection to the analysis server; the session has been disabled.{hint}"
        ));
    }
}

/// A conversation with one analysis server, owned by the editor-window
/// context that created it.
pub struct Session {
    config: ProjectConfig,
    shared: Arc<Shared>,
}

impl Session {
    #[must_use]
    pub fn new(config: ProjectConfig, editor: Arc<dyn EditorSink>) -> Self {
        Self::with_settings(config, editor, SessionSettings::default())
    }

    #[must_use]
    pub fn with_settings(
        config: ProjectConfig,
        editor: Arc<dyn EditorSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new(settings, editor)),
        }
    }

    /// Launch the server and begin connecting.
    ///
    /// Returns `true` when the process is up; the connection itself is
    /// established by a background readiness poll, so callers should treat
    /// `is_connected()` as eventually true. Launch failures are surfaced to
    /// the user once and leave the session terminal.
    pub async fn setup(&self) -> bool {
        lock(&self.shared.tables).status = SessionStatus::Launching;
        let launcher = ServerLauncher::from_config(&self.config);
        let process = match launcher.launch() {
            Ok(process) => process,
            Err(e) => {
                tracing::error!("cannot launch the analysis server: {e}");
                self.shared
                    .editor
                    .error_message(&format!("Cannot launch the analysis server: {e}"));
                lock(&self.shared.tables).status = SessionStatus::TornDown;
                return false;
            }
        };
        *lock(&self.shared.process) = Some(process);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(connect_when_ready(shared));
        true
    }

    /// Connect to an already-running server on a known port, skipping the
    /// launch and readiness phases.
    pub async fn attach(&self, port: u16) -> Result<(), WireError> {
        self.shared.running.store(true, Ordering::SeqCst);
        let result = establish(Arc::clone(&self.shared), port).await;
        if result.is_err() {
            self.shared.running.store(false, Ordering::SeqCst);
        }
        result
    }

    /// Shut down the client and stop the server if one is attached.
    pub fn teardown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.shutdown_server();
        *lock(&self.shared.outbound) = None;
        lock(&self.shared.tables).status = SessionStatus::TornDown;
        tracing::info!("session torn down");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.is_running() && self.status() == SessionStatus::Connected
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        lock(&self.shared.tables).status
    }

    #[must_use]
    pub fn server_version(&self) -> Option<String> {
        lock(&self.shared.tables).server_version.clone()
    }

    #[must_use]
    pub fn analyzer_ready(&self) -> bool {
        lock(&self.shared.tables).analyzer_ready
    }

    #[must_use]
    pub fn indexer_ready(&self) -> bool {
        lock(&self.shared.tables).indexer_ready
    }

    /// Notes currently accumulated for one file.
    #[must_use]
    pub fn notes_for(&self, file: &Path) -> Vec<crate::notes::Note> {
        lock(&self.shared.tables).notes.for_file(file).to_vec()
    }

    /// Suggestions stored by the most recent completion response, with the
    /// prefix they were computed for.
    #[must_use]
    pub fn completion_state(&self) -> (Option<String>, Vec<Suggestion>) {
        let tables = lock(&self.shared.tables);
        (tables.completion_prefix.clone(), tables.suggestions.clone())
    }

    /// Send a request. Never blocks; returns the allocated call ID, or
    /// `None` when the session has no live connection.
    pub fn send_request(
        &self,
        req: serde_json::Value,
        mode: CallMode,
        context: CallContext,
    ) -> Option<CallId> {
        self.shared.send_request(req, mode, context)
    }

    /// Block (by polling) until the response for `call_id` arrives or
    /// `timeout` elapses. On success the stored entry is consumed and its
    /// typed handler runs before the payload is returned, so side effects
    /// are uniform across synchronous and asynchronous calls.
    pub async fn await_response(
        &self,
        call_id: CallId,
        timeout: Duration,
    ) -> Option<serde_json::Value> {
        let deadline = Instant::now() + timeout;
        loop {
            // The call record outlives the response removal so the handler
            // still sees the context recorded at send time.
            let stored = lock(&self.shared.tables).responses.remove(&call_id);
            if let Some(stored) = stored {
                self.shared.dispatch_stored(call_id, &stored.payload);
                return Some(stored.payload);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(call_id, ?timeout, "no response within budget");
                return None;
            }
            let nap = self.shared.settings.poll_interval.min(deadline - now);
            tokio::time::sleep(nap).await;
        }
    }

    // ── convenience requests ───────────────────────────────────────────

    /// Fire-and-forget typecheck of the given files.
    pub fn typecheck_files(&self, files: &[PathBuf]) -> Option<CallId> {
        self.send_request(
            protocol::typecheck_files_req(files),
            CallMode::Async,
            CallContext::default(),
        )
    }

    /// Completion request at a character offset; the caller awaits the
    /// response or lets the completion handler store it for the UI.
    pub fn completions(&self, file: &Path, point: u64, max_results: u64) -> Option<CallId> {
        self.send_request(
            protocol::completions_req(file, point, max_results),
            CallMode::Sync,
            CallContext::for_file(file),
        )
    }

    /// Go-to-definition lookup; handled by the `SymbolInfo` handler.
    pub fn symbol_at_point(&self, file: &Path, point: u64) -> Option<CallId> {
        self.send_request(
            protocol::symbol_at_point_req(file, point),
            CallMode::Async,
            CallContext::for_file(file),
        )
    }

    /// Ask for import candidates for the names at point; the handler offers
    /// them to the user and issues the follow-up refactor.
    pub fn import_suggestions(&self, file: &Path, point: u64, names: &[String]) -> Option<CallId> {
        self.send_request(
            protocol::import_suggestions_req(file, point, names),
            CallMode::Async,
            CallContext::for_file(file),
        )
    }

    /// Look up the documentation URL at point and open it in a browser.
    pub fn browse_doc_at_point(&self, file: &Path, point: u64) -> Option<CallId> {
        self.send_request(
            protocol::doc_uri_at_point_req(file, point),
            CallMode::Async,
            CallContext::for_file(file).browsing(),
        )
    }
}

#[cfg(test)]
impl Session {
    pub(crate) fn shared_for_tests(&self) -> &Arc<Shared> {
        &self.shared
    }
}

#[cfg(test)]
impl Shared {
    /// Mark the session live and wire the outbound channel to a test sink.
    pub(crate) fn wire_for_tests(&self, sender: mpsc::UnboundedSender<serde_json::Value>) {
        self.running.store(true, Ordering::SeqCst);
        *lock(&self.outbound) = Some(sender);
    }
}

/// Startup readiness poll: wait for the launched process to stay alive and
/// publish a connectable port, then establish the session.
async fn connect_when_ready(shared: Arc<Shared>) {
    lock(&shared.tables).status = SessionStatus::Connecting;
    let deadline = Instant::now() + shared.settings.connect_timeout;

    let port = loop {
        if !shared.running.load(Ordering::SeqCst) {
            return;
        }
        let published = {
            let mut guard = lock(&shared.process);
            guard.as_mut().and_then(|process| {
                if process.is_running() {
                    process.port()
                } else {
                    None
                }
            })
        };
        // The connect probe runs with the process lock released.
        if let Some(port) = published {
            if crate::process::port_open(port).await {
                break port;
            }
        }
        if Instant::now() >= deadline {
            tracing::warn!("analysis server did not become ready in time");
            shared.escalate_disconnect("server never published a connectable port");
            return;
        }
        tokio::time::sleep(shared.settings.readiness_interval).await;
    };

    tracing::info!(port, "server is ready, connecting");
    if let Err(e) = establish(shared.clone(), port).await {
        tracing::error!("connecting to the analysis server failed: {e}");
        shared.escalate_disconnect("could not connect to the published port");
    }
}

/// Dial the server, start the writer and router tasks, and send the
/// connection handshake.
async fn establish(shared: Arc<Shared>, port: u16) -> Result<(), WireError> {
    let (reader, writer) = codec::connect(port).await?;

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (reader_tx, reader_rx) = mpsc::channel(1);
    *lock(&shared.outbound) = Some(outbound_tx);
    lock(&shared.tables).status = SessionStatus::Connecting;

    tokio::spawn(writer_loop(
        Arc::clone(&shared),
        outbound_rx,
        writer,
        reader_tx,
        port,
    ));
    tokio::spawn(router_loop(Arc::clone(&shared), reader, reader_rx));

    // Handshake; the ConnectionInfo handler moves us to Connected.
    shared.send_request(
        protocol::connection_info_req(),
        CallMode::Async,
        CallContext::default(),
    );
    Ok(())
}

/// Owns the write half. On a write failure, attempts exactly one reconnect:
/// fresh socket, fresh handshake, then the failed frame again. A second
/// failure escalates to session teardown.
async fn writer_loop(
    shared: Arc<Shared>,
    mut outbound_rx: mpsc::UnboundedReceiver<serde_json::Value>,
    mut writer: FrameWriter<OwnedWriteHalf>,
    reader_tx: mpsc::Sender<FrameReader<OwnedReadHalf>>,
    port: u16,
) {
    while let Some(frame) = outbound_rx.recv().await {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        let Err(e) = writer.write_frame(&frame).await else {
            continue;
        };
        tracing::warn!("send failed ({e}), attempting one reconnect");

        match reconnect(&shared, port).await {
            Ok((new_reader, new_writer)) => {
                writer = new_writer;
                if reader_tx.send(new_reader).await.is_err() {
                    break;
                }
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::error!("re-send after reconnect failed: {e}");
                    shared.escalate_disconnect("send failed after one reconnect attempt");
                    break;
                }
            }
            Err(e) => {
                tracing::error!("reconnect failed: {e}");
                shared.escalate_disconnect("reconnect after a send failure did not succeed");
                break;
            }
        }
    }
    tracing::trace!("writer loop exited");
}

/// One reconnect attempt. Any reconnect requires a fresh handshake; no
/// state from the previous connection is assumed valid.
async fn reconnect(
    shared: &Arc<Shared>,
    port: u16,
) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>), WireError> {
    let (reader, mut writer) = codec::connect(port).await?;
    let id = shared.record_call(CallMode::Async, CallContext::default());
    let handshake = serde_json::to_value(OutboundEnvelope {
        call_id: id,
        req: protocol::connection_info_req(),
    })?;
    writer
        .write_frame(&handshake)
        .await
        .map_err(WireError::Send)?;
    Ok((reader, writer))
}

/// Background read loop: decodes frames and feeds the correlation protocol
/// for the session's entire life. A read failure while the session is
/// running is an unexpected disconnect; while it is shutting down it is
/// expected noise and absorbed silently.
async fn router_loop(
    shared: Arc<Shared>,
    mut reader: FrameReader<OwnedReadHalf>,
    mut reader_rx: mpsc::Receiver<FrameReader<OwnedReadHalf>>,
) {
    loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            replacement = reader_rx.recv() => {
                match replacement {
                    Some(new_reader) => {
                        tracing::debug!("router switched to the reconnected socket");
                        reader = new_reader;
                    }
                    None => break,
                }
            }
            result = reader.read_frame() => match result {
                Ok(Some(frame)) => {
                    shared.route_frame(&frame);
                    for (call_id, payload) in shared.evict_stale() {
                        shared.dispatch_stored(call_id, &payload);
                    }
                }
                Err(WireError::Decode(e)) => {
                    // One bad frame must never kill the router.
                    tracing::warn!("dropping malformed frame: {e}");
                }
                Ok(None) | Err(_) => {
                    if !shared.running.load(Ordering::SeqCst) {
                        break;
                    }
                    // A send-failure reconnect may be swapping the socket
                    // underneath us; give it a moment before escalating.
                    let grace = shared.settings.reconnect_grace;
                    match tokio::time::timeout(grace, reader_rx.recv()).await {
                        Ok(Some(new_reader)) => reader = new_reader,
                        _ => {
                            shared.escalate_disconnect("server closed the connection");
                            break;
                        }
                    }
                }
            }
        }
    }
    tracing::trace!("router loop exited");
}
