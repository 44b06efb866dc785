//! Wire message shapes.
//!
//! Every client-to-server frame is `{"callId": <n>, "req": {"typehint": ..}}`
//! and every server-to-client frame is `{"callId": <n>?, "payload":
//! {"typehint": ..}}`; a missing `callId` marks an unsolicited event. Request
//! bodies are opaque to the session engine, so builders produce plain
//! `serde_json::Value`s; only the payloads the dispatch handlers consume get
//! typed models here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::notes::{Note, NoteSeverity, normalize_path};

/// One outbound request frame.
#[derive(Debug, Serialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "callId")]
    pub call_id: u64,
    pub req: serde_json::Value,
}

/// One decoded inbound frame.
#[derive(Debug)]
pub struct InboundEnvelope {
    /// Absent for unsolicited server events.
    pub call_id: Option<u64>,
    pub payload: serde_json::Value,
}

/// Split an inbound frame into its call ID and payload.
///
/// Returns `None` when the frame has no object payload — such frames carry
/// nothing the dispatch table could key on.
pub fn parse_inbound(frame: &serde_json::Value) -> Option<InboundEnvelope> {
    let payload = frame.get("payload")?;
    if !payload.is_object() {
        return None;
    }
    let call_id = frame.get("callId").and_then(serde_json::Value::as_u64);
    Some(InboundEnvelope {
        call_id,
        payload: payload.clone(),
    })
}

/// The string tag identifying a payload's semantic kind.
#[must_use]
pub fn typehint(payload: &serde_json::Value) -> Option<&str> {
    payload.get("typehint").and_then(serde_json::Value::as_str)
}

// ── request builders ───────────────────────────────────────────────────

pub fn connection_info_req() -> serde_json::Value {
    serde_json::json!({ "typehint": "ConnectionInfoReq" })
}

pub fn typecheck_files_req(files: &[PathBuf]) -> serde_json::Value {
    serde_json::json!({
        "typehint": "TypecheckFilesReq",
        "files": files,
    })
}

pub fn completions_req(file: &Path, point: u64, max_results: u64) -> serde_json::Value {
    serde_json::json!({
        "typehint": "CompletionsReq",
        "fileInfo": { "file": file },
        "point": point,
        "maxResults": max_results,
        "caseSens": false,
        "reload": false,
    })
}

pub fn symbol_at_point_req(file: &Path, point: u64) -> serde_json::Value {
    serde_json::json!({
        "typehint": "SymbolAtPointReq",
        "file": file,
        "point": point,
    })
}

pub fn import_suggestions_req(file: &Path, point: u64, names: &[String]) -> serde_json::Value {
    serde_json::json!({
        "typehint": "ImportSuggestionsReq",
        "file": file,
        "point": point,
        "names": names,
        "maxResults": 10,
    })
}

pub fn add_import_refactor_req(
    procedure_id: u64,
    file: &Path,
    qualified_name: &str,
) -> serde_json::Value {
    serde_json::json!({
        "typehint": "RefactorReq",
        "procId": procedure_id,
        "params": {
            "typehint": "AddImportRefactorDesc",
            "file": file,
            "qualifiedName": qualified_name,
        },
        "interactive": false,
    })
}

pub fn doc_uri_at_point_req(file: &Path, point: u64) -> serde_json::Value {
    serde_json::json!({
        "typehint": "DocUriAtPointReq",
        "file": file,
        "point": { "from": point, "to": point },
    })
}

// ── inbound payload models ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct WireSeverity {
    pub typehint: String,
}

/// One diagnostic as it appears inside a `NewScalaNotesEvent` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct WireNote {
    pub msg: String,
    pub file: PathBuf,
    pub severity: WireSeverity,
    pub beg: u64,
    pub end: u64,
    pub line: u64,
    pub col: u64,
}

impl WireNote {
    pub fn into_note(self) -> Note {
        Note {
            message: self.msg,
            file: normalize_path(&self.file),
            severity: NoteSeverity::from_wire(&self.severity.typehint),
            beg: self.beg,
            end: self.end,
            line: self.line,
            col: self.col,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewNotesPayload {
    pub notes: Vec<WireNote>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectionInfoPayload {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCompletion {
    pub name: String,
    #[serde(rename = "typeInfo", default)]
    pub type_info: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompletionListPayload {
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub completions: Vec<WireCompletion>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefactorDiffPayload {
    #[serde(rename = "procedureId")]
    pub procedure_id: u64,
    pub diff: PathBuf,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImportSuggestion {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ImportSuggestionsPayload {
    #[serde(rename = "symLists")]
    pub sym_lists: Vec<Vec<ImportSuggestion>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeclPos {
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub line: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SymbolInfoPayload {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "declPos", default)]
    pub decl_pos: Option<DeclPos>,
}
