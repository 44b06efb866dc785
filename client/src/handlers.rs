//! Typed handlers for inbound payloads.
//!
//! The router identifies every payload by its `typehint` and looks the tag
//! up in the table built here; a tag absent from the table is simply not
//! supported and is logged and dropped. Handlers run on the router task,
//! mutate the shared session tables under their single lock, and talk to
//! the editor through the [`EditorSink`](crate::editor::EditorSink) trait.
//! Follow-up requests (the add-import refactor after a suggestion is
//! chosen) go back out through the normal send path.

use std::collections::{BTreeSet, HashMap};

use crate::editor::Suggestion;
use crate::notes::Note;
use crate::protocol::{
    self, CompletionListPayload, ConnectionInfoPayload, ImportSuggestionsPayload,
    NewNotesPayload, RefactorDiffPayload, SymbolInfoPayload,
};
use crate::session::{CallContext, CallId, CallMode, SessionStatus, Shared, lock};

type Handler = fn(&Shared, Option<CallId>, &serde_json::Value);

/// Build the typehint dispatch table. Constructed once per session.
pub(crate) fn table() -> HashMap<&'static str, Handler> {
    let mut handlers: HashMap<&'static str, Handler> = HashMap::new();
    handlers.insert("ConnectionInfo", on_connection_info);
    handlers.insert("AnalyzerReadyEvent", on_analyzer_ready);
    handlers.insert("IndexerReadyEvent", on_indexer_ready);
    handlers.insert("FullTypeCheckCompleteEvent", on_typecheck_complete);
    handlers.insert("NewScalaNotesEvent", on_new_notes);
    handlers.insert("ClearAllScalaNotesEvent", on_clear_notes);
    handlers.insert("SendBackgroundMessageEvent", on_background_message);
    handlers.insert("CompletionInfoList", on_completions);
    handlers.insert("RefactorDiffEffect", on_refactor_diff);
    handlers.insert("ImportSuggestions", on_import_suggestions);
    handlers.insert("SymbolInfo", on_symbol_info);
    handlers.insert("BasicTypeInfo", on_type_info);
    handlers.insert("ArrowTypeInfo", on_type_info);
    handlers.insert("StringResponse", on_string_response);
    handlers
}

fn on_connection_info(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let version = serde_json::from_value::<ConnectionInfoPayload>(payload.clone())
        .ok()
        .and_then(|info| info.version)
        .unwrap_or_else(|| "unknown".to_string());
    tracing::info!(version = %version, "handshake complete");
    {
        let mut tables = lock(&shared.tables);
        tables.server_version = Some(version.clone());
        tables.status = SessionStatus::Connected;
    }
    shared
        .editor
        .status_message(&format!("Connected to the analysis server (v{version})"));
}

fn on_analyzer_ready(shared: &Shared, _call_id: Option<CallId>, _payload: &serde_json::Value) {
    {
        let mut tables = lock(&shared.tables);
        tables.analyzer_ready = true;
        tables.notes_visible = true;
    }
    shared.editor.status_message("Analyzer is ready");

    // Catch-up pass over whatever the user already has open.
    let open = shared.editor.open_files();
    if !open.is_empty() {
        shared.send_request(
            protocol::typecheck_files_req(&open),
            CallMode::Async,
            CallContext::default(),
        );
    }
}

fn on_indexer_ready(shared: &Shared, _call_id: Option<CallId>, _payload: &serde_json::Value) {
    lock(&shared.tables).indexer_ready = true;
    shared.editor.status_message("Indexer is ready");
}

fn on_background_message(_shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let code = payload.get("code").and_then(serde_json::Value::as_u64);
    let detail = payload
        .get("detail")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("");
    tracing::info!(?code, "server background message: {detail}");
}

fn on_new_notes(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let parsed: NewNotesPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("unreadable notes payload: {e}");
            return;
        }
    };
    let notes = parsed.notes.into_iter().map(|note| note.into_note());
    lock(&shared.tables).notes.append(notes);
}

fn on_clear_notes(shared: &Shared, _call_id: Option<CallId>, _payload: &serde_json::Value) {
    lock(&shared.tables).notes.clear();
}

fn on_typecheck_complete(shared: &Shared, _call_id: Option<CallId>, _payload: &serde_json::Value) {
    // Snapshot under the lock, draw outside it.
    let per_file: Vec<(std::path::PathBuf, Vec<Note>)> = {
        let mut tables = lock(&shared.tables);
        if !tables.notes_visible {
            return;
        }
        tables
            .notes
            .files()
            .into_iter()
            .map(|file| {
                let notes = tables.notes.for_file(&file).to_vec();
                (file, notes)
            })
            .collect()
    };
    tracing::debug!(files = per_file.len(), "typecheck pass complete");
    for (file, notes) in per_file {
        shared.editor.redraw(&file, &notes);
    }
}

fn on_completions(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let parsed: CompletionListPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("unreadable completion payload: {e}");
            return;
        }
    };
    // Entries without a type are keywords or noise; skip them.
    let suggestions: Vec<Suggestion> = parsed
        .completions
        .into_iter()
        .filter_map(|completion| {
            let type_info = completion.type_info?;
            let signature = type_info
                .get("name")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Suggestion {
                name: completion.name,
                signature,
            })
        })
        .collect();

    let same_prefix = {
        let tables = lock(&shared.tables);
        tables.completion_prefix.is_some() && tables.completion_prefix == parsed.prefix
    };
    if same_prefix && shared.editor.selector_visible() {
        // The user is still looking at the selector for this prefix;
        // swap in the fresher list and redraw it.
        lock(&shared.tables).suggestions = suggestions;
        shared.editor.refresh_selector();
    } else {
        let mut tables = lock(&shared.tables);
        tables.completion_prefix = parsed.prefix;
        tables.suggestions = suggestions;
    }
}

fn on_refactor_diff(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let parsed: RefactorDiffPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!("unreadable refactor payload: {e}");
            return;
        }
    };
    let target = lock(&shared.tables).refactors.remove(&parsed.procedure_id);
    let Some(target) = target else {
        tracing::warn!(
            procedure_id = parsed.procedure_id,
            "refactor effect for unknown procedure"
        );
        return;
    };
    if shared.editor.apply_patch(&parsed.diff) {
        shared.editor.reload(&target);
        shared.editor.status_message("Refactoring succeeded");
    } else {
        tracing::warn!(diff = %parsed.diff.display(), "refactor patch did not apply");
        shared.editor.error_message(&format!(
            "Could not apply the refactoring diff {}",
            parsed.diff.display()
        ));
    }
}

fn on_import_suggestions(shared: &Shared, call_id: Option<CallId>, payload: &serde_json::Value) {
    let parsed: ImportSuggestionsPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("unreadable import suggestions payload: {e}");
            return;
        }
    };
    // The server reports inner classes with `$` separators; imports use dots.
    let deduped: BTreeSet<String> = parsed
        .sym_lists
        .into_iter()
        .flatten()
        .map(|symbol| symbol.name.replace('$', "."))
        .collect();
    let options: Vec<String> = deduped.into_iter().collect();
    if options.is_empty() {
        shared.editor.error_message("No import suggestions found");
        return;
    }

    let Some(index) = shared.editor.choose(&options) else {
        return;
    };
    let file = call_id.and_then(|id| {
        lock(&shared.tables)
            .calls
            .get(&id)
            .and_then(|call| call.context.file.clone())
    });
    let Some(file) = file else {
        tracing::warn!(?call_id, "import suggestion response without a target file");
        return;
    };
    let procedure_id = {
        let mut tables = lock(&shared.tables);
        let id = tables.next_refactor_id;
        tables.next_refactor_id += 1;
        tables.refactors.insert(id, file.clone());
        id
    };
    shared.send_request(
        protocol::add_import_refactor_req(procedure_id, &file, &options[index]),
        CallMode::Async,
        CallContext::default(),
    );
}

fn on_symbol_info(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let parsed: SymbolInfoPayload = match serde_json::from_value(payload.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("unreadable symbol payload: {e}");
            return;
        }
    };
    let name = parsed.name.unwrap_or_else(|| "<unknown>".to_string());
    let Some(decl_pos) = parsed.decl_pos else {
        shared
            .editor
            .error_message(&format!("No declaration position for {name}"));
        return;
    };
    let Some(file) = decl_pos.file else {
        shared
            .editor
            .error_message(&format!("The declaration of {name} has no source file"));
        return;
    };
    shared.editor.visit(&file, decl_pos.line, decl_pos.offset);
}

fn on_type_info(shared: &Shared, _call_id: Option<CallId>, payload: &serde_json::Value) {
    let text = payload
        .get("fullName")
        .or_else(|| payload.get("name"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or("<unknown type>");
    shared.editor.show_type(text);
}

fn on_string_response(shared: &Shared, call_id: Option<CallId>, payload: &serde_json::Value) {
    let Some(text) = payload.get("text").and_then(serde_json::Value::as_str) else {
        tracing::debug!("string response without text");
        return;
    };
    let browse = call_id.is_some_and(|id| {
        lock(&shared.tables)
            .calls
            .get(&id)
            .is_some_and(|call| call.context.browse)
    });
    if !browse {
        tracing::debug!("string response with no consumer: {text}");
        return;
    }
    // Doc lookups return either a full URL or a path on the server's own
    // documentation endpoint.
    let url = if text.starts_with("http") {
        text.to_string()
    } else {
        let port = lock(&shared.process).as_ref().and_then(|p| p.port());
        match port {
            Some(port) => format!("http://127.0.0.1:{port}/{text}"),
            None => {
                tracing::warn!("doc path received but the server port is unknown");
                return;
            }
        }
    };
    shared.editor.browse_url(&url);
    if let Some(id) = call_id {
        lock(&shared.tables).calls.remove(&id);
    }
}
