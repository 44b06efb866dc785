//! Collaborator interface to the host editor.
//!
//! The session engine never touches UI directly; dispatch handlers call
//! through this trait to render notes, reload buffers after a refactor,
//! prompt the user, and apply diff patches. Implementations live in the
//! editor-integration layer; tests substitute a recording mock.

use std::path::{Path, PathBuf};

/// One completion entry ready for the editor's selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub name: String,
    /// Human-readable type signature, when the server supplied one.
    pub signature: String,
}

/// Everything the dispatch handlers may ask the editor to do.
///
/// All methods are fire-and-forget from the engine's perspective except
/// `choose` and `apply_patch`, whose results drive follow-up requests.
/// Implementations must be callable from the router task, hence `Send + Sync`.
pub trait EditorSink: Send + Sync {
    /// Render the given notes for one file, replacing its previous marks.
    fn redraw(&self, file: &Path, notes: &[crate::notes::Note]);

    /// Remove every mark for one file.
    fn clear(&self, file: &Path);

    /// Re-read a buffer from disk (after a refactor patch landed).
    fn reload(&self, file: &Path);

    /// Offer options to the user; `None` means dismissed.
    fn choose(&self, options: &[String]) -> Option<usize>;

    /// Apply a unified-diff file to the project tree.
    fn apply_patch(&self, diff: &Path) -> bool;

    /// Jump to a position in a (possibly not yet open) file.
    fn visit(&self, file: &Path, line: Option<u64>, offset: Option<u64>);

    /// Display a type signature at point.
    fn show_type(&self, text: &str);

    /// Open a documentation URL.
    fn browse_url(&self, url: &str);

    /// Transient, non-modal status line message.
    fn status_message(&self, msg: &str);

    /// User-visible error message.
    fn error_message(&self, msg: &str);

    /// Whether the completion selector is currently on screen.
    fn selector_visible(&self) -> bool {
        false
    }

    /// Re-open the completion selector with the freshly stored suggestions.
    fn refresh_selector(&self) {}

    /// Files currently open in the editor, for the analyzer-ready catch-up
    /// typecheck pass.
    fn open_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// A sink that ignores every call; useful as a default and in tests that
/// don't observe editor effects.
#[derive(Debug, Default)]
pub struct NullEditor;

impl EditorSink for NullEditor {
    fn redraw(&self, _file: &Path, _notes: &[crate::notes::Note]) {}
    fn clear(&self, _file: &Path) {}
    fn reload(&self, _file: &Path) {}
    fn choose(&self, _options: &[String]) -> Option<usize> {
        None
    }
    fn apply_patch(&self, _diff: &Path) -> bool {
        false
    }
    fn visit(&self, _file: &Path, _line: Option<u64>, _offset: Option<u64>) {}
    fn show_type(&self, _text: &str) {}
    fn browse_url(&self, _url: &str) {}
    fn status_message(&self, _msg: &str) {}
    fn error_message(&self, _msg: &str) {}
}
