//! Diagnostic notes reported by the analysis server.
//!
//! Notes stream in per typecheck pass (`NewScalaNotesEvent`) and are cleared
//! wholesale when a fresh pass begins (`ClearAllScalaNotesEvent`). The store
//! indexes them by normalized file path so a redraw for one buffer is a
//! single map lookup.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Severity of one server-reported note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteSeverity {
    Error,
    Warning,
    Info,
}

impl NoteSeverity {
    /// Map the wire tag (`NoteError`, `NoteWarn`, `NoteInfo`) to a severity.
    ///
    /// Unrecognized tags downgrade to `Info` rather than dropping the note.
    #[must_use]
    pub fn from_wire(tag: &str) -> Self {
        match tag {
            "NoteError" => Self::Error,
            "NoteWarn" => Self::Warning,
            _ => Self::Info,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// One compiler-reported issue for a source position range.
#[derive(Debug, Clone)]
pub struct Note {
    pub message: String,
    /// Normalized owning file path.
    pub file: PathBuf,
    pub severity: NoteSeverity,
    /// Start character offset.
    pub beg: u64,
    /// End character offset.
    pub end: u64,
    pub line: u64,
    pub col: u64,
}

/// Lexical path normalization: strips `.` and resolves `..` without touching
/// the filesystem, so paths for files that no longer exist still normalize.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Per-file index of accumulated notes.
#[derive(Debug, Default)]
pub struct NoteStore {
    /// Raw path → normalized path, so repeated appends for one file don't
    /// re-normalize.
    normalized: HashMap<PathBuf, PathBuf>,
    per_file: HashMap<PathBuf, Vec<Note>>,
}

impl NoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append notes as they stream in; notes arrive already normalized by
    /// the wire conversion but foreign paths are normalized again here.
    pub fn append(&mut self, notes: impl IntoIterator<Item = Note>) {
        for note in notes {
            let file = self.normalize_cached(&note.file);
            self.per_file.entry(file).or_default().push(note);
        }
    }

    /// Drop every accumulated note (a fresh typecheck pass is starting).
    pub fn clear(&mut self) {
        self.per_file.clear();
    }

    /// Notes for one file, in arrival order. A lookup for a note-free file
    /// does not grow the index.
    pub fn for_file(&mut self, file: &Path) -> &[Note] {
        let file = self.normalize_cached(file);
        self.per_file.get(&file).map_or(&[], Vec::as_slice)
    }

    /// Files that currently have at least one note.
    #[must_use]
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .per_file
            .iter()
            .filter(|(_, notes)| !notes.is_empty())
            .map(|(file, _)| file.clone())
            .collect();
        files.sort();
        files
    }

    /// Keep only files matching `pred`, e.g. when a project subtree closes.
    pub fn retain_files(&mut self, pred: impl Fn(&Path) -> bool) {
        self.per_file.retain(|file, _| pred(file));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.per_file.values().all(Vec::is_empty)
    }

    fn normalize_cached(&mut self, path: &Path) -> PathBuf {
        if let Some(normalized) = self.normalized.get(path) {
            return normalized.clone();
        }
        let normalized = normalize_path(path);
        self.normalized
            .insert(path.to_path_buf(), normalized.clone());
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(file: &str, msg: &str, severity: NoteSeverity) -> Note {
        Note {
            message: msg.to_string(),
            file: PathBuf::from(file),
            severity,
            beg: 0,
            end: 4,
            line: 1,
            col: 1,
        }
    }

    #[test]
    fn test_severity_from_wire() {
        assert_eq!(NoteSeverity::from_wire("NoteError"), NoteSeverity::Error);
        assert_eq!(NoteSeverity::from_wire("NoteWarn"), NoteSeverity::Warning);
        assert_eq!(NoteSeverity::from_wire("NoteInfo"), NoteSeverity::Info);
        assert_eq!(NoteSeverity::from_wire("whatever"), NoteSeverity::Info);
    }

    #[test]
    fn test_normalize_path_resolves_dots() {
        assert_eq!(
            normalize_path(Path::new("/p/src/../A.scala")),
            PathBuf::from("/p/A.scala")
        );
        assert_eq!(
            normalize_path(Path::new("/p/./A.scala")),
            PathBuf::from("/p/A.scala")
        );
    }

    #[test]
    fn test_append_groups_by_normalized_path() {
        let mut store = NoteStore::new();
        store.append([
            note("/p/A.scala", "first", NoteSeverity::Error),
            note("/p/src/../A.scala", "second", NoteSeverity::Warning),
        ]);
        let notes = store.for_file(Path::new("/p/A.scala"));
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].message, "first");
        assert_eq!(notes[1].message, "second");
    }

    #[test]
    fn test_files_are_isolated() {
        let mut store = NoteStore::new();
        store.append([
            note("/p/A.scala", "a", NoteSeverity::Error),
            note("/p/B.scala", "b", NoteSeverity::Warning),
        ]);
        let for_b = store.for_file(Path::new("/p/B.scala"));
        assert_eq!(for_b.len(), 1);
        assert_eq!(for_b[0].message, "b");
    }

    #[test]
    fn test_clear_empties_every_file() {
        let mut store = NoteStore::new();
        store.append([note("/p/A.scala", "a", NoteSeverity::Error)]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.for_file(Path::new("/p/A.scala")).is_empty());
    }

    #[test]
    fn test_retain_files() {
        let mut store = NoteStore::new();
        store.append([
            note("/p/A.scala", "a", NoteSeverity::Error),
            note("/q/B.scala", "b", NoteSeverity::Error),
        ]);
        store.retain_files(|file| file.starts_with("/p"));
        assert_eq!(store.files(), vec![PathBuf::from("/p/A.scala")]);
    }

    #[test]
    fn test_for_file_lookup_does_not_grow_the_store() {
        let mut store = NoteStore::new();
        for i in 0..10 {
            let path = format!("/p/Absent{i}.scala");
            assert!(store.for_file(Path::new(&path)).is_empty());
        }
        assert!(store.per_file.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_files_sorted() {
        let mut store = NoteStore::new();
        store.append([
            note("/p/B.scala", "b", NoteSeverity::Error),
            note("/p/A.scala", "a", NoteSeverity::Error),
        ]);
        assert_eq!(
            store.files(),
            vec![PathBuf::from("/p/A.scala"), PathBuf::from("/p/B.scala")]
        );
    }
}
