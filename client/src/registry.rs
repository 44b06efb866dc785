//! Process-wide map of live sessions, keyed by project root.
//!
//! Editor windows come and go; each one resolves its project root here and
//! shares the session for it. Lookup and creation happen under a single
//! lock, so two windows racing on the same root can never both launch a
//! server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::notes::normalize_path;
use crate::session::{Session, lock};

/// Shared session registry. One per host process.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<PathBuf, Arc<Session>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for a project root, if one exists.
    #[must_use]
    pub fn get(&self, root: &Path) -> Option<Arc<Session>> {
        lock(&self.inner).get(&normalize_path(root)).cloned()
    }

    /// The session for a project root, creating it with `create` when
    /// absent. The check and the insert happen under one lock.
    pub fn get_or_create(
        &self,
        root: &Path,
        create: impl FnOnce() -> Session,
    ) -> Arc<Session> {
        lock(&self.inner)
            .entry(normalize_path(root))
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    /// Detach a session from the registry. The caller is responsible for
    /// tearing it down; existing handles stay valid.
    pub fn remove(&self, root: &Path) -> Option<Arc<Session>> {
        lock(&self.inner).remove(&normalize_path(root))
    }

    /// Tear down and drop every registered session.
    pub fn teardown_all(&self) {
        let sessions: Vec<Arc<Session>> = lock(&self.inner).drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.teardown();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }
}
