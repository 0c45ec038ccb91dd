//! Resolving the exact source text a session executed

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::data::{DatabaseError, SessionStore};
use crate::git::SourceControl;
use crate::session::SessionContext;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No source available for {0}")]
    Unavailable(PathBuf),
    #[error("Failed to read snapshot: {0}")]
    Store(#[from] DatabaseError),
}

/// Which source won the lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Snapshot,
    Commit,
    Disk,
}

/// Source text of one file as it was executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub file: PathBuf,
    pub text: String,
    pub origin: SourceOrigin,
    digest: String,
}

impl ResolvedSource {
    pub fn new(file: impl Into<PathBuf>, text: String, origin: SourceOrigin) -> Self {
        let digest = content_digest(&text);
        Self {
            file: file.into(),
            text,
            origin,
            digest,
        }
    }

    /// One-based line, without its terminator
    pub fn line(&self, number: u32) -> Option<&str> {
        let index = (number as usize).checked_sub(1)?;
        self.text.lines().nth(index)
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }

    /// Hex SHA-256 of the text, computed once at resolution
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

pub fn content_digest(text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    hash.iter().map(|b| format!("{b:02x}")).collect()
}

/// Snapshot, then clean commit, then disk
#[derive(Clone)]
pub struct SourceResolver {
    store: SessionStore,
    vcs: Arc<dyn SourceControl>,
}

impl SourceResolver {
    pub fn new(store: SessionStore, vcs: Arc<dyn SourceControl>) -> Self {
        Self { store, vcs }
    }

    pub fn resolve(&self, file: &Path, session: &SessionContext) -> Result<ResolvedSource, SourceError> {
        if let Some(snapshot) = self.store.get_file_snapshot(&session.id, file)? {
            return Ok(ResolvedSource::new(file, snapshot.content, SourceOrigin::Snapshot));
        }

        // A dirty tree may differ from the commit, so its content is never trusted
        if let Some((repo_root, commit)) = session.clean_commit() {
            if let Some(text) = self.vcs.file_at_commit(repo_root, commit, file) {
                return Ok(ResolvedSource::new(file, text, SourceOrigin::Commit));
            }
        }

        match std::fs::read_to_string(file) {
            Ok(text) => Ok(ResolvedSource::new(file, text, SourceOrigin::Disk)),
            Err(e) => {
                tracing::debug!(file = %file.display(), error = %e, "Source unavailable");
                Err(SourceError::Unavailable(file.to_path_buf()))
            }
        }
    }
}
