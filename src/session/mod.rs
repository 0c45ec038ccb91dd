//! Identity and provenance of one debug session

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::data::{Provenance, SessionId, SessionSummary};

/// Passed explicitly to everything that needs to know which session it serves
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub id: SessionId,
    /// Script being debugged
    pub target: PathBuf,
    pub provenance: Option<Provenance>,
    pub started_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(target: PathBuf, provenance: Option<Provenance>) -> Self {
        Self {
            id: SessionId::new(),
            target,
            provenance,
            started_at: Utc::now(),
        }
    }

    /// Rebuild the context of a recorded session
    pub fn from_summary(summary: &SessionSummary) -> Self {
        let provenance = summary.repo_root.as_ref().map(|root| Provenance {
            repo_root: root.clone(),
            commit_hash: summary.commit_hash.clone(),
            dirty: summary.dirty_flag,
        });
        Self {
            id: summary.session_id.clone(),
            target: summary.file.clone(),
            provenance,
            started_at: summary.start_time,
        }
    }

    /// Commit whose content can stand in for the working tree, if any
    pub fn clean_commit(&self) -> Option<(&std::path::Path, &str)> {
        let provenance = self.provenance.as_ref()?;
        if provenance.dirty {
            return None;
        }
        let commit = provenance.commit_hash.as_deref()?;
        Some((provenance.repo_root.as_path(), commit))
    }

    /// Summary row written when the session starts
    pub fn to_summary(&self) -> SessionSummary {
        let mut summary =
            SessionSummary::new(self.id.clone(), self.target.clone(), self.provenance.as_ref());
        summary.start_time = self.started_at;
        summary.updated_at = self.started_at;
        summary
    }
}
