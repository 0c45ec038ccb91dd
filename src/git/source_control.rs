//! Source-control provenance of debugged files

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::data::Provenance;

/// Read access to the version-control state of a target
pub trait SourceControl: Send + Sync {
    /// Repository root, HEAD commit and dirty flag for the repository containing `path`.
    /// `None` when `path` is not inside a repository.
    fn provenance(&self, path: &Path) -> Option<Provenance>;

    /// Content of `path` as committed at `commit`, if it was tracked then
    fn file_at_commit(&self, repo_root: &Path, commit: &str, path: &Path) -> Option<String>;
}

/// `SourceControl` backed by the `git` command line
#[derive(Debug, Clone)]
pub struct GitCli {
    git: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self {
            git: which::which("git").unwrap_or_else(|_| PathBuf::from("git")),
        }
    }

    /// Run git in `dir`; stdout on success
    fn run(&self, dir: &Path, args: &[&str]) -> Option<String> {
        let output = Command::new(&self.git)
            .args(args)
            .current_dir(dir)
            .output();

        match output {
            Ok(o) if o.status.success() => Some(String::from_utf8_lossy(&o.stdout).into_owned()),
            Ok(o) => {
                tracing::debug!(
                    args = ?args,
                    dir = %dir.display(),
                    stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                    "git command failed"
                );
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "git is not runnable");
                None
            }
        }
    }
}

impl SourceControl for GitCli {
    fn provenance(&self, path: &Path) -> Option<Provenance> {
        let dir = if path.is_dir() {
            path
        } else {
            path.parent().filter(|p| !p.as_os_str().is_empty())?
        };

        let root = self.run(dir, &["rev-parse", "--show-toplevel"])?;
        let repo_root = PathBuf::from(root.trim());

        // Unborn HEAD (no commits yet) leaves the commit unset
        let commit_hash = self
            .run(&repo_root, &["rev-parse", "HEAD"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let dirty = self
            .run(&repo_root, &["status", "--porcelain"])
            .map(|s| !s.trim().is_empty())
            .unwrap_or(true);

        tracing::debug!(
            repo_root = %repo_root.display(),
            commit = ?commit_hash,
            dirty,
            "Detected provenance"
        );

        Some(Provenance {
            repo_root,
            commit_hash,
            dirty,
        })
    }

    fn file_at_commit(&self, repo_root: &Path, commit: &str, path: &Path) -> Option<String> {
        let relative = relative_to_root(repo_root, path)?;
        let revision = format!("{commit}:{relative}");
        self.run(repo_root, &["show", &revision])
    }
}

/// `path` relative to `root` with `/` separators, resolving symlinked roots
fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel.to_path_buf(),
        Err(_) => {
            let root = root.canonicalize().ok()?;
            let path = path.canonicalize().ok()?;
            path.strip_prefix(&root).ok()?.to_path_buf()
        }
    };
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
