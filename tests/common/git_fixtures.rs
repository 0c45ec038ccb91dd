//! Git repository test fixtures
//!
//! Temporary repositories holding debuggable scripts in a clean or dirty state.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// A temporary git repository for testing
///
/// The repository is removed when the `TestRepo` is dropped.
/// `path` is canonical so it compares equal to `git rev-parse --show-toplevel`.
pub struct TestRepo {
    /// TempDir handle (keeps directory alive until dropped)
    _dir: TempDir,
    /// Path to the repository root
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository with an initial commit
    ///
    /// The repository will have:
    /// - Git initialized
    /// - User configured (test@example.com)
    /// - GPG signing disabled (for CI compatibility)
    /// - A README.md file
    /// - One initial commit
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir
            .path()
            .canonicalize()
            .expect("Failed to canonicalize temp dir");

        Self::git(&path, &["init"]);
        Self::git(&path, &["config", "user.email", "test@example.com"]);
        Self::git(&path, &["config", "user.name", "Test User"]);
        // Disable GPG signing to ensure tests work on machines with global signing enabled
        Self::git(&path, &["config", "commit.gpgsign", "false"]);

        std::fs::write(path.join("README.md"), "# Test Repository\n").unwrap();
        Self::git(&path, &["add", "."]);
        Self::git(&path, &["commit", "-m", "Initial commit"]);

        Self { _dir: dir, path }
    }

    /// A repository whose only change is the committed script
    pub fn with_script(filename: &str, content: &str) -> (Self, PathBuf) {
        let repo = Self::new();
        repo.commit_file(filename, content, "Add script");
        let script = repo.path.join(filename);
        (repo, script)
    }

    /// Add a file and commit it
    pub fn commit_file(&self, filename: &str, content: &str, message: &str) {
        self.create_file(filename, content);
        Self::git(&self.path, &["add", filename]);
        Self::git(&self.path, &["commit", "-m", message]);
    }

    /// Create a file without staging or committing.
    /// Creates parent directories if they don't exist.
    pub fn create_file(&self, filename: &str, content: &str) {
        let file_path = self.path.join(filename);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file_path, content).unwrap();
    }

    /// Check if the repository has uncommitted changes
    pub fn is_dirty(&self) -> bool {
        !self.git_output(&["status", "--porcelain"]).trim().is_empty()
    }

    /// Get the HEAD commit SHA
    pub fn head_sha(&self) -> String {
        self.git_output(&["rev-parse", "HEAD"]).trim().to_string()
    }

    /// Execute a git command in the repository
    fn git(path: &Path, args: &[&str]) {
        let output = Command::new("git")
            .args(args)
            .current_dir(path)
            .output()
            .unwrap_or_else(|e| panic!("Git command failed to execute: {}", e));

        if !output.status.success() {
            panic!(
                "Git command failed: git {}\nstderr: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }
    }

    /// Execute a git command and return output (for queries)
    pub fn git_output(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .expect("Git command failed");

        if !output.status.success() {
            panic!(
                "Git command failed: git {}\nstderr: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }

        String::from_utf8_lossy(&output.stdout).to_string()
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_creation() {
        let repo = TestRepo::new();
        assert!(repo.path.join(".git").exists());
        assert!(!repo.is_dirty());
    }

    #[test]
    fn test_with_script_is_clean() {
        let (repo, script) = TestRepo::with_script("app/main.py", "x = 1\n");
        assert!(script.exists());
        assert!(!repo.is_dirty());
        assert_eq!(repo.head_sha().len(), 40);
    }

    #[test]
    fn test_create_file_makes_repo_dirty() {
        let repo = TestRepo::new();
        repo.create_file("src/nested/scratch.py", "pass\n");
        assert!(repo.is_dirty());
    }
}
