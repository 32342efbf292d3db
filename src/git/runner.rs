use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CoordinatorError, Result};

/// Async runner for git porcelain in a fixed working directory.
pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "Running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(args = ?args, stderr = %stderr, "Git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoordinatorError::Git(git2::Error::from_str(stderr.trim())));
        }

        Ok(output)
    }

    pub async fn rev_parse_head(&self) -> Result<String> {
        let output = self.run_checked(&["rev-parse", "HEAD"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn branch_head(&self, branch: &str) -> Result<Option<String>> {
        let output = self
            .run(&["rev-parse", "--verify", &format!("refs/heads/{}", branch)])
            .await?;
        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<bool> {
        let output = self.run(&["branch", "-D", branch]).await?;
        Ok(output.status.success())
    }

    /// Create a worktree at `path` on a new branch off current HEAD.
    pub async fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_str().ok_or_else(|| CoordinatorError::Worktree {
            message: "invalid path encoding".into(),
            path: path.to_path_buf(),
        })?;

        let output = self
            .run(&["worktree", "add", "-b", branch, path_str, "HEAD"])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoordinatorError::Worktree {
                message: stderr.trim().to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path.to_str().ok_or_else(|| CoordinatorError::Worktree {
            message: "invalid path encoding".into(),
            path: path.to_path_buf(),
        })?;

        let output = self
            .run(&["worktree", "remove", "--force", path_str])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoordinatorError::Worktree {
                message: stderr.trim().to_string(),
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    /// Full binary diff from `base` to HEAD, suitable for three-way apply.
    pub async fn diff_binary(&self, base: &str) -> Result<Vec<u8>> {
        let output = self.run_checked(&["diff", "--binary", base, "HEAD"]).await?;
        Ok(output.stdout)
    }

    /// Paths changed between `base` and HEAD.
    pub async fn diff_names(&self, base: &str) -> Result<Vec<String>> {
        let output = self.run_checked(&["diff", "--name-only", base, "HEAD"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Three-way apply of a patch onto this working tree.
    pub async fn apply_3way(&self, patch: &[u8]) -> Result<()> {
        let mut child = Command::new("git")
            .args(["apply", "--3way", "--whitespace=nowarn", "-"])
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(patch).await?;
        }
        drop(child.stdin.take());

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(stderr = %stderr, "Three-way apply failed");
            return Err(CoordinatorError::Git(git2::Error::from_str(stderr.trim())));
        }

        Ok(())
    }

    pub async fn commit_all(&self, message: &str) -> Result<bool> {
        self.run_checked(&["add", "-A"]).await?;
        let output = self.run(&["commit", "-m", message]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stderr.contains("nothing to commit") || stdout.contains("nothing to commit") {
                return Ok(false);
            }
            return Err(CoordinatorError::Git(git2::Error::from_str(stderr.trim())));
        }

        Ok(true)
    }
}
