use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, info, warn};

use crate::error::{CoordinatorError, Result};
use crate::git::GitRunner;

/// Default lane directory, relative to the repository root.
pub const DEFAULT_BASE_DIR: &str = ".pi/worktrees";

/// One worktree lane bound to one execution unit.
#[derive(Debug, Clone)]
pub struct LaneAssignment {
    pub id: String,
    pub label: String,
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub base_head: String,
}

/// All lanes of one run, rooted in one repository.
pub struct WorktreeSession {
    pub run_id: String,
    pub repo_root: PathBuf,
    pub base_dir: PathBuf,
    pub assignments: Vec<LaneAssignment>,
}

impl WorktreeSession {
    /// Discover the repository containing `cwd`. `None` means worktree
    /// isolation is unavailable and the caller should downgrade to shared.
    pub fn discover_repo(cwd: &Path) -> Option<PathBuf> {
        match Repository::discover(cwd) {
            Ok(repo) => repo.workdir().map(Path::to_path_buf),
            Err(e) => {
                debug!(cwd = %cwd.display(), error = %e, "Not inside a git repository");
                None
            }
        }
    }

    pub fn new(run_id: &str, repo_root: PathBuf, base_dir_override: Option<&Path>) -> Self {
        let base_dir = match base_dir_override {
            Some(dir) if dir.is_absolute() => dir.to_path_buf(),
            Some(dir) => repo_root.join(dir),
            None => repo_root.join(DEFAULT_BASE_DIR),
        };
        Self {
            run_id: run_id.to_string(),
            repo_root,
            base_dir,
            assignments: Vec::new(),
        }
    }

    fn git(&self) -> GitRunner {
        GitRunner::new(&self.repo_root)
    }

    /// Create the next lane: a branch off current HEAD plus a fresh worktree.
    pub async fn add_lane(&mut self, label: &str) -> Result<LaneAssignment> {
        let ordinal = self.assignments.len() + 1;
        let id = format!("{}-{}", sanitize_label(label), ordinal);
        let branch_name = format!("pi/subagent/{}/{}", self.run_id, id);
        let worktree_path = self.base_dir.join(format!("{}-{}", self.run_id, id));

        if worktree_path.exists() {
            return Err(CoordinatorError::Worktree {
                message: "lane path already exists".into(),
                path: worktree_path,
            });
        }
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let git = self.git();
        let base_head = git.rev_parse_head().await?;
        git.worktree_add(&worktree_path, &branch_name).await?;

        info!(lane = %id, path = %worktree_path.display(), branch = %branch_name, "Created worktree lane");

        let assignment = LaneAssignment {
            id,
            label: label.to_string(),
            branch_name,
            worktree_path,
            base_head,
        };
        self.assignments.push(assignment.clone());
        Ok(assignment)
    }

    /// Map a requested cwd into a lane. Paths outside the repository fall
    /// back to the lane root with a warning; paths inside keep their
    /// position relative to the repository root.
    pub fn lane_cwd(&self, lane: &LaneAssignment, requested: Option<&Path>) -> (PathBuf, Option<String>) {
        let Some(requested) = requested else {
            return (lane.worktree_path.clone(), None);
        };
        match requested.strip_prefix(&self.repo_root) {
            Ok(relative) => (lane.worktree_path.join(relative), None),
            Err(_) => {
                let warning = format!(
                    "requested cwd {} is outside the repository; using lane root",
                    requested.display()
                );
                warn!(lane = %lane.id, "{warning}");
                (lane.worktree_path.clone(), Some(warning))
            }
        }
    }

    /// Remove every lane worktree and delete branches that received no
    /// commits. Failures are reported as warnings, never errors.
    pub async fn cleanup(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let git = self.git();

        for lane in &self.assignments {
            if let Err(e) = git.worktree_remove(&lane.worktree_path).await {
                debug!(lane = %lane.id, error = %e, "git worktree remove failed, force-deleting");
                if let Err(e) = tokio::fs::remove_dir_all(&lane.worktree_path).await
                    && lane.worktree_path.exists()
                {
                    warnings.push(format!(
                        "failed to remove lane {} at {}: {}",
                        lane.id,
                        lane.worktree_path.display(),
                        e
                    ));
                    continue;
                }
            }
            // Residual directory after a successful remove is rare but possible
            // when the child left locked files behind.
            if lane.worktree_path.exists()
                && let Err(e) = tokio::fs::remove_dir_all(&lane.worktree_path).await
            {
                warnings.push(format!(
                    "lane {} left residue at {}: {}",
                    lane.id,
                    lane.worktree_path.display(),
                    e
                ));
            }

            match git.branch_head(&lane.branch_name).await {
                Ok(Some(head)) if head == lane.base_head => {
                    if !git.delete_branch(&lane.branch_name).await.unwrap_or(false) {
                        warnings.push(format!("failed to delete branch {}", lane.branch_name));
                    }
                }
                Ok(Some(_)) => {
                    debug!(branch = %lane.branch_name, "Branch received commits, keeping");
                }
                Ok(None) => {}
                Err(e) => warnings.push(format!(
                    "could not inspect branch {}: {}",
                    lane.branch_name, e
                )),
            }
        }

        warnings
    }
}

/// Lowercase a lane label and keep only `[a-z0-9._-]`, collapsing runs of
/// separators.
pub fn sanitize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_was_sep = true;
    for c in label.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('-');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "lane".to_string()
    } else {
        trimmed
    }
}
