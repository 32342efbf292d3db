use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::session::LaneAssignment;
use crate::git::GitRunner;

/// Outcome of integrating one lane back onto the repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LaneIntegration {
    Applied { files: usize },
    Skipped,
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub lane_id: String,
    #[serde(flatten)]
    pub integration: LaneIntegration,
}

impl IntegrationReport {
    pub fn failed(&self) -> Option<&str> {
        match &self.integration {
            LaneIntegration::Failed { message } => Some(message),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.integration {
            LaneIntegration::Applied { files } => {
                format!("{}: applied {} file(s)", self.lane_id, files)
            }
            LaneIntegration::Skipped => format!("{}: no changes", self.lane_id),
            LaneIntegration::Failed { message } => format!("{}: {}", self.lane_id, message),
        }
    }
}

/// Capture the lane's binary diff against its base head and three-way apply
/// it at the repository root.
pub async fn integrate_lane(repo_root: &std::path::Path, lane: &LaneAssignment) -> IntegrationReport {
    let lane_git = GitRunner::new(&lane.worktree_path);

    let patch = match lane_git.diff_binary(&lane.base_head).await {
        Ok(patch) => patch,
        Err(e) => {
            warn!(lane = %lane.id, error = %e, "Failed to capture lane patch");
            return IntegrationReport {
                lane_id: lane.id.clone(),
                integration: LaneIntegration::Failed {
                    message: format!("patch capture failed: {e}"),
                },
            };
        }
    };

    if patch.is_empty() {
        debug!(lane = %lane.id, "Lane has no changes, skipping integration");
        return IntegrationReport {
            lane_id: lane.id.clone(),
            integration: LaneIntegration::Skipped,
        };
    }

    let files = lane_git
        .diff_names(&lane.base_head)
        .await
        .map(|names| names.len())
        .unwrap_or(0);

    let root_git = GitRunner::new(repo_root);
    match root_git.apply_3way(&patch).await {
        Ok(()) => {
            info!(lane = %lane.id, files, "Integrated lane onto repository root");
            IntegrationReport {
                lane_id: lane.id.clone(),
                integration: LaneIntegration::Applied { files },
            }
        }
        Err(e) => IntegrationReport {
            lane_id: lane.id.clone(),
            integration: LaneIntegration::Failed {
                message: format!("three-way apply failed: {e}"),
            },
        },
    }
}
