//! Filesystem isolation via version-controlled worktree lanes.
//!
//! Write-heavy work runs in per-lane worktrees on namespaced branches; the
//! resulting patches are integrated back onto the repository root with a
//! three-way apply after the children exit.

mod decide;
mod integrate;
mod session;

pub use decide::{decide_isolation, IsolationMode, IsolationRequest, READ_ONLY_KEYWORDS, WRITE_KEYWORDS};
pub use integrate::{integrate_lane, IntegrationReport, LaneIntegration};
pub use session::{sanitize_label, LaneAssignment, WorktreeSession, DEFAULT_BASE_DIR};
