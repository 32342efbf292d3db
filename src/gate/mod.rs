//! Phase gate state machine.
//!
//! Every run carries a topology gate (passed at planning time) and a smoke
//! gate (shell checks after execution, with bounded retries and fix
//! attempts). Gate state is part of the observable surface and mirrors into
//! the coordinator monitor.

mod smoke;

use serde::{Deserialize, Serialize};

pub use smoke::{run_smoke, SmokeFailure};

use crate::error::{CoordinatorError, Result};

pub const DEFAULT_SMOKE_RETRIES: u32 = 1;
pub const MAX_SMOKE_RETRIES: u32 = 5;
pub const DEFAULT_FIX_ATTEMPTS: u32 = 2;
pub const MAX_FIX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gate {
    pub key: String,
    pub required: bool,
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOutcome {
    Success,
    Error,
}

/// One remediation attempt in the smoke fix loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRecord {
    pub attempt: u32,
    pub agent: String,
    pub outcome: FixOutcome,
    pub summary: String,
}

/// Caller-supplied gate parameters, validated into a [`PhaseGate`].
#[derive(Debug, Clone, Default)]
pub struct GateParams {
    pub phase_name: Option<String>,
    pub require_smoke: bool,
    pub smoke_commands: Vec<String>,
    pub smoke_retries: Option<u32>,
    pub max_fix_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseGate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    pub require_smoke: bool,
    pub smoke_commands: Vec<String>,
    pub smoke_max_retries: u32,
    pub smoke_max_fix_attempts: u32,
    pub smoke_attempts: u32,
    pub smoke_fix_attempts: u32,
    pub smoke_fix_history: Vec<FixRecord>,
    pub gates: Vec<Gate>,
}

impl PhaseGate {
    /// Validate parameters and initialize gate state. The topology gate
    /// passes immediately with the decision summary; the smoke gate is
    /// required iff commands are configured or the caller demanded it.
    pub fn new(params: GateParams, topology_summary: String) -> Result<Self> {
        if params.require_smoke && params.smoke_commands.is_empty() {
            return Err(CoordinatorError::InvalidInput(
                "requirePhaseSmoke is set but no phaseSmokeCommands are configured".into(),
            ));
        }
        if params.smoke_commands.iter().any(|c| c.trim().is_empty()) {
            return Err(CoordinatorError::InvalidInput(
                "phaseSmokeCommands must not contain empty commands".into(),
            ));
        }

        let smoke_max_retries = params
            .smoke_retries
            .unwrap_or(DEFAULT_SMOKE_RETRIES)
            .min(MAX_SMOKE_RETRIES);
        let smoke_max_fix_attempts = params
            .max_fix_attempts
            .unwrap_or(DEFAULT_FIX_ATTEMPTS)
            .min(MAX_FIX_ATTEMPTS);

        let smoke_configured = !params.smoke_commands.is_empty();
        let smoke_gate = Gate {
            key: "smoke".into(),
            required: params.require_smoke || smoke_configured,
            status: if params.require_smoke || smoke_configured {
                GateStatus::Pending
            } else {
                GateStatus::Skipped
            },
            detail: (!smoke_configured).then(|| "no smoke commands configured".to_string()),
        };

        Ok(Self {
            phase_name: params.phase_name,
            require_smoke: params.require_smoke,
            smoke_commands: params.smoke_commands,
            smoke_max_retries,
            smoke_max_fix_attempts,
            smoke_attempts: 0,
            smoke_fix_attempts: 0,
            smoke_fix_history: Vec::new(),
            gates: vec![
                Gate {
                    key: "topology".into(),
                    required: true,
                    status: GateStatus::Passed,
                    detail: Some(topology_summary),
                },
                smoke_gate,
            ],
        })
    }

    pub fn smoke_enabled(&self) -> bool {
        !self.smoke_commands.is_empty()
    }

    pub fn gate(&self, key: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.key == key)
    }

    pub fn set_gate(&mut self, key: &str, status: GateStatus, detail: Option<String>) {
        if let Some(gate) = self.gates.iter_mut().find(|g| g.key == key) {
            gate.status = status;
            if detail.is_some() {
                gate.detail = detail;
            }
        }
    }

    pub fn record_fix(&mut self, agent: &str, outcome: FixOutcome, summary: String) {
        self.smoke_fix_history.push(FixRecord {
            attempt: self.smoke_fix_attempts,
            agent: agent.to_string(),
            outcome,
            summary,
        });
    }

    /// Compact one-line rendition for the governance snapshot.
    pub fn summary(&self) -> String {
        let gates: Vec<String> = self
            .gates
            .iter()
            .map(|g| format!("{}={:?}", g.key, g.status).to_lowercase())
            .collect();
        let mut out = gates.join(" ");
        if self.smoke_attempts > 0 {
            out.push_str(&format!(
                " (smoke attempts {}, fixes {}/{})",
                self.smoke_attempts, self.smoke_fix_attempts, self.smoke_max_fix_attempts
            ));
        }
        out
    }
}
