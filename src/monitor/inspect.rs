//! Pure reducer for the coordinator inspector surface (selected run,
//! selected agent, details toggle). Lives out-of-band so a host UI can drive
//! it without touching the orchestrator.

use super::CoordinatorRun;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InspectorState {
    pub selected_run: Option<u64>,
    pub selected_agent: usize,
    pub details: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectorAction {
    SelectRun(u64),
    NextAgent,
    PrevAgent,
    ToggleDetails,
    Clear,
}

pub fn reduce(state: InspectorState, action: InspectorAction, runs: &[CoordinatorRun]) -> InspectorState {
    let agent_count = |id: Option<u64>| -> usize {
        id.and_then(|id| runs.iter().find(|r| r.id == id))
            .map(|r| r.agents.len())
            .unwrap_or(0)
    };

    match action {
        InspectorAction::SelectRun(id) => {
            if runs.iter().any(|r| r.id == id) {
                InspectorState {
                    selected_run: Some(id),
                    selected_agent: 0,
                    details: state.details,
                }
            } else {
                state
            }
        }
        InspectorAction::NextAgent => {
            let count = agent_count(state.selected_run);
            if count == 0 {
                return state;
            }
            InspectorState {
                selected_agent: (state.selected_agent + 1) % count,
                ..state
            }
        }
        InspectorAction::PrevAgent => {
            let count = agent_count(state.selected_run);
            if count == 0 {
                return state;
            }
            InspectorState {
                selected_agent: state.selected_agent.checked_sub(1).unwrap_or(count - 1),
                ..state
            }
        }
        InspectorAction::ToggleDetails => InspectorState {
            details: !state.details,
            ..state
        },
        InspectorAction::Clear => InspectorState::default(),
    }
}
