//! Best-effort incremental updates for a rendering consumer.
//!
//! The orchestrator is agnostic about delivery: consumers implement one
//! method and may drop updates freely; nothing in the run depends on them
//! being observed.

use serde::{Deserialize, Serialize};

use crate::monitor::RunPhase;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunUpdate {
    PhaseChanged {
        phase: RunPhase,
    },
    AgentStarted {
        agent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step: Option<u32>,
    },
    AgentMessage {
        agent: String,
        text: String,
    },
    AgentCompleted {
        agent: String,
        success: bool,
        summary: String,
    },
    Progress {
        running: u32,
        completed: u32,
        total: u32,
    },
    Note {
        text: String,
    },
}

pub trait UpdateSink: Send + Sync {
    fn on_update(&self, update: RunUpdate);
}

/// Sink that drops every update.
#[derive(Debug, Default)]
pub struct NullSink;

impl UpdateSink for NullSink {
    fn on_update(&self, _update: RunUpdate) {}
}

/// Sink that forwards updates into an unbounded channel; useful for tests
/// and for consumers that render from their own task.
pub struct ChannelSink {
    sender: tokio::sync::mpsc::UnboundedSender<RunUpdate>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<RunUpdate>) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl UpdateSink for ChannelSink {
    fn on_update(&self, update: RunUpdate) {
        let _ = self.sender.send(update);
    }
}
