//! Execution orchestrator and its consumer-facing surfaces.

mod drivers;
mod engine;
mod request;
mod updates;

pub use drivers::{MAX_PARALLEL_TASKS, PARALLEL_CONCURRENCY};
pub use engine::Coordinator;
pub use request::{CoordinatorOutcome, CoordinatorRequest, RunDetails, TaskRequest};
pub use updates::{ChannelSink, NullSink, RunUpdate, UpdateSink};
