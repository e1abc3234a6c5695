//! Shared data model and error taxonomy for the turn orchestration engine.

pub mod command;
pub mod env;
pub mod error;
pub mod message;
pub mod session;
pub mod skill;
pub mod state;
pub mod tasks;

pub use command::CommandRecord;
pub use env::{EnvSnapshot, ToolProbe, ToolStatuses};
pub use error::AppError;
pub use message::{reduce_messages, Message, ToolCall, ToolStatus};
pub use session::{Session, SessionStatus};
pub use skill::{Skill, Tier};
pub use state::{NextStep, OrchestratorState, UserMode, MAX_LOOP_COUNT};
pub use tasks::TaskTracker;
