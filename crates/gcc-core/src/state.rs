use serde::{Deserialize, Serialize};

use crate::env::EnvSnapshot;
use crate::message::{reduce_messages, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserMode {
    Auto,
    Exec,
    Chat,
}

/// Hint for the Router/AuditGate about what should happen next (spec §4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Continue,
    Reprobe,
    CircuitBreak,
}

/// Maximum number of Audit visits before an unconditional circuit break
/// (spec §3 Invariant 3, §8 property 9).
pub const MAX_LOOP_COUNT: u32 = 10;

/// Per-thread orchestration state, checkpointed atomically after every node
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub messages: Vec<Message>,
    pub session_id: String,
    pub goal: String,
    pub env: Option<EnvSnapshot>,
    pub fingerprint: Option<String>,
    pub last_synced_count: usize,
    pub loop_count: u32,
    pub denial_reason: Option<String>,
    pub next_step: NextStep,
    pub user_mode: UserMode,
}

impl OrchestratorState {
    pub fn new(session_id: impl Into<String>, goal: impl Into<String>, user_mode: UserMode) -> Self {
        Self {
            messages: Vec::new(),
            session_id: session_id.into(),
            goal: goal.into(),
            env: None,
            fingerprint: None,
            last_synced_count: 0,
            loop_count: 0,
            denial_reason: None,
            next_step: NextStep::Continue,
            user_mode,
        }
    }

    /// Apply a batch of message updates via the shared reducer (spec §4.H).
    ///
    /// This is the only entry point nodes use to mutate `messages`; direct
    /// truncation is forbidden (spec §3 Invariant 1/§4.H).
    pub fn apply(&mut self, updates: Vec<Message>) {
        reduce_messages(&mut self.messages, updates);
    }

    /// `last_synced_count` is monotonic non-decreasing (spec §3 Invariant 2).
    pub fn advance_synced_count(&mut self, new_count: usize) {
        if new_count > self.last_synced_count {
            self.last_synced_count = new_count;
        }
    }

    /// Increment `loop_count`; returns `true` once it exceeds the bound
    /// (spec §3 Invariant 3 / §4.H Audit step 1 / §8 property 9).
    pub fn increment_loop_count(&mut self) -> bool {
        self.loop_count += 1;
        self.loop_count > MAX_LOOP_COUNT
    }

    pub fn last_ai_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_ai())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
