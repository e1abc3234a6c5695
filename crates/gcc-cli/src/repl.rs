//! Interactive turn loop: reads utterances from stdin, drives one
//! `Orchestrator::run_turn` per line, and owns the panic boundary (spec §4.H
//! "any uncaught exception... triggers atomic state preservation, then
//! re-raises"; §7 "Fatal (uncaught): panic path writes panic_state.*, then
//! the turn ends... CLI keeps running").
//!
//! `std::panic::catch_unwind` doesn't compose with `.await`, so each turn
//! runs as its own `tokio::spawn`ed task; `JoinError::is_panic()` is the
//! actual panic-isolation primitive this boundary relies on, grounded on
//! tokio's own task-isolation guarantee (the teacher never needed this,
//! since `cli-sub-agent`'s commands are one-shot rather than a turn loop).

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gcc_collab::{LlmCollaborator, VectorStore};
use gcc_core::{AppError, OrchestratorState, UserMode};
use gcc_orchestrator::{ApprovalPrompt, Orchestrator};

/// The last node's checkpoint write happened before the panic, so it is
/// still the most accurate recoverable state; fall back to a fresh state
/// only if even that is unavailable.
fn reload_last_checkpoint(session_root: &Path, session_id: &str, goal: &str) -> OrchestratorState {
    gcc_checkpoint::Checkpointer::new(session_root)
        .ok()
        .and_then(|checkpointer| {
            checkpointer
                .get_tuple(&gcc_checkpoint::CheckpointConfig::for_thread(session_id))
                .ok()
                .flatten()
        })
        .map(|tuple| tuple.checkpoint)
        .unwrap_or_else(|| OrchestratorState::new(session_id.to_string(), goal.to_string(), UserMode::Auto))
}

struct StdinApprovalPrompt;

#[async_trait]
impl ApprovalPrompt for StdinApprovalPrompt {
    async fn ask(&mut self, prompt: &str) -> String {
        print!("{prompt} ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim().to_string()
    }
}

/// Reads utterances from stdin until EOF, driving the orchestrator one turn
/// per line. A panicking turn preserves minimal session identity to
/// `panic_state.json` and the loop continues with the next line (spec §7).
pub async fn run<L, V>(
    orchestrator: Arc<tokio::sync::Mutex<Orchestrator<L, V>>>,
    mut state: OrchestratorState,
    session_root: &Path,
) -> Result<(), AppError>
where
    L: LlmCollaborator + 'static,
    V: VectorStore + 'static,
{
    let session_id = state.session_id.clone();
    let goal = state.goal.clone();
    let session_root = session_root.to_path_buf();

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).unwrap_or(0) == 0 {
            return Ok(());
        }
        let utterance = line.trim().to_string();
        if utterance.is_empty() {
            continue;
        }
        if utterance == "exit" || utterance == "quit" {
            return Ok(());
        }

        let orchestrator = Arc::clone(&orchestrator);
        let result = tokio::spawn(async move {
            let mut orchestrator = orchestrator.lock().await;
            let mut approval = StdinApprovalPrompt;
            let outcome = orchestrator.run_turn(&mut state, &utterance, &mut approval).await;
            (state, outcome)
        })
        .await;

        match result {
            Ok((returned_state, Ok(()))) => {
                state = returned_state;
            }
            Ok((returned_state, Err(err))) => {
                eprintln!("error: {err}");
                state = returned_state;
            }
            Err(join_err) if join_err.is_panic() => {
                eprintln!("internal error: turn panicked, preserving session state");
                if let Err(err) = gcc_checkpoint::write_panic_state(&session_root, &session_id, &goal) {
                    eprintln!("failed to preserve panic state: {err}");
                }
                state = reload_last_checkpoint(&session_root, &session_id, &goal);
            }
            Err(join_err) => {
                eprintln!("internal error: turn task was cancelled: {join_err}");
                return Ok(());
            }
        }
    }
}
