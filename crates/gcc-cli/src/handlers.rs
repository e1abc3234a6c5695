//! Subcommand handlers: session creation/resumption, listing, and the
//! nuclear reset. Grounded on `cli-sub-agent::session_cmds`'s handler-per-
//! subcommand shape, narrowed to this spec's four commands.

use std::io::Write;
use std::sync::Arc;

use gcc_checkpoint::{CheckpointConfig, Checkpointer};
use gcc_collab::{OllamaCollaborator, SqliteVectorStore};
use gcc_config::GccConfig;
use gcc_core::{AppError, OrchestratorState, Session, UserMode};
use gcc_index::SessionIndex;
use gcc_orchestrator::Orchestrator;

use crate::session;

fn build_planner(config: &GccConfig) -> OllamaCollaborator {
    OllamaCollaborator::new(
        config.planner.host.clone(),
        config.planner.model.clone(),
        config.planner.temperature,
        config.planner.context_size,
        std::time::Duration::from_secs(config.planner.timeout_secs),
    )
}

fn build_reflex(config: &GccConfig) -> Option<OllamaCollaborator> {
    if !config.fast_path_enabled {
        return None;
    }
    Some(OllamaCollaborator::new(
        config.reflex.host.clone(),
        config.reflex.model.clone(),
        config.reflex.temperature,
        config.reflex.context_size,
        std::time::Duration::from_secs(config.reflex.timeout_secs),
    ))
}

/// Build the orchestrator plus its fresh turn state for a given session.
/// Shared by both `new` and `continue-session` once the `Session` record
/// itself has been created/loaded.
async fn build_orchestrator(
    config: &GccConfig,
    session: &Session,
) -> Result<(Orchestrator<OllamaCollaborator, SqliteVectorStore>, OrchestratorState), AppError> {
    let planner = Arc::new(build_planner(config));
    let reflex = build_reflex(config).map(Arc::new);

    let vector_store_path = std::path::Path::new(&config.gcc_base_path)
        .join("vector_store")
        .join("store.db");
    let embedder: Arc<dyn gcc_collab::LlmCollaborator> = planner.clone();
    let vector_store = Arc::new(SqliteVectorStore::open(&vector_store_path, embedder)?);

    let index_path = std::path::Path::new(&config.gcc_base_path).join("intelligence.db");
    let index = Arc::new(SessionIndex::open(&index_path)?);
    index.insert_session(&session.id, &session.goal, &session.root, None, session.parent_id.as_deref())?;

    let skills = gcc_classifier::load::load_skills_dir(std::path::Path::new(&config.skills_path));

    let orchestrator = Orchestrator::new(
        session.root.clone(),
        planner,
        reflex,
        vector_store,
        index,
        skills,
        config.fast_path_enabled,
        std::time::Duration::from_secs(config.command_timeout_secs),
    )?;

    let checkpointer = Checkpointer::new(&session.root)?;
    let state = checkpointer
        .get_tuple(&CheckpointConfig::for_thread(&session.id))?
        .map(|tuple| tuple.checkpoint)
        .unwrap_or_else(|| OrchestratorState::new(session.id.clone(), session.goal.clone(), UserMode::Auto));

    Ok((orchestrator, state))
}

pub async fn handle_new(config: &GccConfig, goal: &str, debug: bool) -> Result<i32, AppError> {
    if debug {
        eprintln!("debug: creating session for goal {goal:?}");
    }
    let id = session::new_session_id(goal);
    let root = session::sessions_dir(&config.gcc_base_path).join(&id);
    let new_session = Session::new(&id, goal, root.clone());
    session::save_session(&new_session)?;

    println!("created session {id}");
    let (orchestrator, state) = build_orchestrator(config, &new_session).await?;
    let orchestrator = Arc::new(tokio::sync::Mutex::new(orchestrator));
    crate::repl::run(orchestrator, state, &root).await?;
    Ok(0)
}

pub async fn handle_continue_session(config: &GccConfig, id: Option<&str>, debug: bool) -> Result<i32, AppError> {
    let sessions_dir = session::sessions_dir(&config.gcc_base_path);
    let resolved_id = session::resolve_session(&sessions_dir, id)?;
    if debug {
        eprintln!("debug: resuming session {resolved_id}");
    }
    let existing = session::load_session(&sessions_dir, &resolved_id)?;

    println!("resuming session {resolved_id}");
    let (orchestrator, state) = build_orchestrator(config, &existing).await?;
    let orchestrator = Arc::new(tokio::sync::Mutex::new(orchestrator));
    crate::repl::run(orchestrator, state, &existing.root).await?;
    Ok(0)
}

pub fn handle_list_sessions(config: &GccConfig, format: crate::cli::OutputFormat) -> Result<i32, AppError> {
    let index_path = std::path::Path::new(&config.gcc_base_path).join("intelligence.db");
    let index = SessionIndex::open(&index_path)?;
    let sessions = index.list_sessions(None)?;

    if format == crate::cli::OutputFormat::Json {
        let rows: Vec<_> = sessions
            .iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.id,
                    "title": row.title,
                    "goal": row.goal,
                    "status": row.status,
                })
            })
            .collect();
        println!("{}", serde_json::Value::Array(rows));
        return Ok(0);
    }

    if sessions.is_empty() {
        println!("no sessions found");
        return Ok(0);
    }
    for row in sessions {
        println!(
            "{}  {}  [{}]",
            row.id,
            row.title.unwrap_or_else(|| row.goal.clone()),
            row.status
        );
    }
    Ok(0)
}

pub fn handle_reset(config: &GccConfig, nuclear: bool) -> Result<i32, AppError> {
    if !nuclear {
        eprintln!("reset requires --nuclear to confirm a full purge");
        return Ok(1);
    }

    print!("This will permanently delete all sessions and the session index. Type 'yes' to confirm: ");
    let _ = std::io::stdout().flush();
    let mut confirmation = String::new();
    std::io::stdin()
        .read_line(&mut confirmation)
        .map_err(|e| AppError::Fatal(e.to_string()))?;
    if confirmation.trim() != "yes" {
        println!("reset cancelled");
        return Ok(0);
    }

    let index_path = std::path::Path::new(&config.gcc_base_path).join("intelligence.db");
    if index_path.exists() {
        let index = SessionIndex::open(&index_path)?;
        index.reset_all()?;
    }

    let sessions_dir = session::sessions_dir(&config.gcc_base_path);
    if sessions_dir.exists() {
        std::fs::remove_dir_all(&sessions_dir).map_err(|e| AppError::Fatal(e.to_string()))?;
    }
    let archived_dir = std::path::Path::new(&config.gcc_base_path).join("archived");
    if archived_dir.exists() {
        std::fs::remove_dir_all(&archived_dir).map_err(|e| AppError::Fatal(e.to_string()))?;
    }

    println!("all sessions purged");
    Ok(0)
}
