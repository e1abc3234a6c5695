//! Checkpointer (spec §4.D): durable per-thread orchestration snapshots
//! with a pending-writes side-log, keyed by `(thread_id, checkpoint_id)`.
//!
//! Atomic temp+rename mechanics grounded on
//! `csa-memory::store::rewrite_all`; payload shape grounded on
//! `original_source/src/gcc/checkpointer.py`.

use std::fs;
use std::path::{Path, PathBuf};

use gcc_core::state::OrchestratorState;
use gcc_core::AppError;
use serde::{Deserialize, Serialize};

/// Addresses a specific checkpoint of a thread, mirroring the original's
/// `config["configurable"]` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub thread_id: String,
    pub checkpoint_id: Option<String>,
}

impl CheckpointConfig {
    pub fn for_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointPayload {
    checkpoint: OrchestratorState,
    metadata: serde_json::Value,
    parent_config: Option<CheckpointConfig>,
}

/// A loaded checkpoint plus its addressing config and metadata.
#[derive(Debug, Clone)]
pub struct CheckpointTuple {
    pub config: CheckpointConfig,
    pub checkpoint: OrchestratorState,
    pub metadata: serde_json::Value,
    pub parent_config: Option<CheckpointConfig>,
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;
    fs::write(&tmp_path, json).map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;
    fs::rename(&tmp_path, path).map_err(|e| AppError::CheckpointWriteError(e.to_string()))
}

/// Preserve minimal session identity atomically to `panic_state.json` in the
/// session root (spec §4.H panic path), using the same temp+rename
/// primitive as the checkpoint store itself.
pub fn write_panic_state(session_root: &Path, session_id: &str, goal: &str) -> Result<(), AppError> {
    #[derive(Serialize)]
    struct PanicState<'a> {
        session_id: &'a str,
        goal: &'a str,
        timestamp: chrono::DateTime<chrono::Utc>,
    }

    atomic_write_json(
        &session_root.join("panic_state.json"),
        &PanicState {
            session_id,
            goal,
            timestamp: chrono::Utc::now(),
        },
    )
}

/// Durable, atomic-write checkpoint store rooted at `<session>/checkpoints`.
pub struct Checkpointer {
    checkpoint_dir: PathBuf,
}

impl Checkpointer {
    pub fn new(session_root: &Path) -> Result<Self, AppError> {
        let checkpoint_dir = session_root.join("checkpoints");
        fs::create_dir_all(&checkpoint_dir)
            .map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;
        Ok(Self { checkpoint_dir })
    }

    fn checkpoint_path(&self, thread_id: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{thread_id}.json"))
    }

    fn writes_path(&self, thread_id: &str, task_id: &str) -> PathBuf {
        self.checkpoint_dir
            .join(format!("{thread_id}_writes_{task_id}.json"))
    }

    /// Persist `checkpoint`/`metadata` atomically and return the config
    /// addressing the newly written checkpoint (spec §4.D).
    pub fn put(
        &self,
        config: &CheckpointConfig,
        checkpoint: OrchestratorState,
        metadata: serde_json::Value,
    ) -> Result<CheckpointConfig, AppError> {
        let checkpoint_id = ulid::Ulid::new().to_string();
        let payload = CheckpointPayload {
            checkpoint,
            metadata,
            parent_config: config.checkpoint_id.as_ref().map(|_| config.clone()),
        };
        let path = self.checkpoint_path(&config.thread_id);
        atomic_write_json(&path, &payload)?;

        Ok(CheckpointConfig {
            thread_id: config.thread_id.clone(),
            checkpoint_id: Some(checkpoint_id),
        })
    }

    /// Load the current snapshot for a thread, or `None` if it has never
    /// been checkpointed.
    pub fn get_tuple(&self, config: &CheckpointConfig) -> Result<Option<CheckpointTuple>, AppError> {
        let path = self.checkpoint_path(&config.thread_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;
        let payload: CheckpointPayload =
            serde_json::from_str(&text).map_err(|e| AppError::CheckpointWriteError(e.to_string()))?;

        Ok(Some(CheckpointTuple {
            config: config.clone(),
            checkpoint: payload.checkpoint,
            metadata: payload.metadata,
            parent_config: payload.parent_config,
        }))
    }

    /// Persist a side-log of pending channel writes (tool calls held while
    /// awaiting approval) so they survive a crash before the main
    /// checkpoint is written.
    pub fn put_writes(
        &self,
        config: &CheckpointConfig,
        writes: &serde_json::Value,
        task_id: &str,
    ) -> Result<(), AppError> {
        let path = self.writes_path(&config.thread_id, task_id);
        atomic_write_json(&path, writes)
    }

    /// Scan the checkpoint directory, ignoring pending-write side files,
    /// in filename order.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<CheckpointTuple>, AppError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.checkpoint_dir)
            .map_err(|e| AppError::CheckpointWriteError(e.to_string()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "json")
                    && !p
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.contains("_writes_"))
            })
            .collect();
        entries.sort();

        let mut results = Vec::new();
        for path in entries {
            let Some(thread_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let config = CheckpointConfig::for_thread(thread_id);
            if let Some(tuple) = self.get_tuple(&config)? {
                results.push(tuple);
            }
            if let Some(limit) = limit {
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }
}
