//! Log Store (spec §4.C): append-only `log.md`/`commit.md` per session.
//!
//! Grounded on `original_source/src/gcc/log.py`'s `OTAEntry`/`HumanEntry`
//! and `src/gcc/storage.py`'s `atomic_write`/`atomic_append`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use gcc_core::AppError;
use gcc_sanitize::redact_plain_text;

const TRUNCATE_LIMIT: usize = 5000;
const TRUNCATE_TAIL: &str = "\n... (truncated for log brevity)";

fn redact_and_truncate(text: &str) -> String {
    let redacted = redact_plain_text(text);
    if redacted.len() > TRUNCATE_LIMIT {
        let mut truncated = redacted.chars().take(TRUNCATE_LIMIT).collect::<String>();
        truncated.push_str(TRUNCATE_TAIL);
        truncated
    } else {
        redacted
    }
}

fn redact_only(text: &str) -> String {
    redact_plain_text(text)
}

/// An AI turn's observation/thought/action/output/inference, redacted and
/// truncated independently per field (spec §4.C).
pub struct OtaEntry {
    pub timestamp: String,
    pub observation: String,
    pub thought: String,
    pub action: String,
    pub output: String,
    pub inference: String,
}

impl OtaEntry {
    pub fn new(observation: &str, thought: &str, action: &str, output: &str, inference: &str) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M").to_string(),
            observation: redact_only(observation),
            thought: redact_only(thought),
            action: redact_only(action),
            output: redact_and_truncate(output),
            inference: redact_only(inference),
        }
    }

    pub fn to_markdown(&self) -> String {
        let observation = if self.observation.is_empty() { "N/A" } else { &self.observation };
        let thought = if self.thought.is_empty() { "N/A" } else { &self.thought };
        let output = if self.output.is_empty() { "(No output)" } else { &self.output };
        let inference = if self.inference.is_empty() { "N/A" } else { &self.inference };

        format!(
            "\n## [{}] AI: {}\n**OBSERVATION:** {}\n\n**THOUGHT:** {}\n\n**OUTPUT:**\n```bash\n{}\n```\n\n**INFERENCE:** {}\n\n---\n",
            self.timestamp, self.action, observation, thought, output, inference
        )
    }
}

/// A human-issued command and its raw output (spec §4.C).
pub struct HumanEntry {
    pub timestamp: String,
    pub command: String,
    pub output: String,
}

impl HumanEntry {
    pub fn new(command: &str, output: &str) -> Self {
        Self {
            timestamp: Local::now().format("%H:%M").to_string(),
            command: redact_only(command),
            output: redact_and_truncate(output),
        }
    }

    pub fn to_markdown(&self) -> String {
        let output = if self.output.is_empty() { "(No output)" } else { &self.output };
        format!(
            "\n## [{}] Human: {}\n**OUTPUT:**\n```bash\n{}\n```\n\n---\n",
            self.timestamp, self.command, output
        )
    }
}

fn atomic_append(path: &Path, content: &str, reason: &str) -> Result<(), AppError> {
    let session_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let _lock = gcc_lock::acquire(session_dir, "log", reason)
        .map_err(|e| AppError::LogWriteError(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::LogWriteError(e.to_string()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::LogWriteError(e.to_string()))?;

    file.write_all(content.as_bytes())
        .map_err(|e| AppError::LogWriteError(e.to_string()))
}

/// Appends AI- and human-authored entries to a session's `log.md`, and
/// commit summaries to its `commit.md`.
pub struct GccLogger {
    log_path: std::path::PathBuf,
    commit_path: std::path::PathBuf,
}

impl GccLogger {
    pub fn new(session_root: &Path) -> Self {
        Self {
            log_path: session_root.join("log.md"),
            commit_path: session_root.join("commit.md"),
        }
    }

    pub fn log_ai_action(
        &self,
        observation: &str,
        thought: &str,
        action: &str,
        output: &str,
        inference: &str,
    ) -> Result<(), AppError> {
        let entry = OtaEntry::new(observation, thought, action, output, inference);
        atomic_append(&self.log_path, &entry.to_markdown(), "appending AI action")
    }

    pub fn log_human_action(&self, command: &str, output: &str) -> Result<(), AppError> {
        let entry = HumanEntry::new(command, output);
        atomic_append(&self.log_path, &entry.to_markdown(), "appending human action")
    }

    pub fn log_commit(&self, summary: &str, finding: &str) -> Result<(), AppError> {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M").to_string();
        let summary = redact_plain_text(summary);
        let finding = redact_plain_text(finding);
        let content = format!(
            "### [{timestamp}] COMMIT\n**Summary:** {summary}\n**Finding:** {finding}\n\n---\n"
        );
        atomic_append(&self.commit_path, &content, "appending commit summary")
    }
}
