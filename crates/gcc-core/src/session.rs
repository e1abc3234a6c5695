use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
    Merged,
}

/// Session metadata, persisted as `metadata.yaml`-equivalent (`metadata.toml`
/// here; see `gcc-log`) at `<root>/metadata.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub goal: String,
    pub root: PathBuf,
    pub parent_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, root: PathBuf) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            root,
            parent_id: None,
            status: SessionStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn branched_from(
        id: impl Into<String>,
        goal: impl Into<String>,
        root: PathBuf,
        parent_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            root,
            parent_id: Some(parent_id.into()),
            status: SessionStatus::Active,
            created_at: Utc::now(),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("log.md")
    }

    pub fn commit_path(&self) -> PathBuf {
        self.root.join("commit.md")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join("metadata.toml")
    }

    pub fn panic_state_path(&self) -> PathBuf {
        self.root.join("panic_state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_round_trip() {
        let session = Session::new("session_001_2026-01-01_fix-thing", "fix the thing", "/tmp/x".into());
        let text = toml::to_string(&session).unwrap();
        let back: Session = toml::from_str(&text).unwrap();
        assert_eq!(session, back);
    }

    #[test]
    fn paths_are_relative_to_root() {
        let session = Session::new("s1", "goal", PathBuf::from("/base/sessions/s1"));
        assert_eq!(session.log_path(), PathBuf::from("/base/sessions/s1/log.md"));
        assert_eq!(
            session.checkpoints_dir(),
            PathBuf::from("/base/sessions/s1/checkpoints")
        );
    }
}
