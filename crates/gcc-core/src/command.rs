use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One append-only entry in the Session Index's `command_history` table
/// (spec §3, §4.I).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub skill_tag: Option<String>,
    pub command: String,
    pub exit_code: Option<i32>,
    pub output_truncated: String,
    pub env_os: String,
    pub env_release: String,
    pub env_shell: String,
    pub env_cwd: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let record = CommandRecord {
            session_id: "session_001".into(),
            timestamp: Utc::now(),
            skill_tag: Some("docker".into()),
            command: "docker ps".into(),
            exit_code: Some(0),
            output_truncated: "CONTAINER ID ...".into(),
            env_os: "linux".into(),
            env_release: "6.1".into(),
            env_shell: "bash".into(),
            env_cwd: "/home/user/project".into(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: CommandRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
