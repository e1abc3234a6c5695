use serde::{Deserialize, Serialize};

/// Live-tool probe status for a single external tool (spec §4.B).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolProbe {
    /// Raw probe output, or `"Error: probe timed out"` / `"Error: ..."` on failure.
    pub output: String,
}

impl ToolProbe {
    /// Whether the probe succeeded (i.e. its output does not read as an error).
    ///
    /// Grounded on spec §4.B's fingerprint rule: "kubectl-active (boolean
    /// from absence of \"Error\")".
    pub fn is_active(&self) -> bool {
        !self.output.contains("Error")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatuses {
    pub kubectl: ToolProbe,
    pub docker: ToolProbe,
    pub git: ToolProbe,
}

/// A snapshot of the execution environment, produced by the Environment
/// Prober (spec §4.B).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub os: String,
    pub release: String,
    pub shell: String,
    pub cwd: String,
    pub tools: ToolStatuses,
    /// Directory listing, truncated to at most 1 KB.
    pub workspace_ls: String,
    /// Raw output of every probe the Prober ran (kubectl namespace, docker
    /// container count, git remote/status, ...), keyed by probe name. Not
    /// part of the fingerprint's stable subset; used to render "live tool
    /// status" in the Planner's system prompt (spec §4.H).
    #[serde(default)]
    pub raw_probes: std::collections::BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Git branch extracted from `tools.git`'s `rev-parse --abbrev-ref HEAD`
    /// probe output, if that probe succeeded.
    pub fn git_branch(&self) -> Option<&str> {
        if self.tools.git.is_active() {
            Some(self.tools.git.output.trim())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_probe_active_absent_error() {
        let probe = ToolProbe {
            output: "main".to_string(),
        };
        assert!(probe.is_active());
    }

    #[test]
    fn tool_probe_inactive_on_error_or_timeout() {
        let timed_out = ToolProbe {
            output: "Error: probe timed out".to_string(),
        };
        assert!(!timed_out.is_active());
    }
}
