//! Environment Prober (spec §4.B): runs a fixed set of bounded parallel
//! probes and produces a stable fingerprint.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use gcc_core::env::{EnvSnapshot, ToolProbe, ToolStatuses};
use sha2::{Digest, Sha256};
use tokio::process::Command;

/// Hard per-probe timeout (spec §4.B).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const WORKSPACE_LS_CAP: usize = 1024;

async fn run_probe(cmd: &str, cwd: &Path) -> String {
    let spawn = async {
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(cmd)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let output = command.output().await;
        match output {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
            Err(err) => format!("Error: {err}"),
        }
    };

    match tokio::time::timeout(PROBE_TIMEOUT, spawn).await {
        Ok(text) => text,
        Err(_) => "Error: probe timed out".to_string(),
    }
}

fn truncate_ls(listing: &str) -> String {
    if listing.len() <= WORKSPACE_LS_CAP {
        listing.to_string()
    } else {
        listing[..WORKSPACE_LS_CAP].to_string()
    }
}

fn directory_listing(cwd: &Path) -> String {
    match std::fs::read_dir(cwd) {
        Ok(entries) => {
            let mut names: Vec<String> = entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            truncate_ls(&names.join("\n"))
        }
        Err(err) => format!("Error: {err}"),
    }
}

fn detect_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| {
        if cfg!(windows) {
            "powershell".to_string()
        } else {
            "sh".to_string()
        }
    })
}

/// Run the fixed probe set in parallel and assemble an [`EnvSnapshot`]
/// (spec §4.B).
pub async fn probe_environment(cwd: &Path) -> EnvSnapshot {
    let (kubectl_context, kubectl_namespace, docker_info, docker_count, git_branch, git_remote, git_status) = tokio::join!(
        run_probe("kubectl config current-context", cwd),
        run_probe(
            "kubectl config view --minify --output jsonpath='{..namespace}'",
            cwd
        ),
        run_probe("docker info", cwd),
        run_probe("docker ps -q | wc -l", cwd),
        run_probe("git rev-parse --abbrev-ref HEAD", cwd),
        run_probe("git remote get-url origin", cwd),
        run_probe("git status --short", cwd),
    );

    let mut raw_probes = BTreeMap::new();
    raw_probes.insert("kubectl_namespace".to_string(), kubectl_namespace);
    raw_probes.insert("docker_container_count".to_string(), docker_count);
    raw_probes.insert("git_remote".to_string(), git_remote);
    raw_probes.insert("git_status".to_string(), git_status);

    let mut cwd_string = cwd.to_string_lossy().into_owned();
    if cfg!(windows) {
        cwd_string = cwd_string.to_lowercase();
    }

    EnvSnapshot {
        os: std::env::consts::OS.to_string(),
        release: run_probe("uname -r", cwd).await,
        shell: detect_shell(),
        cwd: cwd_string,
        tools: ToolStatuses {
            kubectl: ToolProbe { output: kubectl_context },
            docker: ToolProbe { output: docker_info },
            git: ToolProbe { output: git_branch },
        },
        workspace_ls: directory_listing(cwd),
        raw_probes,
    }
}

/// Stable hash over the subset of the environment that should not produce
/// false drift (spec §4.B): kubectl-active, git branch, shell, cwd.
/// Transient error strings (probe timeouts, absent tools) are excluded.
pub fn fingerprint(env: &EnvSnapshot) -> String {
    let mut hasher = Sha256::new();
    hasher.update(env.tools.kubectl.is_active().to_string());
    hasher.update(env.git_branch().unwrap_or("").as_bytes());
    hasher.update(env.shell.as_bytes());
    hasher.update(env.cwd.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn probe_environment_populates_os_and_cwd() {
        let dir = tempdir().unwrap();
        let env = probe_environment(dir.path()).await;
        assert_eq!(env.os, std::env::consts::OS);
        assert!(!env.cwd.is_empty());
    }

    #[tokio::test]
    async fn fingerprint_is_stable_across_repeated_probes() {
        let dir = tempdir().unwrap();
        let env1 = probe_environment(dir.path()).await;
        let env2 = probe_environment(dir.path()).await;
        assert_eq!(fingerprint(&env1), fingerprint(&env2));
    }

    #[tokio::test]
    async fn fingerprint_changes_with_cwd() {
        let dir1 = tempdir().unwrap();
        let dir2 = tempdir().unwrap();
        let env1 = probe_environment(dir1.path()).await;
        let env2 = probe_environment(dir2.path()).await;
        assert_ne!(fingerprint(&env1), fingerprint(&env2));
    }

    #[test]
    fn probe_timeout_does_not_change_fingerprint_shape() {
        let mut env = EnvSnapshot {
            os: "linux".into(),
            release: "6.1".into(),
            shell: "bash".into(),
            cwd: "/tmp".into(),
            tools: ToolStatuses::default(),
            workspace_ls: String::new(),
            raw_probes: BTreeMap::new(),
        };
        let before = fingerprint(&env);
        env.tools.docker.output = "Error: probe timed out".to_string();
        let after = fingerprint(&env);
        // Docker is excluded from the stable subset entirely.
        assert_eq!(before, after);
    }

    #[test]
    fn workspace_listing_is_capped_at_one_kilobyte() {
        let huge = "x".repeat(5000);
        assert!(truncate_ls(&huge).len() <= WORKSPACE_LS_CAP);
    }
}
