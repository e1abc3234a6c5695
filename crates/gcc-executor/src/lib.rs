//! Command Executor (spec §4.G): run shell commands with timeout,
//! cancel-on-interrupt, cwd fallback, and tool substitution.
//!
//! Grounded on `csa-process::lib`: byte-level `tokio::select!` read loop over
//! stdout/stderr, process-group kill via negative-pid `SIGKILL`,
//! `kill_on_drop(true)` as a backstop against orphans on any exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use gcc_core::{Skill, Tier};
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Notify;

/// Default command timeout (spec §4.G), overridable per call and via the
/// `GCC_COMMAND_TIMEOUT_SECS` environment variable at the config layer.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

const READ_CHUNK: usize = 8192;

/// Inputs to [`run`].
pub struct RunRequest<'a> {
    pub cmd: &'a str,
    pub cwd: Option<&'a Path>,
    pub timeout: Option<Duration>,
    /// Skills consulted for the defence-in-depth destructive short-circuit
    /// (spec §4.G: "the orchestrator gate should have intercepted already").
    pub skills: &'a [Skill],
    /// Optional external cancellation signal (e.g. an interactive Esc).
    pub cancel: Option<Arc<Notify>>,
}

/// Resolve `cwd` to the nearest existing ancestor directory, logging a
/// warning if the requested path does not exist (spec §4.G).
fn resolve_cwd(cwd: &Path) -> PathBuf {
    let mut candidate = cwd.to_path_buf();
    loop {
        if candidate.exists() {
            return candidate;
        }
        tracing::warn!(path = %candidate.display(), "cwd does not exist, walking up to nearest existing ancestor");
        match candidate.parent() {
            Some(parent) => candidate = parent.to_path_buf(),
            None => return PathBuf::from("."),
        }
    }
}

/// Opportunistic substitution: rewrite `grep ` to a faster equivalent tool
/// on `PATH` (spec §4.G).
fn substitute_grep(cmd: &str) -> String {
    if !cmd.contains("grep ") {
        return cmd.to_string();
    }
    if which::which("rg").is_ok() {
        let rewritten = cmd.replacen("grep ", "rg --no-heading --color=never ", 1);
        tracing::info!(original = %cmd, rewritten = %rewritten, "substituted grep with ripgrep");
        rewritten
    } else {
        cmd.to_string()
    }
}

/// Kill an entire process group by negative pid (spec §4.G "no orphan
/// children on any exit path").
fn kill_process_group(pid: u32) {
    // SAFETY: `kill` is async-signal-safe; negative pid targets the process
    // group created by `process_group(0)` below.
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
}

async fn read_all(mut reader: impl tokio::io::AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

enum Outcome {
    Completed { exit_code: i32, stdout: String, stderr: String },
    TimedOut,
    Cancelled,
}

async fn spawn(cmd: &str, cwd: &Path) -> std::io::Result<Child> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(cmd)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    command.spawn()
}

async fn wait_with_timeout_and_cancel(
    mut child: Child,
    timeout: Duration,
    cancel: Option<Arc<Notify>>,
) -> Outcome {
    let stdout = child.stdout.take().map(BufReader::new);
    let stderr = child.stderr.take().map(BufReader::new);

    let stdout_fut = async move {
        match stdout {
            Some(r) => read_all(r).await,
            None => String::new(),
        }
    };
    let stderr_fut = async move {
        match stderr {
            Some(r) => read_all(r).await,
            None => String::new(),
        }
    };

    let pid = child.id();

    let run_fut = async {
        let (status, stdout, stderr) = tokio::join!(child.wait(), stdout_fut, stderr_fut);
        (status, stdout, stderr)
    };

    let cancelled = async {
        match cancel {
            Some(notify) => notify.notified().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = run_fut => {
            let (status, stdout, stderr) = result;
            match status {
                Ok(status) => Outcome::Completed {
                    exit_code: status.code().unwrap_or(-1),
                    stdout,
                    stderr,
                },
                Err(_) => Outcome::Completed {
                    exit_code: -1,
                    stdout,
                    stderr,
                },
            }
        }
        _ = tokio::time::sleep(timeout) => {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            let _ = child.wait().await;
            Outcome::TimedOut
        }
        _ = cancelled => {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            let _ = child.wait().await;
            Outcome::Cancelled
        }
    }
}

fn format_completed(exit_code: i32, stdout: String, stderr: String) -> String {
    let stdout = stdout.trim_end();
    let mut out = if stdout.is_empty() {
        "(Command executed with no output)".to_string()
    } else {
        stdout.to_string()
    };
    let stderr = stderr.trim_end();
    if !stderr.is_empty() {
        out.push_str("\nSTDERR:\n");
        out.push_str(stderr);
    }
    if exit_code != 0 {
        out.push_str(&format!("\n[Exit Code: {exit_code}]"));
    }
    out
}

/// Run a shell command (spec §4.G).
///
/// Returns raw text for the LLM collaborator; never JSON-wrapped.
pub async fn run(req: RunRequest<'_>) -> String {
    let (tier, _) = gcc_classifier::classify(req.skills, req.cmd);
    if tier == Tier::Destructive {
        return format!("REFUSED: command classified as destructive: {}", req.cmd);
    }

    let cwd = req
        .cwd
        .map(resolve_cwd)
        .unwrap_or_else(|| PathBuf::from("."));
    let timeout = req
        .timeout
        .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
    let cmd = substitute_grep(req.cmd);

    let child = match spawn(&cmd, &cwd).await {
        Ok(child) => child,
        Err(err) => return format!("(Failed to spawn command: {err})"),
    };

    match wait_with_timeout_and_cancel(child, timeout, req.cancel.clone()).await {
        Outcome::Completed { exit_code, stdout, stderr } => format_completed(exit_code, stdout, stderr),
        Outcome::TimedOut => format!(
            "TIMEOUT: command exceeded {}s and was killed.",
            timeout.as_secs()
        ),
        Outcome::Cancelled => "CANCELLED: command was interrupted and its process group was killed.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_skills() -> Vec<Skill> {
        Vec::new()
    }

    #[tokio::test]
    async fn runs_simple_command_and_captures_stdout() {
        let out = run(RunRequest {
            cmd: "echo hello",
            cwd: None,
            timeout: None,
            skills: &no_skills(),
            cancel: None,
        })
        .await;
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn empty_output_maps_to_placeholder() {
        let out = run(RunRequest {
            cmd: "true",
            cwd: None,
            timeout: None,
            skills: &no_skills(),
            cancel: None,
        })
        .await;
        assert_eq!(out, "(Command executed with no output)");
    }

    #[tokio::test]
    async fn nonzero_exit_reports_code() {
        let out = run(RunRequest {
            cmd: "exit 3",
            cwd: None,
            timeout: None,
            skills: &no_skills(),
            cancel: None,
        })
        .await;
        assert!(out.contains("[Exit Code: 3]"));
    }

    #[tokio::test]
    async fn stderr_is_sectioned() {
        let out = run(RunRequest {
            cmd: "echo oops 1>&2",
            cwd: None,
            timeout: None,
            skills: &no_skills(),
            cancel: None,
        })
        .await;
        assert!(out.contains("STDERR:"));
        assert!(out.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_kills_and_reports() {
        let out = run(RunRequest {
            cmd: "sleep 5",
            cwd: None,
            timeout: Some(Duration::from_millis(100)),
            skills: &no_skills(),
            cancel: None,
        })
        .await;
        assert!(out.starts_with("TIMEOUT:"));
    }

    #[tokio::test]
    async fn cancellation_kills_and_reports() {
        let notify = Arc::new(Notify::new());
        let notify_clone = notify.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            notify_clone.notify_one();
        });
        let out = run(RunRequest {
            cmd: "sleep 5",
            cwd: None,
            timeout: Some(Duration::from_secs(10)),
            skills: &no_skills(),
            cancel: Some(notify),
        })
        .await;
        assert!(out.starts_with("CANCELLED:"));
    }

    #[tokio::test]
    async fn destructive_command_is_refused() {
        let skills = vec![Skill {
            name: "docker".into(),
            auto: vec![],
            approval: vec![],
            destructive: vec!["docker rm -f *".into()],
        }];
        let out = run(RunRequest {
            cmd: "docker rm -f abc",
            cwd: None,
            timeout: None,
            skills: &skills,
            cancel: None,
        })
        .await;
        assert!(out.starts_with("REFUSED:"));
    }

    #[tokio::test]
    async fn missing_cwd_falls_back_to_nearest_ancestor() {
        let cwd = resolve_cwd(Path::new("/definitely/not/a/real/path/here"));
        assert!(cwd.exists());
    }

    #[test]
    fn grep_substitution_is_a_no_op_without_grep() {
        assert_eq!(substitute_grep("ls -la"), "ls -la");
    }
}
