//! Interchangeable execution backends for agent runners: a tmux session per
//! task when a tmux server is usable, otherwise a detached process with a
//! recorded pid. The registry stores which backend started a task so the
//! supervisor can check liveness and respawn through the same one.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Tmux,
    Process,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tmux => "tmux",
            Self::Process => "process",
        }
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Argument vector every runner script accepts, in this order.
pub fn runner_args(
    task_id: &str,
    model: &str,
    effort: &str,
    worktree: &Path,
    prompt_filename: &str,
) -> Vec<String> {
    vec![
        task_id.to_string(),
        model.to_string(),
        effort.to_string(),
        worktree.display().to_string(),
        prompt_filename.to_string(),
    ]
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn mode(&self) -> ExecutionMode;

    /// Start the runner and return an opaque runtime reference (tmux session
    /// name or pid) that `alive`/`kill` understand.
    async fn spawn(
        &self,
        task_id: &str,
        runner: &Path,
        args: &[String],
        cwd: &Path,
    ) -> Result<String, String>;

    async fn alive(&self, runtime_ref: &str) -> bool;

    async fn kill(&self, runtime_ref: &str);
}

async fn run_tmux(args: &[&str]) -> Result<String, String> {
    let output = Command::new("tmux")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("tmux exec failed: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("tmux error: {stderr}"))
    }
}

pub struct TmuxBackend;

impl TmuxBackend {
    pub fn session_name(task_id: &str) -> String {
        format!("agent-{task_id}")
    }

    pub async fn available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub async fn session_exists(name: &str) -> bool {
        run_tmux(&["has-session", "-t", name]).await.is_ok()
    }
}

#[async_trait]
impl ExecutionBackend for TmuxBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Tmux
    }

    async fn spawn(
        &self,
        task_id: &str,
        runner: &Path,
        args: &[String],
        cwd: &Path,
    ) -> Result<String, String> {
        let session = Self::session_name(task_id);
        if Self::session_exists(&session).await {
            return Err(format!("tmux session already exists: {session}"));
        }
        let quoted: Vec<String> = args.iter().map(|a| format!("\"{a}\"")).collect();
        let cmd = format!("\"{}\" {}", runner.display(), quoted.join(" "));
        let cwd = cwd.display().to_string();
        run_tmux(&["new-session", "-d", "-s", &session, "-c", &cwd, &cmd]).await?;
        Ok(session)
    }

    async fn alive(&self, runtime_ref: &str) -> bool {
        Self::session_exists(runtime_ref).await
    }

    async fn kill(&self, runtime_ref: &str) {
        let _ = run_tmux(&["kill-session", "-t", runtime_ref]).await;
    }
}

/// Detached-process backend: runner output is captured under
/// `logs/<taskId>.log`, liveness is signal-0 against the recorded pid.
pub struct ProcessBackend {
    logs_dir: PathBuf,
}

impl ProcessBackend {
    pub fn new(logs_dir: PathBuf) -> Self {
        Self { logs_dir }
    }
}

#[async_trait]
impl ExecutionBackend for ProcessBackend {
    fn mode(&self) -> ExecutionMode {
        ExecutionMode::Process
    }

    async fn spawn(
        &self,
        task_id: &str,
        runner: &Path,
        args: &[String],
        cwd: &Path,
    ) -> Result<String, String> {
        tokio::fs::create_dir_all(&self.logs_dir)
            .await
            .map_err(|e| format!("mkdir logs: {e}"))?;
        let log_path = self.logs_dir.join(format!("{task_id}.log"));
        let log_file = std::fs::File::create(&log_path).map_err(|e| format!("open log: {e}"))?;
        let log_clone = log_file.try_clone().map_err(|e| format!("clone log: {e}"))?;

        let child = Command::new(runner)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_clone))
            .spawn()
            .map_err(|e| format!("spawn runner: {e}"))?;

        let pid = child
            .id()
            .ok_or_else(|| "runner exited before pid was recorded".to_string())?;
        // Intentionally not awaited: the child keeps running detached and the
        // supervisor tracks it by pid.
        drop(child);
        Ok(pid.to_string())
    }

    async fn alive(&self, runtime_ref: &str) -> bool {
        Command::new("kill")
            .args(["-0", runtime_ref])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn kill(&self, runtime_ref: &str) {
        let _ = Command::new("kill")
            .arg(runtime_ref)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

/// Prefer tmux when a server can be reached; fall back to detached processes.
pub async fn select_backend(logs_dir: PathBuf) -> Box<dyn ExecutionBackend> {
    if TmuxBackend::available().await {
        Box::new(TmuxBackend)
    } else {
        Box::new(ProcessBackend::new(logs_dir))
    }
}

/// Backend matching a registry entry's recorded mode.
pub fn backend_for_mode(mode: ExecutionMode, logs_dir: PathBuf) -> Box<dyn ExecutionBackend> {
    match mode {
        ExecutionMode::Tmux => Box::new(TmuxBackend),
        ExecutionMode::Process => Box::new(ProcessBackend::new(logs_dir)),
    }
}
