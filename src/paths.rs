//! Filesystem layout under the orchestrator base directory and the atomic
//! JSON write primitive shared by every on-disk writer.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

/// Base directory for all orchestrator state. `AI_DEVOPS_HOME` overrides the
/// default of `~/ai-devops`.
pub fn default_base_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AI_DEVOPS_HOME") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join("ai-devops")
}

pub fn repos_dir(base: &Path) -> PathBuf {
    base.join("repos")
}

pub fn repo_root(base: &Path, repo: &str) -> PathBuf {
    repos_dir(base).join(repo)
}

pub fn worktrees_dir(base: &Path) -> PathBuf {
    base.join("worktrees")
}

pub fn queue_dir(base: &Path) -> PathBuf {
    base.join("orchestrator").join("queue")
}

pub fn registry_file(base: &Path) -> PathBuf {
    base.join(".clawdbot").join("active-tasks.json")
}

pub fn tasks_dir(base: &Path) -> PathBuf {
    base.join("tasks")
}

pub fn plan_dir(base: &Path, plan_id: &str) -> PathBuf {
    tasks_dir(base).join(plan_id)
}

pub fn plan_file(base: &Path, plan_id: &str) -> PathBuf {
    plan_dir(base, plan_id).join("plan.json")
}

pub fn subtask_archive_path(base: &Path, plan_id: &str, subtask_id: &str) -> PathBuf {
    plan_dir(base, plan_id)
        .join("subtasks")
        .join(format!("{subtask_id}.json"))
}

pub fn dispatch_state_path(base: &Path, plan_id: &str) -> PathBuf {
    plan_dir(base, plan_id).join("dispatch-state.json")
}

pub fn logs_dir(base: &Path) -> PathBuf {
    base.join("logs")
}

/// Optional exit-status sidecar written by the agent runner when it exits.
pub fn exit_sidecar_path(base: &Path, task_id: &str) -> PathBuf {
    logs_dir(base).join(format!("{task_id}.exit.json"))
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Write JSON by writing a temp file in the same directory and renaming it
/// over the target. Readers never observe a partial file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
