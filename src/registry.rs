//! Durable registry of live and historical execution tasks:
//! `.clawdbot/active-tasks.json`. The spawner appends, the supervisor
//! updates, nobody deletes until an operator purges.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::log;
use crate::paths;
use crate::plan::{Agent, Effort};
use crate::spawner::backend::ExecutionMode;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    PrCreated,
    Ready,
    NeedsRebase,
    Blocked,
    AgentDead,
    AgentExited,
    AgentFailed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::PrCreated => "pr_created",
            Self::Ready => "ready",
            Self::NeedsRebase => "needs_rebase",
            Self::Blocked => "blocked",
            Self::AgentDead => "agent_dead",
            Self::AgentExited => "agent_exited",
            Self::AgentFailed => "agent_failed",
        }
    }

    /// Statuses the supervisor still acts on.
    pub fn is_supervised(&self) -> bool {
        matches!(self, Self::Running | Self::PrCreated)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub id: String,
    pub repo: String,
    #[serde(default)]
    pub title: String,
    pub branch: String,
    pub worktree: String,
    pub execution_mode: ExecutionMode,
    /// tmux session name or process id, depending on `execution_mode`.
    pub runtime_ref: String,
    pub agent: Agent,
    pub model: String,
    pub effort: Effort,
    pub status: TaskStatus,
    pub started_at: i64,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub prompt_file: Option<String>,
    #[serde(default)]
    pub last_failure: Option<String>,
    #[serde(default)]
    pub pr: Option<i64>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl RegistryEntry {
    pub fn plan_id(&self) -> Option<&str> {
        self.metadata.get("planId").and_then(Value::as_str)
    }

    pub fn subtask_id(&self) -> Option<&str> {
        self.metadata.get("subtaskId").and_then(Value::as_str)
    }
}

/// Load the registry, tolerating a missing file and skipping entries that do
/// not parse. A malformed file is treated as empty with a logged warning.
pub fn load_registry(base_dir: &Path) -> Vec<RegistryEntry> {
    let path = paths::registry_file(base_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    let items: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(Value::Array(items)) => items,
        _ => {
            log::warn(
                "registry_malformed",
                serde_json::json!({"path": path.display().to_string()}),
            );
            return Vec::new();
        }
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RegistryEntry>(item) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn(
                    "registry_entry_skipped",
                    serde_json::json!({"error": e.to_string()}),
                );
                None
            }
        })
        .collect()
}

/// Raw registry view for callers that only need status/metadata and must not
/// drop unknown entries (e.g. the status tool reporting operator purgeables).
pub fn load_registry_values(base_dir: &Path) -> Vec<Value> {
    let path = paths::registry_file(base_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    match serde_json::from_str(&raw) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter(|item| item.is_object())
            .collect(),
        _ => {
            log::warn(
                "registry_malformed",
                serde_json::json!({"path": path.display().to_string()}),
            );
            Vec::new()
        }
    }
}

pub fn save_registry(base_dir: &Path, entries: &[RegistryEntry]) -> Result<()> {
    let path = paths::registry_file(base_dir);
    paths::write_json_atomic(&path, &entries)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_entry(id: &str, status: TaskStatus) -> RegistryEntry {
        RegistryEntry {
            id: id.to_string(),
            repo: "demo".to_string(),
            title: "Fix it".to_string(),
            branch: format!("feat/{id}"),
            worktree: format!("/tmp/worktrees/feat-{id}"),
            execution_mode: ExecutionMode::Tmux,
            runtime_ref: format!("agent-{id}"),
            agent: Agent::Codex,
            model: "gpt-5.3-codex".to_string(),
            effort: Effort::High,
            status,
            started_at: 1_730_000_000_000,
            attempts: 0,
            max_attempts: 3,
            prompt_file: None,
            last_failure: None,
            pr: None,
            pr_url: None,
            completed_at: None,
            note: None,
            metadata: Map::new(),
        }
    }

    #[test]
    fn missing_registry_is_empty() {
        let base = tempfile::tempdir().unwrap();
        assert!(load_registry(base.path()).is_empty());
        assert!(load_registry_values(base.path()).is_empty());
    }

    #[test]
    fn malformed_registry_is_treated_as_empty() {
        let base = tempfile::tempdir().unwrap();
        let path = paths::registry_file(base.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_registry(base.path()).is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let base = tempfile::tempdir().unwrap();
        let mut entry = sample_entry("t-1", TaskStatus::Running);
        entry
            .metadata
            .insert("planId".into(), json!("1730000000000-demo-fix"));
        entry.metadata.insert("subtaskId".into(), json!("S1"));
        save_registry(base.path(), &[entry]).unwrap();

        let loaded = load_registry(base.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "t-1");
        assert_eq!(loaded[0].status, TaskStatus::Running);
        assert_eq!(loaded[0].plan_id(), Some("1730000000000-demo-fix"));
        assert_eq!(loaded[0].subtask_id(), Some("S1"));
    }

    #[test]
    fn unparseable_entries_are_skipped_not_fatal() {
        let base = tempfile::tempdir().unwrap();
        let path = paths::registry_file(base.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let valid = serde_json::to_value(sample_entry("t-1", TaskStatus::Ready)).unwrap();
        let blob = json!([valid, {"id": "broken"}]);
        std::fs::write(&path, serde_json::to_string(&blob).unwrap()).unwrap();

        let loaded = load_registry(base.path());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "t-1");
        // the raw view still exposes both
        assert_eq!(load_registry_values(base.path()).len(), 2);
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TaskStatus::NeedsRebase).unwrap(),
            json!("needs_rebase")
        );
        assert_eq!(TaskStatus::PrCreated.to_string(), "pr_created");
        assert!(TaskStatus::Running.is_supervised());
        assert!(TaskStatus::PrCreated.is_supervised());
        assert!(!TaskStatus::Ready.is_supervised());
        assert!(!TaskStatus::Blocked.is_supervised());
    }
}
