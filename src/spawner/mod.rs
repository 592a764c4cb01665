//! Queue watcher: takes pending execution tasks from the queue directory,
//! provisions an isolated working copy, compiles the prompt, starts the
//! agent runner, and registers the live task.

pub mod backend;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;

use crate::config::Config;
use crate::dispatch::ExecutionTask;
use crate::errors::{PlannerError, Result};
use crate::log;
use crate::paths;
use crate::plan::{sanitize_identifier, Agent, Effort, WorktreeStrategy};
use crate::registry::{self, RegistryEntry, TaskStatus, DEFAULT_MAX_ATTEMPTS};

use backend::{runner_args, ExecutionBackend};

pub const DEFAULT_POLL_MS: u64 = 2_000;
pub const PROMPT_FILENAME: &str = "prompt.txt";

const DEFAULT_MODEL: &str = "gpt-5.3-codex";

/// Branch naming: shared-worktree subtasks of one plan land on a single
/// `plan/<planId>` branch, everything else gets its own `feat/<taskId>`.
pub fn branch_for_task(task: &ExecutionTask) -> String {
    if task.worktree_strategy() == Some(WorktreeStrategy::Shared.as_str()) {
        if let Some(plan_id) = task.plan_id() {
            return format!("plan/{}", sanitize_identifier(plan_id));
        }
    }
    format!("feat/{}", sanitize_identifier(&task.id))
}

pub fn worktree_dir(base_dir: &Path, branch: &str) -> PathBuf {
    paths::worktrees_dir(base_dir).join(branch.replace('/', "-"))
}

async fn run_git(args: &[&str], cwd: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|e| PlannerError::internal(format!("git exec failed: {e}")))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        Err(PlannerError::internal(format!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// Ensure `worktrees/<branch-dashed>` exists as a working copy branched from
/// origin/main. An existing directory counts as already provisioned.
pub async fn ensure_worktree(
    repo_root: &Path,
    base_dir: &Path,
    branch: &str,
) -> Result<PathBuf> {
    let wt_dir = worktree_dir(base_dir, branch);
    if wt_dir.exists() {
        return Ok(wt_dir);
    }
    tokio::fs::create_dir_all(paths::worktrees_dir(base_dir)).await?;
    run_git(&["fetch", "origin"], repo_root).await?;
    let wt_str = wt_dir.display().to_string();
    run_git(
        &["worktree", "add", &wt_str, "-b", branch, "origin/main"],
        repo_root,
    )
    .await?;
    Ok(wt_dir)
}

/// Template prompt for tasks that arrive without one (fallback tasks). Points
/// the agent at whichever context files the working copy actually has.
pub fn compile_prompt(task: &ExecutionTask, worktree: &Path) -> String {
    let context_files = ["SPEC.md", "CONTEXT.md", "README.md"];
    let existing: Vec<&str> = context_files
        .iter()
        .copied()
        .filter(|f| worktree.join(f).exists())
        .collect();
    let context_hint = if existing.is_empty() {
        String::new()
    } else {
        let listed: Vec<String> = existing.iter().map(|f| format!("- {f}")).collect();
        format!("Useful context files:\n{}", listed.join("\n"))
    };

    format!(
        "You are a senior engineer working in this repository.\n\
         \n\
         TASK TITLE:\n\
         {title}\n\
         \n\
         TASK DESCRIPTION:\n\
         {description}\n\
         \n\
         DEFINITION OF DONE:\n\
         - Implement the change\n\
         - Add/adjust tests if relevant\n\
         - Run local checks (lint/typecheck/unit) if available\n\
         - Create commits with clear messages\n\
         - Push branch and create a PR via `gh pr create --fill`\n\
         \n\
         CONSTRAINTS:\n\
         - Prefer minimal, safe changes\n\
         - Do not change unrelated formatting\n\
         - If uncertain, search within repo first, then decide\n\
         \n\
         {context_hint}\n\
         \n\
         FIRST STEP:\n\
         - Identify relevant files and write a short plan.\n",
        title = task.title,
        description = task.description,
        context_hint = context_hint,
    )
}

pub struct Spawner {
    config: Config,
    backend: Box<dyn ExecutionBackend>,
}

impl Spawner {
    pub async fn new(config: Config) -> Self {
        let backend = backend::select_backend(paths::logs_dir(&config.base_dir)).await;
        Self { config, backend }
    }

    pub fn with_backend(config: Config, backend: Box<dyn ExecutionBackend>) -> Self {
        Self { config, backend }
    }

    /// One pass over the queue in stable file-name order. Returns the task
    /// ids spawned in this pass. Failed queue files are left in place.
    pub async fn process_queue_once(&self) -> Vec<String> {
        let queue_root = paths::queue_dir(&self.config.base_dir);
        if let Err(e) = tokio::fs::create_dir_all(&queue_root).await {
            log::error("queue_mkdir_failed", json!({"error": e.to_string()}));
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = match std::fs::read_dir(&queue_root) {
            Ok(read) => read
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect(),
            Err(e) => {
                log::error("queue_read_failed", json!({"error": e.to_string()}));
                return Vec::new();
            }
        };
        files.sort();

        let mut spawned = Vec::new();
        for path in files {
            match self.handle_queue_file(&path).await {
                Ok(Some(id)) => spawned.push(id),
                Ok(None) => {}
                Err(e) => {
                    log::error(
                        "queue_task_failed",
                        json!({"path": path.display().to_string(), "error": e.to_string()}),
                    );
                }
            }
        }
        spawned
    }

    /// Watch loop. Runs until the process is killed.
    pub async fn run(&self, poll: Duration) {
        log::info(
            "daemon_started",
            json!({
                "queue": paths::queue_dir(&self.config.base_dir).display().to_string(),
                "backend": self.backend.mode().as_str(),
                "poll_ms": poll.as_millis() as u64,
            }),
        );
        loop {
            let spawned = self.process_queue_once().await;
            for id in &spawned {
                log::info("task_spawned", json!({"id": id}));
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn handle_queue_file(&self, path: &Path) -> Result<Option<String>> {
        let raw = tokio::fs::read_to_string(path).await?;
        let task: ExecutionTask = serde_json::from_str(&raw).map_err(|e| {
            PlannerError::internal(format!("invalid task JSON {}: {e}", path.display()))
        })?;
        if task.id.trim().is_empty() || task.repo.trim().is_empty() {
            return Err(PlannerError::internal(format!(
                "invalid task JSON (missing id/repo): {}",
                path.display()
            )));
        }

        let entries = registry::load_registry(&self.config.base_dir);
        if entries.iter().any(|e| e.id == task.id) {
            // already tracked; drop the queue item so crash recovery cannot
            // double-spawn
            tokio::fs::remove_file(path).await.ok();
            log::info("task_already_tracked", json!({"id": task.id}));
            return Ok(None);
        }

        let entry = self.spawn_task(&task).await?;
        let mut entries = registry::load_registry(&self.config.base_dir);
        entries.push(entry);
        registry::save_registry(&self.config.base_dir, &entries)?;

        tokio::fs::remove_file(path).await.ok();
        Ok(Some(task.id))
    }

    async fn spawn_task(&self, task: &ExecutionTask) -> Result<RegistryEntry> {
        let repo_root = paths::repo_root(&self.config.base_dir, &task.repo);
        if !repo_root.is_dir() {
            return Err(PlannerError::DispatchError(format!(
                "Repo not found: {}. Clone it under repos/{} first.",
                repo_root.display(),
                task.repo
            )));
        }

        let branch = branch_for_task(task);
        let worktree = ensure_worktree(&repo_root, &self.config.base_dir, &branch).await?;

        let prompt = match &task.prompt {
            Some(p) if !p.trim().is_empty() => p.clone(),
            _ => compile_prompt(task, &worktree),
        };
        let prompt_path = worktree.join(PROMPT_FILENAME);
        tokio::fs::write(&prompt_path, &prompt).await?;

        let agent = task.agent.unwrap_or(Agent::Codex);
        let model = task
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let effort = task.effort.unwrap_or(Effort::High);

        let runner = self.config.runner_for(agent);
        if !runner.exists() {
            return Err(PlannerError::DispatchError(format!(
                "Agent runner not found: {}",
                runner.display()
            )));
        }

        let args = runner_args(
            &task.id,
            &model,
            effort.as_str(),
            &worktree,
            PROMPT_FILENAME,
        );
        let runtime_ref = self
            .backend
            .spawn(&task.id, runner, &args, &worktree)
            .await
            .map_err(PlannerError::Internal)?;

        log::info(
            "agent_spawned",
            json!({
                "id": task.id,
                "repo": task.repo,
                "branch": branch,
                "mode": self.backend.mode().as_str(),
                "runtime_ref": runtime_ref,
            }),
        );

        Ok(RegistryEntry {
            id: task.id.clone(),
            repo: task.repo.clone(),
            title: task.title.clone(),
            branch,
            worktree: worktree.display().to_string(),
            execution_mode: self.backend.mode(),
            runtime_ref,
            agent,
            model,
            effort,
            status: TaskStatus::Running,
            started_at: paths::now_ms(),
            attempts: 0,
            max_attempts: task.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            prompt_file: Some(prompt_path.display().to_string()),
            last_failure: None,
            pr: None,
            pr_url: None,
            completed_at: None,
            note: None,
            metadata: task.metadata.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn task(id: &str, strategy: Option<&str>, plan_id: Option<&str>) -> ExecutionTask {
        let mut metadata = Map::new();
        if let Some(strategy) = strategy {
            metadata.insert("worktreeStrategy".into(), json!(strategy));
        }
        if let Some(plan_id) = plan_id {
            metadata.insert("planId".into(), json!(plan_id));
        }
        ExecutionTask {
            id: id.to_string(),
            repo: "demo".to_string(),
            title: "Fix auth".to_string(),
            description: "Fix the auth flow.".to_string(),
            agent: Some(Agent::Codex),
            model: Some("gpt-5.3-codex".to_string()),
            effort: Some(Effort::High),
            prompt: None,
            max_attempts: None,
            requested_by: Some("alice".to_string()),
            requested_at: Some(1),
            metadata,
        }
    }

    #[test]
    fn isolated_tasks_get_feature_branches() {
        let t = task("1730-demo-S1", Some("isolated"), Some("1730-demo"));
        assert_eq!(branch_for_task(&t), "feat/1730-demo-S1");
    }

    #[test]
    fn shared_strategy_uses_plan_branch() {
        let t = task("1730-demo-S1", Some("shared"), Some("1730-demo"));
        assert_eq!(branch_for_task(&t), "plan/1730-demo");
    }

    #[test]
    fn shared_without_plan_id_falls_back_to_feature_branch() {
        let t = task("solo-task", Some("shared"), None);
        assert_eq!(branch_for_task(&t), "feat/solo-task");
    }

    #[test]
    fn branch_names_are_sanitized() {
        let t = task("weird id!", None, None);
        assert_eq!(branch_for_task(&t), "feat/weird-id");
    }

    #[test]
    fn worktree_dir_flattens_branch_slashes() {
        let dir = worktree_dir(Path::new("/base"), "feat/demo-S1");
        assert_eq!(dir, Path::new("/base/worktrees/feat-demo-S1"));
    }

    #[test]
    fn compiled_prompt_references_existing_context_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        std::fs::write(dir.path().join("CONTEXT.md"), "ctx").unwrap();

        let prompt = compile_prompt(&task("t", None, None), dir.path());
        assert!(prompt.contains("TASK TITLE:\nFix auth"));
        assert!(prompt.contains("- CONTEXT.md"));
        assert!(prompt.contains("- README.md"));
        assert!(!prompt.contains("- SPEC.md"));
    }

    #[test]
    fn compiled_prompt_without_context_files_has_no_hint() {
        let dir = tempfile::tempdir().unwrap();
        let prompt = compile_prompt(&task("t", None, None), dir.path());
        assert!(!prompt.contains("Useful context files"));
        assert!(prompt.contains("FIRST STEP:"));
    }
}
