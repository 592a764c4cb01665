//! Supervisor: polls PR/CI state for every live execution task, promotes
//! finished work to `ready`, flags merge conflicts, and drives the retry
//! loop that rewrites the prompt with failure context and respawns the
//! runner on the same branch.

pub mod checks;
pub mod gh;
pub mod notify;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::Config;
use crate::errors::Result;
use crate::log;
use crate::paths;
use crate::registry::{self, RegistryEntry, TaskStatus};
use crate::spawner::backend::{self, runner_args};

use checks::{analyze_checks, merge_clean};
use gh::{GhClient, PrInfo};

pub const DEFAULT_POLL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrDecision {
    /// Checks still running (or not reporting yet): do nothing.
    Pending,
    /// Checks green and merge clean: terminal success.
    Ready,
    /// Checks green but the PR cannot merge cleanly: a human must rebase.
    NeedsRebase,
    /// Checks failed and retry budget remains.
    Retry { failure: String },
    /// Checks failed and retries are exhausted: terminal failure.
    Exhausted { failure: String },
}

/// Pure decision table for an OPEN PR. Returns None when the PR is not open
/// (merged/closed PRs are left alone).
pub fn decide_pr_action(attempts: u32, max_attempts: u32, pr: &PrInfo) -> Option<PrDecision> {
    if !pr.is_open() {
        return None;
    }
    let outcome = analyze_checks(pr.rollup());
    if outcome.pending {
        return Some(PrDecision::Pending);
    }
    if outcome.passed {
        if merge_clean(pr) {
            return Some(PrDecision::Ready);
        }
        return Some(PrDecision::NeedsRebase);
    }
    let failure = outcome.failure.unwrap_or_else(|| "checks failed".to_string());
    if attempts >= max_attempts {
        Some(PrDecision::Exhausted { failure })
    } else {
        Some(PrDecision::Retry { failure })
    }
}

/// How a dead runtime is classified, based on the optional exit sidecar the
/// runner leaves at `logs/<taskId>.exit.json`.
pub fn classify_dead_runtime(sidecar_path: &Path) -> TaskStatus {
    let Ok(raw) = std::fs::read_to_string(sidecar_path) else {
        return TaskStatus::AgentDead;
    };
    let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
        return TaskStatus::AgentDead;
    };
    match payload.get("exitCode").and_then(Value::as_i64) {
        Some(0) => TaskStatus::AgentExited,
        Some(_) => TaskStatus::AgentFailed,
        None => TaskStatus::AgentDead,
    }
}

/// Retry prompts are content-addressed by attempt so operators can diff
/// attempts; the base prompt file is never overwritten.
pub fn retry_prompt_filename(retry_n: u32) -> String {
    format!("prompt.retry{retry_n}.txt")
}

pub fn build_retry_prompt(base_prompt: &str, retry_n: u32, failure: &str, ci_detail: &str) -> String {
    let mut prompt = format!(
        "{base_prompt}\n\nRERUN DIRECTIVE (Retry #{retry_n}):\n\
         CI is failing. Your ONLY priority is to make CI green.\n\
         Failed checks summary: {failure}\n\n"
    );
    if !ci_detail.is_empty() {
        prompt.push_str(ci_detail);
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "Instructions:\n\
         - Read failing logs and identify root cause.\n\
         - Apply minimal fix.\n\
         - Run local equivalent checks/tests if available.\n\
         - Push commits to the SAME branch and update the PR.\n",
    );
    prompt
}

pub struct Supervisor {
    config: Config,
    gh: GhClient,
    notifier: notify::Notifier,
    /// Once-per-task `ready` notification guard; reset on restart by design
    /// (operators re-ack).
    notified_ready: HashSet<String>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        let gh = GhClient::new(config.gh_bin.clone());
        let notifier =
            notify::Notifier::new(config.webhook_url.clone(), config.webhook_token.clone());
        Self {
            config,
            gh,
            notifier,
            notified_ready: HashSet::new(),
        }
    }

    fn logs_dir(&self) -> PathBuf {
        paths::logs_dir(&self.config.base_dir)
    }

    /// Fixed-interval loop. A failing tick is logged and retried after the
    /// next sleep; per-entry failures never abort the pass.
    pub async fn run(&mut self, poll: Duration) {
        log::info(
            "monitor_started",
            json!({
                "registry": paths::registry_file(&self.config.base_dir).display().to_string(),
                "poll_secs": poll.as_secs(),
            }),
        );
        loop {
            if let Err(e) = self.tick().await {
                log::error("monitor_tick_failed", json!({"error": e.to_string()}));
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// One pass over the registry. Returns whether anything was persisted.
    pub async fn tick(&mut self) -> Result<bool> {
        let mut entries = registry::load_registry(&self.config.base_dir);
        let mut changed = false;

        for entry in entries.iter_mut() {
            if !entry.status.is_supervised() {
                continue;
            }
            changed |= self.process_entry(entry).await;
        }

        if changed {
            registry::save_registry(&self.config.base_dir, &entries)?;
        }
        Ok(changed)
    }

    async fn process_entry(&mut self, entry: &mut RegistryEntry) -> bool {
        let worktree = PathBuf::from(&entry.worktree);
        if entry.id.is_empty() || entry.branch.is_empty() || !worktree.exists() {
            entry.status = TaskStatus::Blocked;
            entry.note = Some("invalid task record (missing id/branch/worktree)".to_string());
            return true;
        }

        // Runtime liveness only matters before a PR exists; afterwards the
        // agent is expected to exit and the PR itself carries the state.
        if entry.pr.is_none() {
            let backend = backend::backend_for_mode(entry.execution_mode, self.logs_dir());
            if !backend.alive(&entry.runtime_ref).await {
                let sidecar = paths::exit_sidecar_path(&self.config.base_dir, &entry.id);
                let status = classify_dead_runtime(&sidecar);
                entry.status = status;
                entry.note = Some(match status {
                    TaskStatus::AgentExited => "runner exited cleanly before a PR appeared",
                    TaskStatus::AgentFailed => "runner exited with a failure status",
                    _ => "agent runtime not found",
                }
                .to_string());
                if matches!(status, TaskStatus::AgentFailed | TaskStatus::AgentDead) {
                    self.notifier
                        .send(&format!(
                            "⚠️ Agent runtime gone: `{}` ({}). Check logs.",
                            entry.id, entry.runtime_ref
                        ))
                        .await;
                }
                return true;
            }
        }

        let Some(pr) = self.gh.pr_view(&worktree, &entry.branch).await else {
            // PR not created yet; keep waiting
            return false;
        };

        let mut changed = false;
        if entry.status == TaskStatus::Running {
            entry.status = TaskStatus::PrCreated;
            entry.pr = pr.number;
            entry.pr_url = pr.url.clone();
            changed = true;
        }

        match decide_pr_action(entry.attempts, entry.max_attempts, &pr) {
            None | Some(PrDecision::Pending) => changed,
            Some(PrDecision::Ready) => {
                if !self.notified_ready.contains(&entry.id) {
                    self.notified_ready.insert(entry.id.clone());
                    entry.status = TaskStatus::Ready;
                    entry.completed_at = Some(paths::now_ms());
                    entry.note = Some("checks passed and mergeable clean".to_string());
                    self.notifier
                        .send(&format!(
                            "✅ PR ready: `{}` {} (checks✅ + merge✅)",
                            entry.id,
                            entry.pr_url.as_deref().unwrap_or("")
                        ))
                        .await;
                    return true;
                }
                changed
            }
            Some(PrDecision::NeedsRebase) => {
                entry.status = TaskStatus::NeedsRebase;
                entry.note = Some(format!(
                    "merge not clean: mergeable={} state={}",
                    pr.mergeable
                        .as_ref()
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "null".to_string()),
                    pr.merge_state_status.as_deref().unwrap_or("")
                ));
                self.notifier
                    .send(&format!(
                        "⚠️ PR checks passed but merge not clean: `{}` {}",
                        entry.id,
                        entry.pr_url.as_deref().unwrap_or("")
                    ))
                    .await;
                true
            }
            Some(PrDecision::Exhausted { failure }) => {
                entry.last_failure = Some(failure.clone());
                if entry.status != TaskStatus::Blocked {
                    entry.status = TaskStatus::Blocked;
                    entry.note = Some("max retries reached".to_string());
                    self.notifier
                        .send(&format!(
                            "🛑 CI failed and max retries reached: `{}` {}\nFail: {failure}",
                            entry.id,
                            entry.pr_url.as_deref().unwrap_or("")
                        ))
                        .await;
                }
                true
            }
            Some(PrDecision::Retry { failure }) => {
                entry.last_failure = Some(failure.clone());
                self.trigger_retry(entry, &failure, &worktree).await;
                true
            }
        }
    }

    /// Ralph Loop v2: write an augmented prompt for this attempt, kill the
    /// old runtime, respawn the runner against the retry prompt.
    async fn trigger_retry(&mut self, entry: &mut RegistryEntry, failure: &str, worktree: &Path) {
        let retry_n = entry.attempts + 1;

        let ci_detail = self
            .gh
            .latest_run_failure(worktree, &entry.branch)
            .await
            .unwrap_or_default();
        let base_prompt = tokio::fs::read_to_string(worktree.join(crate::spawner::PROMPT_FILENAME))
            .await
            .unwrap_or_default();

        let retry_filename = retry_prompt_filename(retry_n);
        let retry_prompt = build_retry_prompt(&base_prompt, retry_n, failure, &ci_detail);
        if let Err(e) = tokio::fs::write(worktree.join(&retry_filename), &retry_prompt).await {
            entry.status = TaskStatus::Blocked;
            entry.note = Some(format!("failed to write retry prompt: {e}"));
            self.notifier
                .send(&format!("🛑 Failed to restart agent for `{}`: {e}", entry.id))
                .await;
            return;
        }

        let backend = backend::backend_for_mode(entry.execution_mode, self.logs_dir());
        backend.kill(&entry.runtime_ref).await;

        let runner = self.config.runner_for(entry.agent).to_path_buf();
        let args = runner_args(
            &entry.id,
            &entry.model,
            entry.effort.as_str(),
            worktree,
            &retry_filename,
        );
        match backend.spawn(&entry.id, &runner, &args, worktree).await {
            Ok(runtime_ref) => {
                entry.runtime_ref = runtime_ref;
                entry.attempts = retry_n;
                entry.status = TaskStatus::Running;
                entry.note = Some(format!("retry #{retry_n} triggered"));
                self.notifier
                    .send(&format!(
                        "🔁 Retry #{retry_n} triggered: `{}` {}\nFail: {failure}",
                        entry.id,
                        entry.pr_url.as_deref().unwrap_or("")
                    ))
                    .await;
            }
            Err(e) => {
                entry.status = TaskStatus::Blocked;
                entry.note = Some(format!("failed to restart agent: {e}"));
                self.notifier
                    .send(&format!("🛑 Failed to restart agent for `{}`: {e}", entry.id))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gh::CheckRun;
    use serde_json::json;

    fn open_pr(rollup: Vec<CheckRun>, mergeable: Value, merge_state: &str) -> PrInfo {
        PrInfo {
            number: Some(7),
            state: Some("OPEN".to_string()),
            url: Some("https://example.test/pr/7".to_string()),
            mergeable: Some(mergeable),
            merge_state_status: Some(merge_state.to_string()),
            status_check_rollup: Some(rollup),
            ..PrInfo::default()
        }
    }

    fn success_check(name: &str) -> CheckRun {
        CheckRun {
            name: Some(name.to_string()),
            context: None,
            status: Some("COMPLETED".to_string()),
            conclusion: Some("SUCCESS".to_string()),
        }
    }

    fn failed_check(name: &str) -> CheckRun {
        CheckRun {
            name: Some(name.to_string()),
            context: None,
            status: Some("COMPLETED".to_string()),
            conclusion: Some("FAILURE".to_string()),
        }
    }

    #[test]
    fn closed_prs_are_skipped() {
        let mut pr = open_pr(vec![success_check("ci")], json!(true), "CLEAN");
        pr.state = Some("MERGED".to_string());
        assert_eq!(decide_pr_action(0, 3, &pr), None);
    }

    #[test]
    fn green_and_clean_is_ready() {
        let pr = open_pr(vec![success_check("ci")], json!(true), "CLEAN");
        assert_eq!(decide_pr_action(0, 3, &pr), Some(PrDecision::Ready));
    }

    #[test]
    fn green_but_dirty_needs_rebase() {
        let pr = open_pr(vec![success_check("ci")], json!(false), "DIRTY");
        assert_eq!(decide_pr_action(0, 3, &pr), Some(PrDecision::NeedsRebase));
    }

    #[test]
    fn empty_rollup_is_pending() {
        let pr = open_pr(vec![], json!(true), "CLEAN");
        assert_eq!(decide_pr_action(0, 3, &pr), Some(PrDecision::Pending));
    }

    #[test]
    fn failure_with_budget_retries() {
        let pr = open_pr(vec![failed_check("test")], json!(true), "CLEAN");
        assert_eq!(
            decide_pr_action(1, 3, &pr),
            Some(PrDecision::Retry {
                failure: "test:FAILURE".to_string()
            })
        );
    }

    #[test]
    fn failure_without_budget_is_exhausted() {
        let pr = open_pr(vec![failed_check("test")], json!(true), "CLEAN");
        assert_eq!(
            decide_pr_action(3, 3, &pr),
            Some(PrDecision::Exhausted {
                failure: "test:FAILURE".to_string()
            })
        );
    }

    #[test]
    fn dead_runtime_classification_uses_exit_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let sidecar = dir.path().join("t-1.exit.json");

        assert_eq!(classify_dead_runtime(&sidecar), TaskStatus::AgentDead);

        std::fs::write(&sidecar, r#"{"exitCode": 0}"#).unwrap();
        assert_eq!(classify_dead_runtime(&sidecar), TaskStatus::AgentExited);

        std::fs::write(&sidecar, r#"{"exitCode": 2}"#).unwrap();
        assert_eq!(classify_dead_runtime(&sidecar), TaskStatus::AgentFailed);

        std::fs::write(&sidecar, "not json").unwrap();
        assert_eq!(classify_dead_runtime(&sidecar), TaskStatus::AgentDead);
    }

    #[test]
    fn retry_prompt_is_content_addressed_and_appends_context() {
        assert_eq!(retry_prompt_filename(2), "prompt.retry2.txt");

        let prompt = build_retry_prompt("BASE", 2, "test:FAILURE", "CI tail");
        assert!(prompt.starts_with("BASE\n\nRERUN DIRECTIVE (Retry #2):"));
        assert!(prompt.contains("Failed checks summary: test:FAILURE"));
        assert!(prompt.contains("CI tail"));
        assert!(prompt.contains("Push commits to the SAME branch"));

        let without_detail = build_retry_prompt("BASE", 1, "x", "");
        assert!(!without_detail.contains("\n\n\n"));
    }
}
