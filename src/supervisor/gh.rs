//! Hosting-CLI adapter. All PR/CI state comes from `gh` invoked inside the
//! task's working copy; a failed invocation is treated as "no data yet", the
//! same way the poll loop treats a PR that does not exist.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckRun {
    pub name: Option<String>,
    pub context: Option<String>,
    pub status: Option<String>,
    pub conclusion: Option<String>,
}

impl CheckRun {
    pub fn label(&self) -> &str {
        self.name
            .as_deref()
            .or(self.context.as_deref())
            .unwrap_or("check")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrInfo {
    pub number: Option<i64>,
    pub state: Option<String>,
    pub url: Option<String>,
    pub head_ref_name: Option<String>,
    pub base_ref_name: Option<String>,
    /// `gh` surfaces this either as a bool or as "MERGEABLE"/"CONFLICTING".
    pub mergeable: Option<Value>,
    pub merge_state_status: Option<String>,
    pub status_check_rollup: Option<Vec<CheckRun>>,
}

impl PrInfo {
    pub fn is_open(&self) -> bool {
        self.state
            .as_deref()
            .map(|s| s.to_uppercase() == "OPEN")
            .unwrap_or(false)
    }

    pub fn rollup(&self) -> &[CheckRun] {
        self.status_check_rollup.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct WorkflowRun {
    database_id: Option<i64>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

const LOG_TAIL_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct GhClient {
    bin: String,
}

impl GhClient {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    async fn run(&self, args: &[&str], cwd: &Path) -> Option<String> {
        let output = Command::new(&self.bin)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            None
        } else {
            Some(stdout)
        }
    }

    /// View the PR whose head ref is `branch`, or None when there is no PR
    /// yet (or `gh` is unusable, which the caller cannot distinguish).
    pub async fn pr_view(&self, cwd: &Path, branch: &str) -> Option<PrInfo> {
        let out = self
            .run(
                &[
                    "pr",
                    "view",
                    branch,
                    "--json",
                    "number,state,url,headRefName,baseRefName,mergeable,mergeStateStatus,statusCheckRollup",
                ],
                cwd,
            )
            .await?;
        serde_json::from_str(&out).ok()
    }

    /// Tail of `--log-failed` for the branch's most recent workflow run, when
    /// that run concluded FAILURE. Truncated to the last 2,000 characters.
    pub async fn latest_run_failure(&self, cwd: &Path, branch: &str) -> Option<String> {
        let out = self
            .run(
                &[
                    "run",
                    "list",
                    "--branch",
                    branch,
                    "--limit",
                    "1",
                    "--json",
                    "databaseId,status,conclusion,htmlUrl",
                ],
                cwd,
            )
            .await?;
        let runs: Vec<WorkflowRun> = serde_json::from_str(&out).ok()?;
        let run = runs.into_iter().next()?;

        let conclusion = run.conclusion.as_deref().unwrap_or("").to_uppercase();
        let run_id = run.database_id?;
        let url = run.html_url.unwrap_or_default();
        if conclusion != "FAILURE" {
            return None;
        }

        let logs = self
            .run(&["run", "view", &run_id.to_string(), "--log-failed"], cwd)
            .await;
        match logs {
            None => Some(format!("CI run failure: {url}")),
            Some(logs) => {
                let tail = truncate_tail(&logs, LOG_TAIL_CHARS);
                Some(format!("CI run failure ({url}) tail:\n{tail}"))
            }
        }
    }
}

fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
