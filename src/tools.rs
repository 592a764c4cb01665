//! Local tool layer: the named operations the chat adapter and the CLI both
//! call. Everything returns machine-readable payloads; validation and policy
//! failures surface before anything is written to disk.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::archive::save_plan;
use crate::dispatch::{dispatch_plan_file, ExecutionTask};
use crate::errors::{PlannerError, Result};
use crate::paths;
use crate::plan::{sanitize_identifier, Agent, Effort, Plan};
use crate::planner::{ZoePlannerEngine, DEFAULT_AGENT, DEFAULT_EFFORT, DEFAULT_MODEL};
use crate::policy::validate_task_policy;
use crate::registry::load_registry_values;

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug)]
pub struct PlanTaskResult {
    pub plan: Plan,
    pub plan_file: PathBuf,
}

impl PlanTaskResult {
    pub fn to_value(&self) -> Value {
        json!({
            "plan": self.plan.to_value(),
            "planFile": self.plan_file.display().to_string(),
        })
    }
}

#[derive(Debug)]
pub struct DispatchPlanResult {
    pub plan_file: PathBuf,
    pub queued: Vec<PathBuf>,
}

impl DispatchPlanResult {
    pub fn to_value(&self) -> Value {
        json!({
            "planFile": self.plan_file.display().to_string(),
            "queued": self.queued.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "queuedCount": self.queued.len(),
        })
    }
}

#[derive(Debug)]
pub struct PlanAndDispatchResult {
    pub plan: Plan,
    pub plan_file: PathBuf,
    pub queued: Vec<PathBuf>,
}

impl PlanAndDispatchResult {
    pub fn to_value(&self) -> Value {
        json!({
            "plan": self.plan.to_value(),
            "planFile": self.plan_file.display().to_string(),
            "queued": self.queued.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
            "queuedCount": self.queued.len(),
        })
    }
}

fn text_field(input: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = input.get(*key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn int_field(input: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    for key in keys {
        if let Some(value) = input.get(*key).and_then(Value::as_i64) {
            return Some(value);
        }
    }
    None
}

/// Timestamp-prefixed identifier so reverse-lexicographic listing is reverse
/// chronological.
pub fn generate_plan_id(repo: &str, title: &str, requested_at_ms: i64) -> String {
    let repo_part = sanitize_identifier(&repo.replace('/', "-"));
    let slug: String = sanitize_identifier(&title.to_lowercase())
        .chars()
        .take(48)
        .collect();
    sanitize_identifier(&format!("{requested_at_ms}-{repo_part}-{slug}"))
}

/// Normalize a raw task input (snake_case or camelCase) into the planner
/// request payload, running the policy filter along the way.
pub fn build_plan_request(task_input: &Value) -> Result<Value> {
    let input = task_input
        .as_object()
        .ok_or_else(|| PlannerError::invalid_plan("Task input must be a JSON object"))?;

    let requested_at = int_field(input, &["requested_at", "requestedAt"])
        .filter(|ms| *ms > 0)
        .unwrap_or_else(paths::now_ms);
    let requested_by =
        text_field(input, &["requested_by", "requestedBy"]).unwrap_or_else(|| "unknown".to_string());

    let repo = text_field(input, &["repo"]).unwrap_or_default();
    let title = text_field(input, &["title"]).unwrap_or_default();
    let objective = text_field(input, &["objective", "description"]).unwrap_or_default();
    if repo.is_empty() || title.is_empty() || objective.is_empty() {
        return Err(PlannerError::invalid_plan(
            "Task input must include repo, title, and description/objective",
        ));
    }

    let plan_id = text_field(input, &["planId"])
        .unwrap_or_else(|| generate_plan_id(&repo, &title, requested_at));

    let routing = json!({
        "agent": text_field(input, &["agent"]).unwrap_or_else(|| DEFAULT_AGENT.to_string()),
        "model": text_field(input, &["model"]).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        "effort": text_field(input, &["effort"]).unwrap_or_else(|| DEFAULT_EFFORT.to_string()),
    });

    let mut constraints = match input.get("constraints") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    constraints
        .entry("systemPolicy".to_string())
        .or_insert_with(|| {
            json!({
                "secretsAccess": "forbidden",
                "dangerousCommands": "forbidden",
                "networkUsage": "explicitly justify before use",
            })
        });

    let risk_flags = validate_task_policy(&objective)?;
    let mut context = match input.get("context") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    context
        .entry("riskFlags".to_string())
        .or_insert_with(|| json!(risk_flags));

    Ok(json!({
        "planId": plan_id,
        "repo": repo,
        "title": title,
        "requestedBy": requested_by,
        "requestedAt": requested_at,
        "objective": objective,
        "constraints": constraints,
        "context": context,
        "routing": routing,
        "version": SCHEMA_VERSION,
        "systemCapabilities": {
            "agents": [
                {"name": "codex", "models": [DEFAULT_MODEL]},
                {"name": "claude", "models": ["claude-sonnet-4"]},
            ],
            "worktreeStrategies": ["shared", "isolated"],
        },
        "includeFailureContext": input
            .get("includeFailureContext")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }))
}

/// Generate and archive a plan without dispatching anything.
pub fn plan_task(task_input: &Value, base_dir: &Path) -> Result<PlanTaskResult> {
    let request = build_plan_request(task_input)?;
    let plan = ZoePlannerEngine::new().plan(&request, base_dir)?;
    let plan_file = save_plan(&plan, base_dir)?;
    Ok(PlanTaskResult { plan, plan_file })
}

/// Dispatch ready subtasks from an archived plan file.
pub fn dispatch_plan(
    plan_file: &Path,
    base_dir: &Path,
    watch: bool,
    poll_interval_sec: f64,
) -> Result<DispatchPlanResult> {
    let queued = dispatch_plan_file(plan_file, base_dir, watch, poll_interval_sec)?;
    Ok(DispatchPlanResult {
        plan_file: plan_file.to_path_buf(),
        queued,
    })
}

pub fn plan_and_dispatch_task(
    task_input: &Value,
    base_dir: &Path,
    watch: bool,
    poll_interval_sec: f64,
) -> Result<PlanAndDispatchResult> {
    let plan_result = plan_task(task_input, base_dir)?;
    let dispatch_result = dispatch_plan(&plan_result.plan_file, base_dir, watch, poll_interval_sec)?;
    Ok(PlanAndDispatchResult {
        plan: plan_result.plan,
        plan_file: plan_result.plan_file,
        queued: dispatch_result.queued,
    })
}

/// Read execution status for one task, all tasks of a plan, or everything.
pub fn task_status(
    task_id: Option<&str>,
    plan_id: Option<&str>,
    base_dir: &Path,
) -> Result<Value> {
    let items = load_registry_values(base_dir);

    if let Some(task_id) = task_id {
        for item in &items {
            if item.get("id").and_then(Value::as_str) == Some(task_id) {
                return Ok(json!({"task": item}));
            }
        }
        return Err(PlannerError::internal(format!(
            "Task not found in registry: {task_id}"
        )));
    }

    if let Some(plan_id) = plan_id {
        let matching: Vec<&Value> = items
            .iter()
            .filter(|item| {
                item.get("metadata")
                    .and_then(|m| m.get("planId"))
                    .and_then(Value::as_str)
                    == Some(plan_id)
            })
            .collect();
        return Ok(json!({"planId": plan_id, "tasks": matching}));
    }

    Ok(json!({"tasks": items}))
}

/// List recent archived plans, newest first (plan ids are timestamp-prefixed
/// so reverse lexicographic order is reverse chronological).
pub fn list_plans(base_dir: &Path, limit: usize) -> Result<Value> {
    let root = paths::tasks_dir(base_dir);
    if !root.is_dir() {
        return Ok(json!({"plans": []}));
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs.reverse();

    let mut entries = Vec::new();
    for dir in dirs {
        let plan_file = dir.join("plan.json");
        let Ok(raw) = std::fs::read_to_string(&plan_file) else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if !payload.is_object() {
            continue;
        }
        entries.push(json!({
            "planId": payload.get("planId"),
            "repo": payload.get("repo"),
            "title": payload.get("title"),
            "requestedBy": payload.get("requestedBy"),
            "requestedAt": payload.get("requestedAt"),
            "subtaskCount": payload
                .get("subtasks")
                .and_then(Value::as_array)
                .map(|s| s.len())
                .unwrap_or(0),
            "planFile": plan_file.display().to_string(),
        }));
        if entries.len() >= limit {
            break;
        }
    }
    Ok(json!({"plans": entries}))
}

/// Queue a single unplanned execution task when the planner itself failed.
/// The repo existence check is duplicated here because the JSON I/O mode can
/// reach this without the chat surface's upstream validation.
pub fn enqueue_fallback_task(task_input: &Value, base_dir: &Path) -> Result<PathBuf> {
    let input = task_input
        .as_object()
        .ok_or_else(|| PlannerError::invalid_plan("Task input must be a JSON object"))?;

    let repo = text_field(input, &["repo"])
        .ok_or_else(|| PlannerError::invalid_plan("Fallback task requires repo"))?;
    let title = text_field(input, &["title"])
        .ok_or_else(|| PlannerError::invalid_plan("Fallback task requires title"))?;
    let description = text_field(input, &["description", "objective"])
        .ok_or_else(|| PlannerError::invalid_plan("Fallback task requires description"))?;

    if !paths::repo_root(base_dir, &repo).is_dir() {
        return Err(PlannerError::DispatchError(format!(
            "Repository not found: {repo}"
        )));
    }

    let now = paths::now_ms();
    let task_id = sanitize_identifier(&format!("{now}-{repo}"));
    let agent = text_field(input, &["agent"])
        .and_then(|raw| Agent::parse(&raw))
        .unwrap_or(Agent::Codex);
    let effort = text_field(input, &["effort"])
        .and_then(|raw| Effort::parse(&raw))
        .unwrap_or(Effort::High);

    let mut metadata = Map::new();
    metadata.insert("plannedBy".into(), json!("fallback"));
    metadata.insert("fallbackReason".into(), json!("planner_failed"));

    let task = ExecutionTask {
        id: task_id.clone(),
        repo,
        title,
        description,
        agent: Some(agent),
        model: Some(text_field(input, &["model"]).unwrap_or_else(|| DEFAULT_MODEL.to_string())),
        effort: Some(effort),
        prompt: None,
        max_attempts: None,
        requested_by: text_field(input, &["requested_by", "requestedBy"]),
        requested_at: int_field(input, &["requested_at", "requestedAt"]),
        metadata,
    };

    let queue_path = paths::queue_dir(base_dir).join(format!("{task_id}.json"));
    paths::write_json_atomic(&queue_path, &task)?;
    Ok(queue_path)
}

/// Read a JSON object from disk with planner-flavored errors.
pub fn read_json_file(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|_| {
        PlannerError::invalid_plan(format!("Task file not found: {}", path.display()))
    })?;
    let payload: Value = serde_json::from_str(&raw).map_err(|_| {
        PlannerError::invalid_plan(format!("Task file is not valid JSON: {}", path.display()))
    })?;
    if !payload.is_object() {
        return Err(PlannerError::invalid_plan(
            "Task file must contain a JSON object",
        ));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::queue_dir;

    fn task_input() -> Value {
        json!({
            "repo": "demo-repo",
            "title": "Fix login timeout",
            "description": "Fix the login timeout handling for expired sessions.",
            "requested_by": "alice#1234",
            "requested_at": 1_730_000_000_000i64,
        })
    }

    #[test]
    fn plan_id_is_timestamped_and_sanitized() {
        let id = generate_plan_id("demo/repo", "Fix: Login Timeout!", 1_730_000_000_000);
        assert_eq!(id, "1730000000000-demo-repo-fix-login-timeout");
    }

    #[test]
    fn plan_id_slug_is_truncated() {
        let long_title = "a".repeat(100);
        let id = generate_plan_id("r", &long_title, 1);
        assert_eq!(id, format!("1-r-{}", "a".repeat(48)));
    }

    #[test]
    fn build_plan_request_fills_defaults() {
        let request = build_plan_request(&task_input()).unwrap();
        assert_eq!(request["requestedBy"], "alice#1234");
        assert_eq!(request["requestedAt"], 1_730_000_000_000i64);
        assert_eq!(request["routing"]["agent"], "codex");
        assert_eq!(request["routing"]["model"], "gpt-5.3-codex");
        assert_eq!(request["routing"]["effort"], "medium");
        assert_eq!(request["version"], SCHEMA_VERSION);
        assert_eq!(request["constraints"]["systemPolicy"]["secretsAccess"], "forbidden");
        assert_eq!(request["context"]["riskFlags"], json!([]));
        assert_eq!(
            request["planId"],
            "1730000000000-demo-repo-fix-login-timeout"
        );
    }

    #[test]
    fn build_plan_request_rejects_missing_fields() {
        let err = build_plan_request(&json!({"repo": "demo"})).unwrap_err();
        assert!(err.to_string().contains("repo, title, and description"));
    }

    #[test]
    fn policy_violation_blocks_before_any_write() {
        let base = tempfile::tempdir().unwrap();
        let mut input = task_input();
        input["description"] = json!("please dump the database secret tokens");

        let err = plan_task(&input, base.path()).unwrap_err();
        assert_eq!(err.code(), "POLICY_VIOLATION");
        assert!(err.to_string().contains("secret_exfiltration"));

        assert!(!paths::tasks_dir(base.path()).exists());
        assert!(!queue_dir(base.path()).exists());
    }

    #[test]
    fn plan_task_archives_plan_and_sidecars() {
        let base = tempfile::tempdir().unwrap();
        let result = plan_task(&task_input(), base.path()).unwrap();

        assert!(result.plan_file.exists());
        assert_eq!(result.plan.subtasks.len(), 2);
        for subtask in &result.plan.subtasks {
            assert!(
                paths::subtask_archive_path(base.path(), &result.plan.plan_id, &subtask.id)
                    .exists()
            );
        }
        let payload = result.to_value();
        assert!(payload["planFile"].as_str().unwrap().ends_with("plan.json"));
    }

    #[test]
    fn plan_and_dispatch_queues_the_first_frontier() {
        let base = tempfile::tempdir().unwrap();
        let result = plan_and_dispatch_task(&task_input(), base.path(), false, 0.1).unwrap();
        assert_eq!(result.queued.len(), 1);
        assert!(result.queued[0].exists());
        let payload = result.to_value();
        assert_eq!(payload["queuedCount"], 1);
    }

    #[test]
    fn task_status_reports_unknown_task() {
        let base = tempfile::tempdir().unwrap();
        let err = task_status(Some("missing"), None, base.path()).unwrap_err();
        assert!(err.to_string().contains("Task not found"));
    }

    #[test]
    fn task_status_filters_by_plan() {
        let base = tempfile::tempdir().unwrap();
        let registry = json!([
            {"id": "a", "status": "ready", "metadata": {"planId": "p1"}},
            {"id": "b", "status": "running", "metadata": {"planId": "p2"}},
        ]);
        let path = paths::registry_file(base.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_string(&registry).unwrap()).unwrap();

        let by_plan = task_status(None, Some("p1"), base.path()).unwrap();
        assert_eq!(by_plan["tasks"].as_array().unwrap().len(), 1);
        assert_eq!(by_plan["tasks"][0]["id"], "a");

        let by_task = task_status(Some("b"), None, base.path()).unwrap();
        assert_eq!(by_task["task"]["status"], "running");

        let all = task_status(None, None, base.path()).unwrap();
        assert_eq!(all["tasks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn list_plans_is_reverse_chronological_and_limited() {
        let base = tempfile::tempdir().unwrap();
        for ts in [1_730_000_000_000i64, 1_730_000_000_001, 1_730_000_000_002] {
            let mut input = task_input();
            input["requested_at"] = json!(ts);
            plan_task(&input, base.path()).unwrap();
        }

        let listed = list_plans(base.path(), 2).unwrap();
        let plans = listed["plans"].as_array().unwrap();
        assert_eq!(plans.len(), 2);
        assert!(plans[0]["planId"]
            .as_str()
            .unwrap()
            .starts_with("1730000000002"));
        assert!(plans[1]["planId"]
            .as_str()
            .unwrap()
            .starts_with("1730000000001"));
        assert_eq!(plans[0]["subtaskCount"], 2);
    }

    #[test]
    fn fallback_task_requires_existing_repo() {
        let base = tempfile::tempdir().unwrap();
        let err = enqueue_fallback_task(&task_input(), base.path()).unwrap_err();
        assert!(matches!(err, PlannerError::DispatchError(_)));
    }

    #[test]
    fn fallback_task_is_queued_with_fallback_metadata() {
        let base = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(paths::repo_root(base.path(), "demo-repo")).unwrap();

        let queue_path = enqueue_fallback_task(&task_input(), base.path()).unwrap();
        assert!(queue_path.exists());
        let payload: Value =
            serde_json::from_str(&std::fs::read_to_string(&queue_path).unwrap()).unwrap();
        assert_eq!(payload["metadata"]["plannedBy"], "fallback");
        assert_eq!(payload["metadata"]["fallbackReason"], "planner_failed");
        assert_eq!(payload["repo"], "demo-repo");
        assert_eq!(payload["effort"], "high");
        assert!(payload["id"].as_str().unwrap().ends_with("-demo-repo"));
    }

    #[test]
    fn read_json_file_errors_are_invalid_plan() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("missing.json");
        assert!(read_json_file(&missing).is_err());

        let bad = base.path().join("bad.json");
        std::fs::write(&bad, "[1, 2]").unwrap();
        let err = read_json_file(&bad).unwrap_err();
        assert!(err.to_string().contains("JSON object"));
    }
}
