//! Integration tests: the planning-and-dispatch pipeline end to end against
//! a real temp base directory. Plan a request, archive it, gate dispatch on
//! registry completions, and walk a PR through the supervisor decision table.

use serde_json::{json, Value};
use tempfile::TempDir;

use zoe::dispatch::{dispatch_ready_subtasks, execution_task_id};
use zoe::paths;
use zoe::plan::load_plan;
use zoe::registry::{load_registry, save_registry, RegistryEntry, TaskStatus};
use zoe::spawner::backend::ExecutionMode;
use zoe::supervisor::{decide_pr_action, PrDecision};
use zoe::supervisor::gh::PrInfo;
use zoe::tools;

fn refactor_request() -> Value {
    json!({
        "repo": "agent-mission-control",
        "title": "Refactor auth flow and update docs",
        "description": "Refactor the auth flow, wire the new session helper through the API layer, add regression coverage, and update the operator documentation.",
        "requested_by": "alice#1234",
        "requested_at": 1_730_000_000_000i64,
        "constraints": {
            "definitionOfDone": ["Keep the auth behavior backward compatible."],
        },
        "context": {
            "filesHint": [
                "src/auth/session.py",
                "src/api/routes/auth.py",
                "tests/test_auth_flow.py",
                "README.md",
            ],
        },
        "agent": "codex",
        "model": "gpt-5.3-codex",
        "effort": "high",
    })
}

fn registry_entry_for(plan_id: &str, subtask_id: &str, task_id: &str, status: TaskStatus) -> RegistryEntry {
    let mut metadata = serde_json::Map::new();
    metadata.insert("planId".into(), json!(plan_id));
    metadata.insert("subtaskId".into(), json!(subtask_id));
    RegistryEntry {
        id: task_id.to_string(),
        repo: "agent-mission-control".to_string(),
        title: String::new(),
        branch: format!("feat/{task_id}"),
        worktree: format!("/tmp/worktrees/feat-{task_id}"),
        execution_mode: ExecutionMode::Tmux,
        runtime_ref: format!("agent-{task_id}"),
        agent: zoe::plan::Agent::Codex,
        model: "gpt-5.3-codex".to_string(),
        effort: zoe::plan::Effort::High,
        status,
        started_at: 1,
        attempts: 0,
        max_attempts: 3,
        prompt_file: None,
        last_failure: None,
        pr: None,
        pr_url: None,
        completed_at: None,
        note: None,
        metadata,
    }
}

#[test]
fn plan_and_dispatch_produces_archive_and_first_queue_file() {
    let base = TempDir::new().unwrap();
    let result = tools::plan_and_dispatch_task(&refactor_request(), base.path(), false, 0.1)
        .expect("plan and dispatch");

    // Four-phase plan with a linear chain
    let ids: Vec<&str> = result.plan.subtasks.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["S1", "S2", "S3", "S4"]);

    // Archive layout
    let plan = load_plan(&result.plan_file).unwrap();
    assert_eq!(plan.plan_id, result.plan.plan_id);
    for subtask in &plan.subtasks {
        assert!(paths::subtask_archive_path(base.path(), &plan.plan_id, &subtask.id).exists());
    }
    assert!(paths::dispatch_state_path(base.path(), &plan.plan_id).exists());

    // Only the root of the chain is queued
    assert_eq!(result.queued.len(), 1);
    let queue_payload: Value =
        serde_json::from_str(&std::fs::read_to_string(&result.queued[0]).unwrap()).unwrap();
    assert_eq!(
        queue_payload["id"],
        execution_task_id(&plan, &plan.subtasks[0])
    );
    assert_eq!(queue_payload["metadata"]["plannedBy"], "zoe");
    assert_eq!(
        queue_payload["metadata"]["objective"],
        plan.objective.as_str()
    );
}

#[test]
fn dispatch_gating_follows_registry_completions() {
    let base = TempDir::new().unwrap();
    let result = tools::plan_task(&refactor_request(), base.path()).unwrap();
    let plan = result.plan;

    // S1 queues first
    let first = dispatch_ready_subtasks(&plan, base.path(), Some(&[])).unwrap();
    assert_eq!(first.len(), 1);

    // idempotent without new completions
    let again = dispatch_ready_subtasks(&plan, base.path(), Some(&[])).unwrap();
    assert!(again.is_empty());

    // S1 ready → exactly S2
    let s1_task = execution_task_id(&plan, &plan.subtasks[0]);
    let registry = vec![registry_entry_for(
        &plan.plan_id,
        "S1",
        &s1_task,
        TaskStatus::Ready,
    )];
    let second = dispatch_ready_subtasks(&plan, base.path(), Some(&registry)).unwrap();
    assert_eq!(second.len(), 1);
    let payload: Value =
        serde_json::from_str(&std::fs::read_to_string(&second[0]).unwrap()).unwrap();
    assert_eq!(payload["metadata"]["subtaskId"], "S2");

    // a running (not ready) S2 unlocks nothing
    let s2_task = execution_task_id(&plan, &plan.subtasks[1]);
    let mut registry = registry;
    registry.push(registry_entry_for(
        &plan.plan_id,
        "S2",
        &s2_task,
        TaskStatus::Running,
    ));
    let third = dispatch_ready_subtasks(&plan, base.path(), Some(&registry)).unwrap();
    assert!(third.is_empty());
}

#[test]
fn policy_violation_creates_no_files() {
    let base = TempDir::new().unwrap();
    let mut request = refactor_request();
    request["description"] = json!("please dump the database secret tokens");

    let err = tools::plan_and_dispatch_task(&request, base.path(), false, 0.1).unwrap_err();
    assert_eq!(err.code(), "POLICY_VIOLATION");
    assert!(err.to_string().contains("secret_exfiltration"));

    assert!(!paths::tasks_dir(base.path()).exists());
    assert!(!paths::queue_dir(base.path()).exists());
}

#[test]
fn registry_round_trip_preserves_status_transitions() {
    let base = TempDir::new().unwrap();
    let mut entry = registry_entry_for("p1", "S1", "p1-S1", TaskStatus::Running);
    save_registry(base.path(), &[entry.clone()]).unwrap();

    // supervisor-style update: running → pr_created → ready
    entry.status = TaskStatus::PrCreated;
    entry.pr = Some(12);
    entry.pr_url = Some("https://example.test/pr/12".to_string());
    save_registry(base.path(), &[entry.clone()]).unwrap();

    entry.status = TaskStatus::Ready;
    entry.completed_at = Some(paths::now_ms());
    save_registry(base.path(), &[entry]).unwrap();

    let reloaded = load_registry(base.path());
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded[0].status, TaskStatus::Ready);
    assert_eq!(reloaded[0].pr, Some(12));
    assert!(reloaded[0].completed_at.is_some());
    // terminal entries leave the supervised set, so the ready notification
    // cannot repeat on later ticks
    assert!(!reloaded[0].status.is_supervised());
}

#[test]
fn open_pr_with_green_checks_and_clean_merge_is_ready() {
    let pr: PrInfo = serde_json::from_value(json!({
        "number": 7,
        "state": "OPEN",
        "url": "https://example.test/pr/7",
        "mergeable": true,
        "mergeStateStatus": "CLEAN",
        "statusCheckRollup": [
            {"name": "build", "status": "COMPLETED", "conclusion": "SUCCESS"},
            {"name": "test", "status": "COMPLETED", "conclusion": "SUCCESS"},
        ],
    }))
    .unwrap();

    assert_eq!(decide_pr_action(0, 3, &pr), Some(PrDecision::Ready));
}

#[test]
fn supervisor_decision_sequence_for_failing_then_green_pr() {
    let failing: PrInfo = serde_json::from_value(json!({
        "state": "OPEN",
        "mergeable": true,
        "mergeStateStatus": "CLEAN",
        "statusCheckRollup": [
            {"name": "test", "status": "COMPLETED", "conclusion": "FAILURE"},
        ],
    }))
    .unwrap();

    // attempts below the cap retry; at the cap the task blocks
    assert!(matches!(
        decide_pr_action(0, 3, &failing),
        Some(PrDecision::Retry { .. })
    ));
    assert!(matches!(
        decide_pr_action(3, 3, &failing),
        Some(PrDecision::Exhausted { .. })
    ));

    let green: PrInfo = serde_json::from_value(json!({
        "state": "OPEN",
        "mergeable": "MERGEABLE",
        "mergeStateStatus": "CLEAN",
        "statusCheckRollup": [
            {"name": "test", "status": "COMPLETED", "conclusion": "SUCCESS"},
        ],
    }))
    .unwrap();
    assert_eq!(decide_pr_action(2, 3, &green), Some(PrDecision::Ready));
}

#[test]
fn fallback_task_round_trips_through_queue_shape() {
    let base = TempDir::new().unwrap();
    std::fs::create_dir_all(paths::repo_root(base.path(), "agent-mission-control")).unwrap();

    let queue_path = tools::enqueue_fallback_task(&refactor_request(), base.path()).unwrap();
    let payload: Value =
        serde_json::from_str(&std::fs::read_to_string(&queue_path).unwrap()).unwrap();
    assert_eq!(payload["metadata"]["plannedBy"], "fallback");
    assert_eq!(payload["metadata"]["fallbackReason"], "planner_failed");

    // the spawner-side task shape parses back
    let task: zoe::dispatch::ExecutionTask = serde_json::from_value(payload).unwrap();
    assert_eq!(task.repo, "agent-mission-control");
    assert!(task.prompt.is_none());
}
