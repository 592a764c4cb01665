//! Dispatcher: walks a plan in topological order and turns every subtask
//! whose upstream work is complete into a queue file the spawner will pick
//! up. Safe to re-run at any time; already-queued subtasks are skipped.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::archive::{self, DispatchPhase, DispatchRecord};
use crate::errors::{PlannerError, Result};
use crate::paths;
use crate::plan::{load_plan, sanitize_identifier, Agent, Effort, Plan, Subtask};
use crate::registry::{self, RegistryEntry, TaskStatus};

pub const PLANNED_BY: &str = "zoe";
pub const DEFAULT_POLL_INTERVAL_SEC: f64 = 5.0;

/// Queue-level representation of one subtask, self-contained enough for the
/// spawner to run it without reading the plan back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: String,
    pub repo: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub agent: Option<Agent>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub effort: Option<Effort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(
        default,
        rename = "maxAttempts",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub requested_at: Option<i64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ExecutionTask {
    pub fn plan_id(&self) -> Option<&str> {
        self.metadata.get("planId").and_then(Value::as_str)
    }

    pub fn worktree_strategy(&self) -> Option<&str> {
        self.metadata.get("worktreeStrategy").and_then(Value::as_str)
    }
}

/// Per-plan dispatch bookkeeping, persisted next to the plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchState {
    pub plan_id: String,
    #[serde(default)]
    pub dispatched: BTreeMap<String, DispatchRecord>,
}

impl DispatchState {
    fn empty(plan_id: &str) -> Self {
        Self {
            plan_id: plan_id.to_string(),
            dispatched: BTreeMap::new(),
        }
    }

    fn is_queued(&self, subtask_id: &str) -> bool {
        self.dispatched
            .get(subtask_id)
            .map(|record| record.state == DispatchPhase::Queued)
            .unwrap_or(false)
    }
}

pub fn load_dispatch_state(plan: &Plan, base_dir: &Path) -> DispatchState {
    let path = paths::dispatch_state_path(base_dir, &plan.plan_id);
    match std::fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| DispatchState::empty(&plan.plan_id)),
        Err(_) => DispatchState::empty(&plan.plan_id),
    }
}

pub fn save_dispatch_state(state: &DispatchState, base_dir: &Path) -> Result<()> {
    let path = paths::dispatch_state_path(base_dir, &state.plan_id);
    paths::write_json_atomic(&path, state)?;
    Ok(())
}

pub fn execution_task_id(plan: &Plan, subtask: &Subtask) -> String {
    sanitize_identifier(&format!("{}-{}", plan.plan_id, subtask.id))
}

/// Subtask ids of this plan whose registry entry reached `ready`.
pub fn ready_subtask_ids(plan: &Plan, registry_items: &[RegistryEntry]) -> HashSet<String> {
    registry_items
        .iter()
        .filter(|item| item.status == TaskStatus::Ready)
        .filter(|item| item.plan_id() == Some(plan.plan_id.as_str()))
        .filter_map(|item| item.subtask_id().map(str::to_string))
        .collect()
}

pub fn build_execution_task(plan: &Plan, subtask: &Subtask) -> ExecutionTask {
    let mut metadata = Map::new();
    metadata.insert("planId".into(), json!(plan.plan_id));
    metadata.insert("subtaskId".into(), json!(subtask.id));
    metadata.insert("dependsOn".into(), json!(subtask.depends_on));
    metadata.insert(
        "worktreeStrategy".into(),
        json!(subtask.worktree_strategy.as_str()),
    );
    metadata.insert("filesHint".into(), json!(subtask.files_hint));
    metadata.insert("plannedBy".into(), json!(PLANNED_BY));
    metadata.insert(
        "definitionOfDone".into(),
        json!(subtask.definition_of_done),
    );
    metadata.insert("planVersion".into(), json!(plan.version));
    metadata.insert("objective".into(), json!(plan.objective));
    metadata.insert("constraints".into(), Value::Object(plan.constraints.clone()));
    metadata.insert("context".into(), Value::Object(plan.context.clone()));

    ExecutionTask {
        id: execution_task_id(plan, subtask),
        repo: plan.repo.clone(),
        title: subtask.title.clone(),
        description: subtask.description.clone(),
        agent: Some(subtask.agent),
        model: Some(subtask.model.clone()),
        effort: Some(subtask.effort),
        prompt: Some(subtask.prompt.clone()),
        max_attempts: None,
        requested_by: Some(plan.requested_by.clone()),
        requested_at: Some(plan.requested_at),
        metadata,
    }
}

/// One dispatcher pass: queue every subtask whose dependencies are all
/// completed and that is not already queued. Returns the new queue paths;
/// re-running with unchanged inputs returns an empty list.
pub fn dispatch_ready_subtasks(
    plan: &Plan,
    base_dir: &Path,
    registry_items: Option<&[RegistryEntry]>,
) -> Result<Vec<PathBuf>> {
    let queue_root = paths::queue_dir(base_dir);
    std::fs::create_dir_all(&queue_root)?;

    let loaded;
    let registry_items = match registry_items {
        Some(items) => items,
        None => {
            loaded = registry::load_registry(base_dir);
            &loaded
        }
    };

    let mut state = load_dispatch_state(plan, base_dir);
    let completed = ready_subtask_ids(plan, registry_items);

    let mut queued_paths = Vec::new();
    for subtask in plan.topologically_sorted_subtasks() {
        if state.is_queued(&subtask.id) {
            continue;
        }
        if !subtask.depends_on.iter().all(|dep| completed.contains(dep)) {
            continue;
        }

        let task = build_execution_task(plan, subtask);
        let queue_path = queue_root.join(format!("{}.json", task.id));
        paths::write_json_atomic(&queue_path, &task)?;

        let record = DispatchRecord::queued(&task.id, paths::now_ms());
        archive::update_subtask_archive(plan, subtask, &record, base_dir)?;
        state.dispatched.insert(subtask.id.clone(), record);
        queued_paths.push(queue_path);
    }

    save_dispatch_state(&state, base_dir)?;
    Ok(queued_paths)
}

/// Poll until every subtask has been dispatched or the iteration cap is hit.
pub fn watch_and_dispatch(
    plan: &Plan,
    base_dir: &Path,
    poll_interval_sec: f64,
    max_loops: Option<u32>,
) -> Result<Vec<PathBuf>> {
    let mut all_queued = Vec::new();
    let mut loops = 0u32;
    loop {
        all_queued.extend(dispatch_ready_subtasks(plan, base_dir, None)?);
        let state = load_dispatch_state(plan, base_dir);
        if state.dispatched.len() == plan.subtasks.len() {
            return Ok(all_queued);
        }
        loops += 1;
        if let Some(cap) = max_loops {
            if loops >= cap {
                return Ok(all_queued);
            }
        }
        std::thread::sleep(Duration::from_secs_f64(poll_interval_sec));
    }
}

/// Dispatch an archived plan file: re-archive sidecars (idempotent), then
/// queue whatever is ready.
pub fn dispatch_plan_file(
    plan_file: &Path,
    base_dir: &Path,
    watch: bool,
    poll_interval_sec: f64,
) -> Result<Vec<PathBuf>> {
    if !plan_file.exists() {
        return Err(PlannerError::DispatchError(format!(
            "Plan file not found: {}",
            plan_file.display()
        )));
    }
    let plan = load_plan(plan_file)?;
    archive::archive_subtasks(&plan, base_dir)?;
    if watch {
        watch_and_dispatch(&plan, base_dir, poll_interval_sec, None)
    } else {
        dispatch_ready_subtasks(&plan, base_dir, None)
    }
}
