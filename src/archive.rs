//! On-disk plan archive: `tasks/<planId>/plan.json` plus one sidecar per
//! subtask. Plans are immutable once written; only the sidecar `dispatch`
//! field changes afterwards, and re-archiving preserves it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::paths;
use crate::plan::{Plan, Subtask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchPhase {
    Planned,
    Queued,
}

/// Mutable bookkeeping attached to an otherwise immutable subtask sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub state: DispatchPhase,
    pub queued_task_id: Option<String>,
    pub queued_at: Option<i64>,
}

impl DispatchRecord {
    pub fn planned() -> Self {
        Self {
            state: DispatchPhase::Planned,
            queued_task_id: None,
            queued_at: None,
        }
    }

    pub fn queued(task_id: &str, queued_at: i64) -> Self {
        Self {
            state: DispatchPhase::Queued,
            queued_task_id: Some(task_id.to_string()),
            queued_at: Some(queued_at),
        }
    }
}

/// Archive the plan file and all subtask sidecars. Returns the plan path.
pub fn save_plan(plan: &Plan, base_dir: &Path) -> Result<PathBuf> {
    let plan_path = paths::plan_file(base_dir, &plan.plan_id);
    paths::write_json_atomic(&plan_path, &plan.to_value())?;
    archive_subtasks(plan, base_dir)?;
    Ok(plan_path)
}

/// Write sidecars for every subtask. A pre-existing sidecar keeps whatever
/// `dispatch` record it already carries so re-archiving is idempotent.
pub fn archive_subtasks(plan: &Plan, base_dir: &Path) -> Result<()> {
    for subtask in &plan.subtasks {
        let archive_path = paths::subtask_archive_path(base_dir, &plan.plan_id, &subtask.id);
        let mut payload = subtask.to_value();
        payload["planId"] = Value::String(plan.plan_id.clone());

        let dispatch = read_existing_dispatch(&archive_path)
            .unwrap_or_else(|| serde_json::to_value(DispatchRecord::planned()).unwrap_or_default());
        payload["dispatch"] = dispatch;
        paths::write_json_atomic(&archive_path, &payload)?;
    }
    Ok(())
}

fn read_existing_dispatch(archive_path: &Path) -> Option<Value> {
    let raw = std::fs::read_to_string(archive_path).ok()?;
    let existing: Value = serde_json::from_str(&raw).ok()?;
    existing.get("dispatch").cloned()
}

/// Rewrite one sidecar's dispatch record, keeping the archived subtask body.
pub fn update_subtask_archive(
    plan: &Plan,
    subtask: &Subtask,
    record: &DispatchRecord,
    base_dir: &Path,
) -> Result<()> {
    let archive_path = paths::subtask_archive_path(base_dir, &plan.plan_id, &subtask.id);
    let mut payload = match std::fs::read_to_string(&archive_path) {
        Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| subtask.to_value()),
        Err(_) => {
            let mut fresh = subtask.to_value();
            fresh["planId"] = Value::String(plan.plan_id.clone());
            fresh
        }
    };
    payload["dispatch"] = serde_json::to_value(record)?;
    paths::write_json_atomic(&archive_path, &payload)?;
    Ok(())
}
