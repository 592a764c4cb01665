//! Plan schema: parsing, validation, serialization, and the stable
//! topological ordering used by the dispatcher.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::{PlannerError, Result};

pub const PROMPT_MAX_CHARS: usize = 20_000;

/// Collapse anything outside `[A-Za-z0-9_-]` into single dashes and trim
/// separator runs from both ends. Empty input degrades to `"task"`.
pub fn sanitize_identifier(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_dash = false;
    for ch in value.trim().chars() {
        if ch == '-' {
            if !last_dash {
                out.push('-');
                last_dash = true;
            }
        } else if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '_');
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Agent {
    Codex,
    Claude,
}

impl Agent {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "codex" => Some(Self::Codex),
            "claude" => Some(Self::Claude),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Claude => "claude",
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Effort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStrategy {
    Shared,
    Isolated,
}

impl WorktreeStrategy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "shared" => Some(Self::Shared),
            "isolated" => Some(Self::Isolated),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Isolated => "isolated",
        }
    }
}

impl std::fmt::Display for WorktreeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn require_string(data: &Map<String, Value>, key: &str) -> Result<String> {
    match data.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(PlannerError::invalid_plan(format!(
            "Missing or invalid string field: {key}"
        ))),
    }
}

fn optional_string(data: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim().to_string())),
        _ => Err(PlannerError::invalid_plan(format!(
            "Invalid string field: {key}"
        ))),
    }
}

fn optional_object(data: &Map<String, Value>, key: &str) -> Result<Map<String, Value>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        _ => Err(PlannerError::invalid_plan(format!(
            "Invalid object field: {key}"
        ))),
    }
}

fn optional_string_list(data: &Map<String, Value>, key: &str) -> Result<Vec<String>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
                    _ => {
                        return Err(PlannerError::invalid_plan(format!(
                            "Invalid string array field: {key}"
                        )))
                    }
                }
            }
            Ok(out)
        }
        _ => Err(PlannerError::invalid_plan(format!(
            "Invalid string array field: {key}"
        ))),
    }
}

/// Plan-level routing defaults that subtasks inherit when they do not set
/// their own agent/model/effort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDefaults {
    pub agent: Option<Agent>,
    pub model: Option<String>,
    pub effort: Option<Effort>,
}

impl RoutingDefaults {
    pub fn from_object(data: &Map<String, Value>) -> Result<Self> {
        let agent = match optional_string(data, "agent")? {
            Some(raw) => Some(Agent::parse(&raw).ok_or_else(|| {
                PlannerError::invalid_plan(format!("Unsupported routing.agent: {raw}"))
            })?),
            None => None,
        };
        let effort = match optional_string(data, "effort")? {
            Some(raw) => Some(Effort::parse(&raw).ok_or_else(|| {
                PlannerError::invalid_plan(format!("Unsupported routing.effort: {raw}"))
            })?),
            None => None,
        };
        Ok(Self {
            agent,
            model: optional_string(data, "model")?,
            effort,
        })
    }

    pub fn to_value(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        if let Some(agent) = self.agent {
            payload.insert("agent".into(), json!(agent.as_str()));
        }
        if let Some(model) = &self.model {
            payload.insert("model".into(), json!(model));
        }
        if let Some(effort) = self.effort {
            payload.insert("effort".into(), json!(effort.as_str()));
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub agent: Agent,
    pub model: String,
    pub effort: Effort,
    pub worktree_strategy: WorktreeStrategy,
    pub depends_on: Vec<String>,
    pub files_hint: Vec<String>,
    pub prompt: String,
    pub definition_of_done: Vec<String>,
}

impl Subtask {
    pub fn from_value(data: &Map<String, Value>, routing: &RoutingDefaults) -> Result<Self> {
        let subtask_id = require_string(data, "id")?;
        if !is_valid_identifier(&subtask_id) {
            return Err(PlannerError::invalid_plan(format!(
                "Invalid subtask id: {subtask_id}"
            )));
        }

        let agent = match optional_string(data, "agent")? {
            Some(raw) => Agent::parse(&raw),
            None => routing.agent,
        };
        let agent = agent.ok_or_else(|| {
            PlannerError::invalid_plan(format!(
                "Invalid or missing agent for subtask {subtask_id}"
            ))
        })?;

        let model = optional_string(data, "model")?
            .or_else(|| routing.model.clone())
            .ok_or_else(|| {
                PlannerError::invalid_plan(format!("Missing model for subtask {subtask_id}"))
            })?;

        let effort = match optional_string(data, "effort")? {
            Some(raw) => Effort::parse(&raw),
            None => routing.effort,
        };
        let effort = effort.ok_or_else(|| {
            PlannerError::invalid_plan(format!(
                "Invalid or missing effort for subtask {subtask_id}"
            ))
        })?;

        let strategy_raw = require_string(data, "worktreeStrategy")?;
        let worktree_strategy = WorktreeStrategy::parse(&strategy_raw).ok_or_else(|| {
            PlannerError::invalid_plan(format!(
                "Invalid worktreeStrategy for subtask {subtask_id}: {strategy_raw}"
            ))
        })?;

        let prompt = require_string(data, "prompt")?;
        let prompt_chars = prompt.chars().count();
        if prompt_chars > PROMPT_MAX_CHARS {
            return Err(PlannerError::invalid_plan(format!(
                "Prompt too long for subtask {subtask_id}: {prompt_chars} > {PROMPT_MAX_CHARS}"
            )));
        }

        Ok(Self {
            id: subtask_id.clone(),
            title: require_string(data, "title")?,
            description: require_string(data, "description")?,
            agent,
            model,
            effort,
            worktree_strategy,
            depends_on: optional_string_list(data, "dependsOn")?,
            files_hint: optional_string_list(data, "filesHint")?,
            prompt,
            definition_of_done: optional_string_list(data, "definitionOfDone")?,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "title": self.title,
            "description": self.description,
            "agent": self.agent.as_str(),
            "model": self.model,
            "effort": self.effort.as_str(),
            "worktreeStrategy": self.worktree_strategy.as_str(),
            "dependsOn": self.depends_on,
            "filesHint": self.files_hint,
            "prompt": self.prompt,
            "definitionOfDone": self.definition_of_done,
        })
    }
}

/// A validated plan. Immutable once archived; only the per-subtask dispatch
/// sidecars mutate afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub repo: String,
    pub title: String,
    pub requested_by: String,
    pub requested_at: i64,
    pub objective: String,
    pub constraints: Map<String, Value>,
    pub context: Map<String, Value>,
    pub subtasks: Vec<Subtask>,
    pub routing: RoutingDefaults,
    pub version: String,
}

impl Plan {
    pub fn from_value(value: &Value) -> Result<Self> {
        let data = value
            .as_object()
            .ok_or_else(|| PlannerError::invalid_plan("Plan payload must be an object"))?;

        let plan_id = require_string(data, "planId")?;
        if !is_valid_identifier(&plan_id) {
            return Err(PlannerError::invalid_plan(format!(
                "Invalid planId: {plan_id}"
            )));
        }

        let requested_at = match data.get("requestedAt") {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.as_i64().ok_or_else(|| {
                PlannerError::invalid_plan("requestedAt must be an integer in milliseconds")
            })?,
            _ => {
                return Err(PlannerError::invalid_plan(
                    "requestedAt must be an integer in milliseconds",
                ))
            }
        };

        let routing = RoutingDefaults::from_object(&optional_object(data, "routing")?)?;

        let raw_subtasks = match data.get("subtasks") {
            Some(Value::Array(items)) if !items.is_empty() => items,
            _ => {
                return Err(PlannerError::invalid_plan(
                    "subtasks must be a non-empty array",
                ))
            }
        };

        let mut subtasks = Vec::with_capacity(raw_subtasks.len());
        for item in raw_subtasks {
            let object = item
                .as_object()
                .ok_or_else(|| PlannerError::invalid_plan("Each subtask must be an object"))?;
            subtasks.push(Subtask::from_value(object, &routing)?);
        }

        Self::validate_dependencies(&subtasks)?;

        Ok(Self {
            plan_id,
            repo: require_string(data, "repo")?,
            title: require_string(data, "title")?,
            requested_by: require_string(data, "requestedBy")?,
            requested_at,
            objective: require_string(data, "objective")?,
            constraints: optional_object(data, "constraints")?,
            context: optional_object(data, "context")?,
            subtasks,
            routing,
            version: require_string(data, "version")?,
        })
    }

    fn validate_dependencies(subtasks: &[Subtask]) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for subtask in subtasks {
            if !seen.insert(subtask.id.as_str()) {
                return Err(PlannerError::invalid_plan(
                    "Subtask ids must be unique inside a plan",
                ));
            }
        }

        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for subtask in subtasks {
            indegree.insert(subtask.id.as_str(), 0);
            adjacency.insert(subtask.id.as_str(), Vec::new());
        }
        for subtask in subtasks {
            for dep in &subtask.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PlannerError::invalid_plan(format!(
                        "Subtask {} depends on unknown subtask {dep}",
                        subtask.id
                    )));
                }
                if let Some(children) = adjacency.get_mut(dep.as_str()) {
                    children.push(subtask.id.as_str());
                }
                if let Some(entry) = indegree.get_mut(subtask.id.as_str()) {
                    *entry += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = subtasks
            .iter()
            .filter(|s| indegree[s.id.as_str()] == 0)
            .map(|s| s.id.as_str())
            .collect();
        let mut visited = 0usize;
        while let Some(current) = queue.pop_front() {
            visited += 1;
            let children = adjacency.get(current).cloned().unwrap_or_default();
            for child in children {
                let entry = indegree.get_mut(child).expect("known child");
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(child);
                }
            }
        }

        if visited != subtasks.len() {
            return Err(PlannerError::invalid_plan(
                "Subtask dependency graph contains a cycle",
            ));
        }
        Ok(())
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Dependency-respecting order that is stable with respect to the
    /// authored subtask order: whenever several subtasks are ready, the one
    /// that appeared first in the input comes first.
    pub fn topologically_sorted_subtasks(&self) -> Vec<&Subtask> {
        let original_order: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .enumerate()
            .map(|(index, s)| (s.id.as_str(), index))
            .collect();

        let mut indegree: HashMap<&str, usize> = self
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = self
            .subtasks
            .iter()
            .map(|s| (s.id.as_str(), Vec::new()))
            .collect();
        for subtask in &self.subtasks {
            for dep in &subtask.depends_on {
                if let Some(children) = adjacency.get_mut(dep.as_str()) {
                    children.push(subtask.id.as_str());
                }
            }
        }

        let mut ready: Vec<&str> = self
            .subtasks
            .iter()
            .filter(|s| indegree[s.id.as_str()] == 0)
            .map(|s| s.id.as_str())
            .collect();
        ready.sort_by_key(|id| original_order[id]);

        let mut ordered = Vec::with_capacity(self.subtasks.len());
        while !ready.is_empty() {
            let current = ready.remove(0);
            if let Some(subtask) = self.subtask(current) {
                ordered.push(subtask);
            }
            let children = adjacency.get(current).cloned().unwrap_or_default();
            for child in children {
                let entry = indegree.get_mut(child).expect("known child");
                *entry -= 1;
                if *entry == 0 {
                    ready.push(child);
                }
            }
            ready.sort_by_key(|id| original_order[id]);
        }

        ordered
    }

    pub fn to_value(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("planId".into(), json!(self.plan_id));
        payload.insert("repo".into(), json!(self.repo));
        payload.insert("title".into(), json!(self.title));
        payload.insert("requestedBy".into(), json!(self.requested_by));
        payload.insert("requestedAt".into(), json!(self.requested_at));
        payload.insert("objective".into(), json!(self.objective));
        payload.insert("constraints".into(), Value::Object(self.constraints.clone()));
        payload.insert("context".into(), Value::Object(self.context.clone()));
        payload.insert(
            "subtasks".into(),
            Value::Array(self.subtasks.iter().map(Subtask::to_value).collect()),
        );
        payload.insert("version".into(), json!(self.version));
        let routing = self.routing.to_value();
        if !routing.is_empty() {
            payload.insert("routing".into(), Value::Object(routing));
        }
        Value::Object(payload)
    }
}

pub fn load_plan(path: &Path) -> Result<Plan> {
    let raw = std::fs::read_to_string(path)
        .map_err(|_| PlannerError::invalid_plan(format!("Plan file not found: {}", path.display())))?;
    let payload: Value = serde_json::from_str(&raw).map_err(|_| {
        PlannerError::invalid_plan(format!("Plan file is not valid JSON: {}", path.display()))
    })?;
    Plan::from_value(&payload)
}
