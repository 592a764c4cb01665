//! Rule-based planning engine. Zoe is the planning agent, so plan generation
//! lives inside the orchestrator; nothing here talks to a network service.

pub mod files;
pub mod profile;
pub mod prompt;

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::errors::{PlannerError, Result};
use crate::paths;
use crate::plan::Plan;

use files::{phase_files, PhaseFiles};
use profile::{build_task_profile, TaskProfile};
use prompt::{build_prompt, default_definition_of_done, merge_definition_of_done, PromptSpec};

pub const PLANNER_STRATEGY: &str = "phased-v1";
pub const DEFAULT_AGENT: &str = "codex";
pub const DEFAULT_MODEL: &str = "gpt-5.3-codex";
pub const DEFAULT_EFFORT: &str = "medium";

fn coerce_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn object_or_empty(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

struct TemplateContext<'a> {
    repo: &'a str,
    title: &'a str,
    objective: &'a str,
    has_constraints: bool,
    agent: &'a str,
    model: &'a str,
    effort: &'a str,
    global_dod: &'a [String],
}

#[allow(clippy::too_many_arguments)]
fn subtask_payload(
    subtask_id: &str,
    title: &str,
    description: &str,
    ctx: &TemplateContext<'_>,
    depends_on: &[String],
    files_hint: &[String],
    definition_of_done: &[String],
    prompt: String,
) -> Value {
    json!({
        "id": subtask_id,
        "title": title,
        "description": description,
        "agent": ctx.agent,
        "model": ctx.model,
        "effort": ctx.effort,
        "worktreeStrategy": "isolated",
        "dependsOn": depends_on,
        "filesHint": files_hint,
        "prompt": prompt,
        "definitionOfDone": definition_of_done,
    })
}

fn plan_analysis_task(ctx: &TemplateContext<'_>, profile: &TaskProfile) -> Vec<Value> {
    let title = "Analyze the current state";
    let description =
        "Inspect the relevant code and document the current state, blockers, and recommended next steps.";
    let dod = merge_definition_of_done(
        &[
            "Summarize the current implementation state with concrete file-level findings.",
            "Capture recommended next actions in a checked-in note or report file when no existing artifact is provided.",
        ],
        ctx.global_dod,
    );
    let files_hint = profile.files_hint.clone();
    let prompt = build_prompt(&PromptSpec {
        repo: ctx.repo,
        plan_title: ctx.title,
        objective: ctx.objective,
        subtask_id: "S1",
        subtask_title: title,
        description,
        has_constraints: ctx.has_constraints,
        definition_of_done: &dod,
        files_hint: &files_hint,
        depends_on: &[],
        phase_boundary: "Focus on analysis and reporting. Do not implement speculative code changes unless they are required to make the report accurate.",
    });
    vec![subtask_payload(
        "S1",
        title,
        description,
        ctx,
        &[],
        &files_hint,
        &dod,
        prompt,
    )]
}

fn plan_docs_only_task(ctx: &TemplateContext<'_>, profile: &TaskProfile) -> Vec<Value> {
    let title = "Update documentation";
    let description =
        "Make the requested documentation changes and keep the written guidance consistent with the current repository behavior.";
    let files_hint = if profile.doc_files.is_empty() {
        vec!["README.md".to_string(), "docs/".to_string()]
    } else {
        profile.doc_files.clone()
    };
    let dod = merge_definition_of_done(
        &[
            "Update the requested documentation or written guidance.",
            "Keep examples, command snippets, and terminology internally consistent.",
        ],
        ctx.global_dod,
    );
    let prompt = build_prompt(&PromptSpec {
        repo: ctx.repo,
        plan_title: ctx.title,
        objective: ctx.objective,
        subtask_id: "S1",
        subtask_title: title,
        description,
        has_constraints: ctx.has_constraints,
        definition_of_done: &dod,
        files_hint: &files_hint,
        depends_on: &[],
        phase_boundary: "Stay within docs, examples, and text-based guidance unless a tiny supporting code snippet must be corrected for accuracy.",
    });
    vec![subtask_payload(
        "S1",
        title,
        description,
        ctx,
        &[],
        &files_hint,
        &dod,
        prompt,
    )]
}

fn non_empty_or(primary: Vec<String>, alternative: Vec<String>) -> Vec<String> {
    if primary.is_empty() {
        alternative
    } else {
        primary
    }
}

fn plan_code_change_tasks(
    ctx: &TemplateContext<'_>,
    profile: &TaskProfile,
    phases: &PhaseFiles,
) -> Vec<Value> {
    let mut subtasks: Vec<Value> = Vec::new();
    let mut dependency_chain: Vec<String> = Vec::new();

    let impl_files = non_empty_or(
        phases.implementation.clone(),
        non_empty_or(
            profile.implementation_files.clone(),
            profile.files_hint.clone(),
        ),
    );
    let foundation_files = non_empty_or(phases.foundation.clone(), impl_files.clone());
    let test_files = non_empty_or(
        phases.validation.clone(),
        non_empty_or(profile.test_files.clone(), vec!["tests/".to_string()]),
    );
    let doc_files = non_empty_or(
        phases.documentation.clone(),
        non_empty_or(
            profile.doc_files.clone(),
            vec!["README.md".to_string(), "docs/".to_string()],
        ),
    );

    if profile.requires_foundation_split {
        let title = "Prepare the implementation surface";
        let description =
            "Make the structural or foundational code changes required before the main behavior update lands.";
        let dod = merge_definition_of_done(
            &[
                "Extract or reshape the core implementation surface needed for the requested change.",
                "Leave the codebase in a stable state that the follow-up implementation step can build on directly.",
            ],
            ctx.global_dod,
        );
        let prompt = build_prompt(&PromptSpec {
            repo: ctx.repo,
            plan_title: ctx.title,
            objective: ctx.objective,
            subtask_id: "S1",
            subtask_title: title,
            description,
            has_constraints: ctx.has_constraints,
            definition_of_done: &dod,
            files_hint: &foundation_files,
            depends_on: &[],
            phase_boundary: "Focus on foundation work only. Do not absorb the follow-up validation or documentation work into this step.",
        });
        subtasks.push(subtask_payload(
            "S1",
            title,
            description,
            ctx,
            &[],
            &foundation_files,
            &dod,
            prompt,
        ));
        dependency_chain = vec!["S1".to_string()];
    }

    let implementation_id = format!("S{}", subtasks.len() + 1);
    let title = "Land the primary implementation";
    let description = format!(
        "Implement the main repository change for '{}' and wire it through the affected code paths.",
        ctx.title
    );
    let dod = merge_definition_of_done(
        &[
            "Complete the primary behavior change requested by the objective.",
            "Keep the implementation scoped to the affected feature area.",
        ],
        ctx.global_dod,
    );
    let prompt = build_prompt(&PromptSpec {
        repo: ctx.repo,
        plan_title: ctx.title,
        objective: ctx.objective,
        subtask_id: &implementation_id,
        subtask_title: title,
        description: &description,
        has_constraints: ctx.has_constraints,
        definition_of_done: &dod,
        files_hint: &impl_files,
        depends_on: &dependency_chain,
        phase_boundary: "Focus on the code path changes. Defer dedicated validation and docs work to later subtasks unless a minimal adjustment is required to keep the change correct.",
    });
    subtasks.push(subtask_payload(
        &implementation_id,
        title,
        &description,
        ctx,
        &dependency_chain,
        &impl_files,
        &dod,
        prompt,
    ));
    dependency_chain = vec![implementation_id];

    if profile.tests_requested {
        let validation_id = format!("S{}", subtasks.len() + 1);
        let title = "Add validation and regression coverage";
        let description =
            "Add or adjust the most relevant tests, checks, or validation artifacts for the preceding implementation change.";
        let dod = merge_definition_of_done(
            &[
                "Add or update focused validation that proves the requested behavior.",
                "Make sure the relevant tests or checks would fail without the implementation change.",
            ],
            ctx.global_dod,
        );
        let prompt = build_prompt(&PromptSpec {
            repo: ctx.repo,
            plan_title: ctx.title,
            objective: ctx.objective,
            subtask_id: &validation_id,
            subtask_title: title,
            description,
            has_constraints: ctx.has_constraints,
            definition_of_done: &dod,
            files_hint: &test_files,
            depends_on: &dependency_chain,
            phase_boundary: "Stay focused on tests, checks, and validation. Do not reopen broad implementation work unless the earlier subtask left a small correctness gap.",
        });
        subtasks.push(subtask_payload(
            &validation_id,
            title,
            description,
            ctx,
            &dependency_chain,
            &test_files,
            &dod,
            prompt,
        ));
        dependency_chain = vec![validation_id];
    }

    if profile.docs_requested {
        let docs_id = format!("S{}", subtasks.len() + 1);
        let title = "Update documentation and handoff notes";
        let description =
            "Update the repository documentation, README, or handoff notes that should change after the implementation and validation work.";
        let dod = merge_definition_of_done(
            &[
                "Update documentation or operator guidance affected by the change.",
                "Keep docs aligned with the behavior and commands introduced by earlier subtasks.",
            ],
            ctx.global_dod,
        );
        let prompt = build_prompt(&PromptSpec {
            repo: ctx.repo,
            plan_title: ctx.title,
            objective: ctx.objective,
            subtask_id: &docs_id,
            subtask_title: title,
            description,
            has_constraints: ctx.has_constraints,
            definition_of_done: &dod,
            files_hint: &doc_files,
            depends_on: &dependency_chain,
            phase_boundary: "Stay within docs and handoff artifacts. Do not introduce fresh feature work in this subtask.",
        });
        subtasks.push(subtask_payload(
            &docs_id,
            title,
            description,
            ctx,
            &dependency_chain,
            &doc_files,
            &dod,
            prompt,
        ));
    }

    subtasks
}

#[derive(Debug, Default)]
pub struct ZoePlannerEngine;

impl ZoePlannerEngine {
    pub fn new() -> Self {
        Self
    }

    /// Turn a normalized plan request into a validated Plan. Deterministic:
    /// the same input (and repo contents) always yields the same plan.
    pub fn plan(&self, task_input: &Value, base_dir: &Path) -> Result<Plan> {
        let input = task_input
            .as_object()
            .ok_or_else(|| PlannerError::invalid_plan("Planner request must be an object"))?;

        let repo = coerce_text(input.get("repo"));
        let title = coerce_text(input.get("title"));
        let objective = {
            let direct = coerce_text(input.get("objective"));
            if direct.is_empty() {
                coerce_text(input.get("description"))
            } else {
                direct
            }
        };
        let requested_by = coerce_text(input.get("requestedBy"));
        let version = coerce_text(input.get("version"));
        let plan_id = coerce_text(input.get("planId"));

        if repo.is_empty()
            || title.is_empty()
            || objective.is_empty()
            || requested_by.is_empty()
            || version.is_empty()
            || plan_id.is_empty()
        {
            return Err(PlannerError::invalid_plan(
                "Planner request is missing required fields",
            ));
        }

        let requested_at = match input.get("requestedAt") {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.as_i64().unwrap_or_default(),
            _ => {
                return Err(PlannerError::invalid_plan(
                    "Planner request requestedAt must be an integer",
                ))
            }
        };

        let routing = object_or_empty(input.get("routing"));
        let constraints = object_or_empty(input.get("constraints"));
        let mut context = object_or_empty(input.get("context"));

        let explicit_files_hint: Vec<String> = match context.get("filesHint") {
            Some(Value::Array(items)) => files::dedupe(
                items
                    .iter()
                    .map(|item| coerce_text(Some(item)))
                    .collect::<Vec<_>>(),
            ),
            _ => Vec::new(),
        };
        let has_explicit_files_hint = !explicit_files_hint.is_empty();
        let repo_root = paths::repo_root(base_dir, &repo);
        let files_hint = if has_explicit_files_hint {
            explicit_files_hint
        } else {
            files::discover_repo_file_hints(&repo_root, 6)
        };

        let agent = {
            let raw = coerce_text(routing.get("agent"));
            if raw.is_empty() { DEFAULT_AGENT.to_string() } else { raw }
        };
        let model = {
            let raw = coerce_text(routing.get("model"));
            if raw.is_empty() { DEFAULT_MODEL.to_string() } else { raw }
        };
        let effort = {
            let raw = coerce_text(routing.get("effort"));
            if raw.is_empty() { DEFAULT_EFFORT.to_string() } else { raw }
        };

        let global_dod = default_definition_of_done(&constraints);
        let profile = build_task_profile(
            &title,
            &objective,
            &files_hint,
            has_explicit_files_hint,
            &constraints,
        );

        let ctx = TemplateContext {
            repo: &repo,
            title: &title,
            objective: &objective,
            has_constraints: !constraints.is_empty(),
            agent: &agent,
            model: &model,
            effort: &effort,
            global_dod: &global_dod,
        };

        let subtasks = if profile.analysis_only {
            plan_analysis_task(&ctx, &profile)
        } else if profile.docs_only {
            plan_docs_only_task(&ctx, &profile)
        } else {
            let phases = phase_files(
                &repo_root,
                &title,
                &objective,
                &profile,
                has_explicit_files_hint,
            );
            plan_code_change_tasks(&ctx, &profile, &phases)
        };

        context.entry("planner".to_string()).or_insert_with(|| {
            json!({
                "strategy": PLANNER_STRATEGY,
                "docsRequested": profile.docs_requested,
                "testsRequested": profile.tests_requested,
                "docsOnly": profile.docs_only,
                "analysisOnly": profile.analysis_only,
                "requiresFoundationSplit": profile.requires_foundation_split,
                "subtaskCount": subtasks.len(),
            })
        });

        let payload = json!({
            "planId": plan_id,
            "repo": repo,
            "title": title,
            "requestedBy": requested_by,
            "requestedAt": requested_at,
            "objective": objective,
            "constraints": constraints,
            "context": context,
            "routing": routing,
            "version": version,
            "subtasks": subtasks,
        });
        Plan::from_value(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn task_input() -> Value {
        json!({
            "planId": "1730000000000-agent-mission-control-refactor-auth-flow",
            "repo": "agent-mission-control",
            "title": "Refactor auth flow and update docs",
            "requestedBy": "alice#1234",
            "requestedAt": 1_730_000_000_000i64,
            "objective": "Refactor the auth flow, wire the new session helper through the API layer, add regression coverage, and update the operator documentation.",
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
            "routing": {
                "agent": "codex",
                "model": "gpt-5.3-codex",
                "effort": "high",
            },
            "version": "1.0",
        })
    }

    fn scratch_base() -> PathBuf {
        // a base dir with no repos at all, so discovery finds nothing
        std::env::temp_dir().join("zoe-planner-tests-empty")
    }

    #[test]
    fn complex_code_task_splits_into_four_ordered_subtasks() {
        let plan = ZoePlannerEngine::new()
            .plan(&task_input(), &scratch_base())
            .unwrap();

        let ids: Vec<&str> = plan.subtasks.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["S1", "S2", "S3", "S4"]);
        let titles: Vec<&str> = plan.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Prepare the implementation surface",
                "Land the primary implementation",
                "Add validation and regression coverage",
                "Update documentation and handoff notes",
            ]
        );
        let deps: Vec<&[String]> = plan
            .subtasks
            .iter()
            .map(|s| s.depends_on.as_slice())
            .collect();
        assert_eq!(deps[0], Vec::<String>::new().as_slice());
        assert_eq!(deps[1], ["S1".to_string()].as_slice());
        assert_eq!(deps[2], ["S2".to_string()].as_slice());
        assert_eq!(deps[3], ["S3".to_string()].as_slice());
        assert!(plan
            .subtasks
            .iter()
            .all(|s| s.worktree_strategy.as_str() == "isolated"));

        assert_eq!(
            plan.subtasks[0].files_hint,
            ["src/auth/session.py", "src/api/routes/auth.py"]
        );
        assert_eq!(
            plan.subtasks[1].files_hint,
            ["src/api/routes/auth.py", "src/auth/session.py"]
        );
        assert_eq!(plan.subtasks[2].files_hint[0], "tests/test_auth_flow.py");
        assert!(plan.subtasks[2]
            .files_hint
            .contains(&"src/auth/session.py".to_string()));
        assert_eq!(plan.subtasks[3].files_hint, ["README.md"]);

        let planner = plan.context.get("planner").unwrap();
        assert_eq!(planner["strategy"], "phased-v1");
        assert_eq!(planner["subtaskCount"], 4);
    }

    #[test]
    fn simple_fix_generates_implementation_and_validation() {
        let mut input = task_input();
        input["title"] = json!("Fix login timeout");
        input["objective"] = json!("Fix the login timeout handling for expired sessions.");
        input["context"] = json!({
            "filesHint": ["src/auth/session.py", "tests/test_session_timeout.py"],
        });
        let plan = ZoePlannerEngine::new().plan(&input, &scratch_base()).unwrap();

        let titles: Vec<&str> = plan.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Land the primary implementation",
                "Add validation and regression coverage",
            ]
        );
        assert_eq!(plan.subtasks[1].depends_on, ["S1"]);
        assert_eq!(plan.subtasks[0].files_hint, ["src/auth/session.py"]);
        assert_eq!(
            plan.subtasks[1].files_hint[0],
            "tests/test_session_timeout.py"
        );
        assert!(plan.subtasks[1]
            .files_hint
            .contains(&"src/auth/session.py".to_string()));
    }

    #[test]
    fn analysis_task_is_not_misclassified_as_docs_only() {
        let mut input = task_input();
        input["title"] = json!("检查开发进度");
        input["objective"] = json!("阅读项目代码和文档，确认当前开发进度");
        input["context"] = json!({});
        let plan = ZoePlannerEngine::new().plan(&input, &scratch_base()).unwrap();

        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].title, "Analyze the current state");
        let planner = plan.context.get("planner").unwrap();
        assert_eq!(planner["analysisOnly"], true);
        assert_eq!(planner["docsOnly"], false);
    }

    #[test]
    fn analysis_task_discovers_repo_entry_files_without_hints() {
        let base = tempfile::tempdir().unwrap();
        let repo_root = base.path().join("repos").join("demo-repo");
        fs::create_dir_all(repo_root.join("src")).unwrap();
        fs::create_dir_all(repo_root.join("scripts")).unwrap();
        fs::write(repo_root.join("README.md"), "demo").unwrap();
        fs::write(repo_root.join("package.json"), "{}").unwrap();
        fs::write(repo_root.join("src/main.ts"), "export {};\n").unwrap();
        fs::write(repo_root.join("scripts/worker.ts"), "console.log('ok')\n").unwrap();

        let input = json!({
            "planId": "1730000000000-demo-repo-check-status",
            "repo": "demo-repo",
            "title": "检查进度",
            "requestedBy": "alice#1234",
            "requestedAt": 1_730_000_000_000i64,
            "objective": "阅读当前代码和文档，确认当前开发进度。",
            "constraints": {},
            "context": {},
            "routing": {"agent": "codex", "model": "gpt-5.3-codex", "effort": "medium"},
            "version": "1.0",
        });
        let plan = ZoePlannerEngine::new().plan(&input, base.path()).unwrap();

        assert_eq!(plan.subtasks[0].title, "Analyze the current state");
        let hints = &plan.subtasks[0].files_hint;
        assert!(hints.contains(&"README.md".to_string()));
        assert!(hints.contains(&"package.json".to_string()));
        assert!(hints.contains(&"src/main.ts".to_string()));
    }

    #[test]
    fn code_task_discovers_implementation_and_test_files_without_hints() {
        let base = tempfile::tempdir().unwrap();
        let repo_root = base.path().join("repos").join("demo-repo");
        fs::create_dir_all(repo_root.join("src/auth")).unwrap();
        fs::create_dir_all(repo_root.join("tests")).unwrap();
        fs::write(repo_root.join("package.json"), "{}").unwrap();
        fs::write(repo_root.join("src/auth/session.ts"), "export {};\n").unwrap();
        fs::write(repo_root.join("src/auth/routes.ts"), "export {};\n").unwrap();
        fs::write(repo_root.join("tests/test_auth.ts"), "ok\n").unwrap();

        let input = json!({
            "planId": "1730000000000-demo-repo-fix-auth",
            "repo": "demo-repo",
            "title": "修复现存错误",
            "requestedBy": "alice#1234",
            "requestedAt": 1_730_000_000_000i64,
            "objective": "运行当前代码，修复存在的错误",
            "constraints": {},
            "context": {},
            "routing": {"agent": "codex", "model": "gpt-5.3-codex", "effort": "medium"},
            "version": "1.0",
        });
        let plan = ZoePlannerEngine::new().plan(&input, base.path()).unwrap();

        let titles: Vec<&str> = plan.subtasks.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            [
                "Land the primary implementation",
                "Add validation and regression coverage",
            ]
        );
        assert!(plan.subtasks[0]
            .files_hint
            .contains(&"src/auth/session.ts".to_string()));
        assert!(plan.subtasks[0]
            .files_hint
            .contains(&"src/auth/routes.ts".to_string()));
        assert_eq!(plan.subtasks[1].files_hint[0], "tests/test_auth.ts");
    }

    #[test]
    fn planner_is_deterministic() {
        let engine = ZoePlannerEngine::new();
        let a = engine.plan(&task_input(), &scratch_base()).unwrap();
        let b = engine.plan(&task_input(), &scratch_base()).unwrap();
        assert_eq!(a.to_value(), b.to_value());
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let mut input = task_input();
        input.as_object_mut().unwrap().remove("repo");
        let err = ZoePlannerEngine::new()
            .plan(&input, &scratch_base())
            .unwrap_err();
        assert!(err.to_string().contains("missing required fields"));
    }

    #[test]
    fn prompts_embed_dependencies_and_boundaries() {
        let plan = ZoePlannerEngine::new()
            .plan(&task_input(), &scratch_base())
            .unwrap();
        let implementation = &plan.subtasks[1];
        assert!(implementation.prompt.contains("UPSTREAM DEPENDENCIES:"));
        assert!(implementation
            .prompt
            .contains("S1 is already completed"));
        assert!(implementation
            .prompt
            .contains("Do not access or print secrets"));
        assert!(implementation
            .prompt
            .contains("Keep the auth behavior backward compatible."));
    }
}
